use crate::document::{Document, ScalarLine, indent_of, key_of};
use crate::scanner::{Block, LineKind, classify};

/// How far past the anchor an existing flag line may sit.
const FLAG_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagEdit {
    Inserted(usize),
    Updated(usize),
    Removed(usize),
    Unchanged,
}

/// Keys that end the search window after the anchor.
pub struct Boundaries<'a> {
    pub id_keys: [&'a str; 2],
}

fn is_boundary(line: &str, bounds: &Boundaries<'_>) -> bool {
    if classify(line) != LineKind::Plain {
        return true;
    }
    match key_of(line) {
        Some("Type") => true,
        Some(key) => bounds.id_keys.contains(&key),
        None => false,
    }
}

/// Existing `key` line in the short window following `anchor`.
pub fn find_in_window(
    doc: &Document,
    anchor: usize,
    key: &str,
    bounds: &Boundaries<'_>,
) -> Option<usize> {
    let last = (anchor + FLAG_WINDOW).min(doc.len().saturating_sub(1));
    for idx in anchor + 1..=last {
        let line = doc.line(idx);
        if is_boundary(line, bounds) {
            return None;
        }
        if key_of(line) == Some(key) {
            return Some(idx);
        }
    }
    None
}

/// Write `key value` next to the anchor, or remove it when `value` is `None`.
pub fn set_flag(
    doc: &Document,
    anchor: usize,
    key: &str,
    value: Option<&str>,
    bounds: &Boundaries<'_>,
) -> (Document, FlagEdit) {
    let existing = find_in_window(doc, anchor, key, bounds);
    match (existing, value) {
        (Some(idx), Some(value)) => {
            let line = doc.line(idx);
            match ScalarLine::parse(line) {
                Some(scalar) if scalar.value == value => (doc.clone(), FlagEdit::Unchanged),
                Some(scalar) => (
                    doc.replace_line(idx, scalar.with_value(value)),
                    FlagEdit::Updated(idx),
                ),
                None => (
                    doc.replace_line(idx, format!("{}{key} {value}", indent_of(line))),
                    FlagEdit::Updated(idx),
                ),
            }
        }
        (Some(idx), None) => (doc.remove_line(idx), FlagEdit::Removed(idx)),
        (None, Some(value)) => {
            let anchor_line = doc.line(anchor);
            let line = match ScalarLine::parse(anchor_line) {
                Some(scalar) => scalar.aligned(key, value),
                None => format!("{}{key} {value}", indent_of(anchor_line)),
            };
            (doc.insert_line(anchor + 1, line), FlagEdit::Inserted(anchor + 1))
        }
        (None, None) => (doc.clone(), FlagEdit::Unchanged),
    }
}

/// Drop every `key` line outside `keep`. Returns the new document and how many went.
pub fn strip_outside(doc: &Document, key: &str, keep: &Block) -> (Document, usize) {
    let mut removed = 0;
    let out = doc.retain(|idx, line| {
        let stray = !keep.contains(idx) && key_of(line) == Some(key);
        if stray {
            removed += 1;
        }
        !stray
    });
    (out, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: Boundaries<'static> = Boundaries {
        id_keys: ["Id.i", "Id.u"],
    };

    fn doc(lines: &[&str]) -> Document {
        Document::parse(&lines.join("\r\n"))
    }

    #[test]
    fn inserts_after_anchor_when_absent() {
        let doc = doc(&["BEGIN A", "    Timer    120", "    Other 1", "END"]);
        let (out, edit) = set_flag(&doc, 1, "AvatarControl", Some("true"), &BOUNDS);
        assert_eq!(edit, FlagEdit::Inserted(2));
        assert_eq!(out.line(2), "    AvatarControl true");
        assert_eq!(out.line(3), "    Other 1");
    }

    #[test]
    fn updates_existing_value_in_place() {
        let doc = doc(&["BEGIN A", "    Timer 1", "    AvatarControl   false  ", "END"]);
        let (out, edit) = set_flag(&doc, 1, "AvatarControl", Some("true"), &BOUNDS);
        assert_eq!(edit, FlagEdit::Updated(2));
        assert_eq!(out.line(2), "    AvatarControl   true  ");
        assert_eq!(out.len(), doc.len());
    }

    #[test]
    fn same_value_is_unchanged() {
        let doc = doc(&["BEGIN A", "    Timer 1", "    AvatarControl true", "END"]);
        let (out, edit) = set_flag(&doc, 1, "AvatarControl", Some("true"), &BOUNDS);
        assert_eq!(edit, FlagEdit::Unchanged);
        assert_eq!(out, doc);
    }

    #[test]
    fn disable_removes_line() {
        let doc = doc(&["BEGIN A", "    Timer 1", "    X 2", "    AvatarControl true", "END"]);
        let (out, edit) = set_flag(&doc, 1, "AvatarControl", None, &BOUNDS);
        assert_eq!(edit, FlagEdit::Removed(3));
        assert_eq!(out.lines(), &["BEGIN A", "    Timer 1", "    X 2", "END"]);
    }

    #[test]
    fn disable_without_flag_is_noop() {
        let doc = doc(&["BEGIN A", "    Timer 1", "END"]);
        let (out, edit) = set_flag(&doc, 1, "AvatarControl", None, &BOUNDS);
        assert_eq!(edit, FlagEdit::Unchanged);
        assert_eq!(out, doc);
    }

    #[test]
    fn window_stops_at_structural_marker() {
        let doc = doc(&[
            "BEGIN A",
            "    Timer 1",
            "    BEGIN Sub",
            "        AvatarControl true",
            "    END",
            "END",
        ]);
        assert_eq!(find_in_window(&doc, 1, "AvatarControl", &BOUNDS), None);
        let doc = doc_with_far_flag();
        assert_eq!(find_in_window(&doc, 1, "AvatarControl", &BOUNDS), None);
    }

    fn doc_with_far_flag() -> Document {
        doc(&[
            "BEGIN A",
            "    Timer 1",
            "    B 1",
            "    C 1",
            "    D 1",
            "    E 1",
            "    F 1",
            "    AvatarControl true",
            "END",
        ])
    }

    #[test]
    fn strays_outside_entity_are_removed() {
        let doc = doc(&[
            "BEGIN Other",
            "    AvatarControl true",
            "END",
            "BEGIN A",
            "    Timer 1",
            "    AvatarControl true",
            "END",
            "AvatarControl false",
        ]);
        let keep = Block {
            name: "A".into(),
            start: 3,
            end: 6,
            depth: 0,
            single_line: false,
        };
        let (out, removed) = strip_outside(&doc, "AvatarControl", &keep);
        assert_eq!(removed, 2);
        assert_eq!(
            out.lines(),
            &[
                "BEGIN Other",
                "END",
                "BEGIN A",
                "    Timer 1",
                "    AvatarControl true",
                "END"
            ]
        );
    }
}
