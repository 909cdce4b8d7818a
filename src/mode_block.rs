//! Normalization of the named mode block.
//!
//! All occurrences of the block collapse into one canonical copy placed where
//! the first occurrence was (or appended when there is none). Disabling is the
//! exception: it rewrites only the activation flag line of the first
//! occurrence and leaves every other byte alone.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Profile, Variant, Vocabulary};
use crate::document::{Document, ScalarLine, indent_of, key_of, value_for};
use crate::scanner::{self, Block};

const FIELD_INDENT: &str = "    ";

static INLINE_TRUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+\s+)true\b").expect("inline flag pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    Appended,
    Replaced { collapsed: usize },
    FlagFlipped,
    Unchanged,
}

pub struct ModeRequest<'a> {
    pub enable: bool,
    pub profile: Profile,
    pub ids: (i64, i64),
    pub variants: &'a [Variant],
    pub vocab: &'a Vocabulary,
}

impl ModeRequest<'_> {
    fn rewrites(&self) -> bool {
        self.enable || self.profile.forces_rewrite()
    }
}

pub fn normalize(
    doc: &Document,
    blocks: &[Block],
    req: &ModeRequest<'_>,
) -> (Document, BlockAction) {
    let occurrences = scanner::find_named(blocks, &req.vocab.mode_block);
    let Some(first) = occurrences.first() else {
        if !req.rewrites() {
            return (doc.clone(), BlockAction::Unchanged);
        }
        let block = synthesize(req, "", None, None);
        return (doc.append_block(block), BlockAction::Appended);
    };

    if !req.rewrites() {
        return match flip_flag_off(doc, first, &req.vocab.active_key) {
            Some(out) => (out, BlockAction::FlagFlipped),
            None => (doc.clone(), BlockAction::Unchanged),
        };
    }

    let inventory = extract_sub_block(doc, blocks, first, &req.vocab.inventory_block);
    let permadeath = existing_field(doc, first, &req.vocab.permadeath_key);
    let indent = indent_of(doc.line(first.start)).to_string();
    let canonical = synthesize(req, &indent, inventory, permadeath.as_deref());

    let mut out = doc.clone();
    for duplicate in occurrences.iter().skip(1).rev() {
        out = out.splice(duplicate.start..duplicate.end + 1, Vec::new());
    }
    out = out.splice(first.start..first.end + 1, canonical);

    let collapsed = occurrences.len() - 1;
    if out == *doc {
        (out, BlockAction::Unchanged)
    } else {
        (out, BlockAction::Replaced { collapsed })
    }
}

/// Rewrite `<key> true` to `<key> false` on the first flag line of `block`.
/// `None` when there is no such line or it is not currently true.
fn flip_flag_off(doc: &Document, block: &Block, key: &str) -> Option<Document> {
    if block.single_line {
        let line = doc.line(block.start);
        let pos = find_inline_key(line, key)?;
        let (head, tail) = line.split_at(pos);
        let caps = INLINE_TRUE.captures(tail)?;
        let flipped = format!("{head}{}false{}", &caps[1], &tail[caps[0].len()..]);
        return Some(doc.replace_line(block.start, flipped));
    }

    let idx = block
        .body()
        .find(|idx| key_of(doc.line(*idx)) == Some(key))?;
    let scalar = ScalarLine::parse(doc.line(idx))?;
    if scalar.value != "true" {
        return None;
    }
    Some(doc.replace_line(idx, scalar.with_value("false")))
}

fn find_inline_key(line: &str, key: &str) -> Option<usize> {
    let mut offset = 0;
    for token in line.split_whitespace() {
        let pos = line[offset..].find(token)? + offset;
        if token == key {
            return Some(pos);
        }
        offset = pos + token.len();
    }
    None
}

/// Verbatim lines of the first `name` sub-block inside `parent`.
fn extract_sub_block(
    doc: &Document,
    blocks: &[Block],
    parent: &Block,
    name: &str,
) -> Option<Vec<String>> {
    let child = scanner::children_named(blocks, parent, name).into_iter().next()?;
    Some(doc.lines()[child.start..=child.end].to_vec())
}

fn existing_field(doc: &Document, block: &Block, key: &str) -> Option<String> {
    block
        .body()
        .find_map(|idx| value_for(doc.line(idx), key))
        .map(str::to_string)
}

/// Canonical block text for the requested profile.
fn synthesize(
    req: &ModeRequest<'_>,
    indent: &str,
    inventory: Option<Vec<String>>,
    permadeath: Option<&str>,
) -> Vec<String> {
    let vocab = req.vocab;
    let field = |key: &str, value: &str| format!("{indent}{FIELD_INDENT}{key} {value}");
    let active = if req.enable { "true" } else { "false" };

    let mut lines = vec![
        format!("{indent}BEGIN {}", vocab.mode_block),
        field(&vocab.active_key, active),
        field(&vocab.mode_id_i_key, &req.ids.0.to_string()),
        field(&vocab.mode_id_u_key, &req.ids.1.to_string()),
    ];

    if req.profile.includes_view() {
        lines.push(field(&vocab.view_key, "true"));
        lines.push(format!("{indent}{FIELD_INDENT}BEGIN {}", vocab.roster_block));
        lines.push(format!("{indent}{FIELD_INDENT}END"));
    }

    // A carried-over inventory is player data and survives every profile.
    match inventory {
        Some(preserved) => lines.extend(preserved),
        None if req.profile.includes_inventory() => {
            let inner = format!("{indent}{FIELD_INDENT}");
            lines.push(format!("{inner}BEGIN {}", vocab.inventory_block));
            lines.push(format!("{inner}{FIELD_INDENT}Size 0"));
            lines.push(format!("{inner}END"));
        }
        None => {}
    }

    if let Some(value) = permadeath {
        lines.push(field(&vocab.permadeath_key, value));
    }
    lines.push(format!("{indent}END"));

    for variant in req.variants {
        match variant {
            Variant::Permadeath => force_field(&mut lines, indent, &vocab.permadeath_key, "true"),
            Variant::FreeCamera => force_field(&mut lines, indent, &vocab.view_key, "false"),
            Variant::DormantAvatar => {}
        }
    }
    lines
}

/// Set a top-level field of a synthesized block, adding it before `END` if absent.
fn force_field(lines: &mut Vec<String>, indent: &str, key: &str, value: &str) {
    let field_indent = format!("{indent}{FIELD_INDENT}");
    let existing = lines.iter().position(|line| {
        indent_of(line) == field_indent && key_of(line) == Some(key)
    });
    let rewritten = existing.and_then(|idx| {
        ScalarLine::parse(&lines[idx]).map(|scalar| (idx, scalar.with_value(value)))
    });
    match rewritten {
        Some((idx, updated)) => lines[idx] = updated,
        None => {
            let end = lines.len() - 1;
            lines.insert(end, format!("{field_indent}{key} {value}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(lines: &[&str]) -> Document {
        Document::parse(&(lines.join("\r\n") + "\r\n"))
    }

    fn run(
        doc: &Document,
        enable: bool,
        profile: Profile,
        variants: &[Variant],
    ) -> (Document, BlockAction) {
        let vocab = Vocabulary::default();
        let blocks = scanner::scan(doc).expect("scan");
        let req = ModeRequest {
            enable,
            profile,
            ids: (5, 9),
            variants,
            vocab: &vocab,
        };
        normalize(doc, &blocks, &req)
    }

    #[test]
    fn appends_compat_block_when_missing() {
        let doc = doc(&["Version 1"]);
        let (out, action) = run(&doc, true, Profile::Compat, &[]);
        assert_eq!(action, BlockAction::Appended);
        assert_eq!(
            out.lines(),
            &[
                "Version 1",
                "BEGIN WardenMode",
                "    IsActive true",
                "    WardenId.i 5",
                "    WardenId.u 9",
                "    CameraFollow true",
                "    BEGIN Roster",
                "    END",
                "END",
            ]
        );
    }

    #[test]
    fn minimal_profile_has_only_flag_and_ids() {
        let doc = doc(&["Version 1"]);
        let (out, _) = run(&doc, true, Profile::Minimal, &[]);
        assert_eq!(out.len(), 6);
        assert!(!out.lines().iter().any(|l| l.contains("CameraFollow")));
    }

    #[test]
    fn disable_flips_only_the_flag_line() {
        let doc = doc(&[
            "Version 1",
            "BEGIN WardenMode",
            "    IsActive     true  ",
            "    WardenId.i 1",
            "    WardenId.u 2",
            "    Custom thing",
            "END",
        ]);
        let (out, action) = run(&doc, false, Profile::Full, &[]);
        assert_eq!(action, BlockAction::FlagFlipped);
        let changed: Vec<_> = doc
            .lines()
            .iter()
            .zip(out.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(out.line(2), "    IsActive     false  ");
    }

    #[test]
    fn disable_is_idempotent() {
        let doc = doc(&["BEGIN WardenMode", "    IsActive true", "END"]);
        let (once, _) = run(&doc, false, Profile::Compat, &[]);
        let (twice, action) = run(&once, false, Profile::Compat, &[]);
        assert_eq!(action, BlockAction::Unchanged);
        assert_eq!(once.render(), twice.render());
    }

    #[test]
    fn disable_without_block_changes_nothing() {
        let doc = doc(&["Version 1"]);
        let (out, action) = run(&doc, false, Profile::Compat, &[]);
        assert_eq!(action, BlockAction::Unchanged);
        assert_eq!(out, doc);
    }

    #[test]
    fn disable_flips_single_line_block() {
        let doc = doc(&["BEGIN WardenMode IsActive true WardenId.i 5 END"]);
        let (out, action) = run(&doc, false, Profile::Compat, &[]);
        assert_eq!(action, BlockAction::FlagFlipped);
        assert_eq!(out.line(0), "BEGIN WardenMode IsActive false WardenId.i 5 END");
    }

    #[test]
    fn clean_collapses_duplicates() {
        let doc = doc(&[
            "BEGIN WardenMode",
            "    IsActive true",
            "END",
            "Middle 1",
            "BEGIN WardenMode",
            "    IsActive false",
            "END",
            "BEGIN WardenMode",
            "END",
        ]);
        let (out, action) = run(&doc, false, Profile::Clean, &[]);
        assert_eq!(action, BlockAction::Replaced { collapsed: 2 });
        let blocks = scanner::scan(&out).expect("scan");
        assert_eq!(scanner::find_named(&blocks, "WardenMode").len(), 1);
        assert!(out.lines().iter().any(|l| l == "    IsActive false"));
        assert!(out.lines().iter().any(|l| l == "Middle 1"));
    }

    #[test]
    fn full_profile_preserves_inventory() {
        let doc = doc(&[
            "BEGIN WardenMode",
            "    IsActive false",
            "    BEGIN Inventory",
            "        Size 2",
            "        BEGIN \"[i 0]\" Item Baton END",
            "    END",
            "END",
        ]);
        let (out, action) = run(&doc, true, Profile::Full, &[]);
        assert_eq!(action, BlockAction::Replaced { collapsed: 0 });
        let text = out.render();
        assert!(text.contains("        Size 2\r\n"));
        assert!(text.contains("Item Baton"));
        assert!(!text.contains("Size 0"));
        assert!(text.contains("    IsActive true\r\n"));
    }

    #[test]
    fn compat_enable_keeps_existing_inventory() {
        let doc = doc(&[
            "BEGIN WardenMode",
            "    IsActive false",
            "    BEGIN Inventory",
            "        Size 2",
            "    END",
            "END",
        ]);
        let (out, action) = run(&doc, true, Profile::Compat, &[]);
        assert_eq!(action, BlockAction::Replaced { collapsed: 0 });
        let text = out.render();
        assert!(text.contains("    BEGIN Inventory\r\n        Size 2\r\n    END\r\n"));
        assert!(text.contains("    IsActive true\r\n"));

        let (minimal, _) = run(&doc, true, Profile::Minimal, &[]);
        assert!(minimal.lines().iter().any(|l| l == "        Size 2"));
    }

    #[test]
    fn compat_enable_adds_no_default_inventory() {
        let doc = doc(&["Version 1"]);
        let (out, _) = run(&doc, true, Profile::Compat, &[]);
        assert!(!out.lines().iter().any(|l| l.contains("Inventory")));
    }

    #[test]
    fn full_profile_defaults_inventory() {
        let doc = doc(&["Version 1"]);
        let (out, _) = run(&doc, true, Profile::Full, &[]);
        assert!(out.lines().iter().any(|l| l == "        Size 0"));
    }

    #[test]
    fn enable_is_stable_on_rerun() {
        let doc = doc(&["Version 1"]);
        let (once, _) = run(&doc, true, Profile::Compat, &[]);
        let (twice, action) = run(&once, true, Profile::Compat, &[]);
        assert_eq!(action, BlockAction::Unchanged);
        assert_eq!(once, twice);
    }

    #[test]
    fn variants_pin_fields() {
        let doc = doc(&["Version 1"]);
        let (out, _) = run(
            &doc,
            true,
            Profile::Minimal,
            &[Variant::Permadeath, Variant::FreeCamera],
        );
        assert!(out.lines().iter().any(|l| l == "    Permadeath true"));
        assert!(out.lines().iter().any(|l| l == "    CameraFollow false"));
        assert_eq!(out.lines().last().map(String::as_str), Some("END"));
    }

    #[test]
    fn existing_permadeath_survives_rewrite() {
        let doc = doc(&[
            "BEGIN WardenMode",
            "    IsActive false",
            "    Permadeath true",
            "END",
        ]);
        let (out, _) = run(&doc, true, Profile::Compat, &[]);
        assert!(out.lines().iter().any(|l| l == "    Permadeath true"));
    }
}
