use similar::{ChangeTag, TextDiff};

use crate::document::Document;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineSummary {
    pub added: usize,
    pub removed: usize,
}

impl std::fmt::Display for LineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "changed lines: +{} -{}", self.added, self.removed)
    }
}

fn joined(doc: &Document) -> String {
    let mut text = doc.lines().join("\n");
    text.push('\n');
    text
}

pub fn summarize(old: &Document, new: &Document) -> LineSummary {
    let (old, new) = (joined(old), joined(new));
    let diff = TextDiff::from_lines(&old, &new);
    let mut summary = LineSummary::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => summary.added += 1,
            ChangeTag::Delete => summary.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    summary
}

/// Print the changed lines with `context` lines around each hunk.
pub fn print_diff(old: &Document, new: &Document, context: usize) {
    let (old, new) = (joined(old), joined(new));
    let diff = TextDiff::configure()
        .algorithm(similar::Algorithm::Myers)
        .diff_lines(&old, &new);

    for (idx, group) in diff.grouped_ops(context).iter().enumerate() {
        if idx > 0 {
            println!("...");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "- ",
                    ChangeTag::Insert => "+ ",
                    ChangeTag::Equal => "  ",
                };
                print!("{sign}{change}");
            }
        }
    }
}
