use crate::config::Vocabulary;
use crate::document::{Document, ScalarLine, indent_of};
use crate::locator::{EntityContext, Position, find_type_marker, read_position};
use crate::scanner::{self, Block};

#[derive(Debug, Clone, PartialEq)]
pub enum Relocation {
    Valid,
    Relocated { to: (f64, f64), landmark_line: usize },
    NoLandmark,
}

fn component_ok(value: Option<f64>, bound: f64) -> bool {
    value.is_some_and(|v| !v.is_nan() && v.abs() <= bound)
}

pub fn is_valid(pos: &Position, bound: f64) -> bool {
    component_ok(pos.x, bound) && component_ok(pos.y, bound)
}

/// Position of the first landmark entity outside `exclude` with sane coordinates.
pub fn find_landmark(
    doc: &Document,
    blocks: &[Block],
    vocab: &Vocabulary,
    exclude: &Block,
) -> Option<(usize, f64, f64)> {
    let mut from = 0;
    while let Some(line) = find_type_marker(doc, &vocab.landmark_type, from) {
        from = line + 1;
        let Some(block) = scanner::enclosing(blocks, line) else {
            continue;
        };
        if exclude.contains(block.start) {
            continue;
        }
        let pos = read_position(doc, block, vocab);
        if let (true, Some(x), Some(y)) = (is_valid(&pos, vocab.position_bound), pos.x, pos.y) {
            return Some((line, x, y));
        }
    }
    None
}

fn format_coord(value: f64) -> String {
    format!("{value:.5}")
}

/// Check the entity's coordinates and move it beside a landmark when they are unusable.
pub fn validate_and_relocate(
    doc: &Document,
    blocks: &[Block],
    ctx: &EntityContext,
    vocab: &Vocabulary,
) -> (Document, Relocation) {
    if is_valid(&ctx.position, vocab.position_bound) {
        return (doc.clone(), Relocation::Valid);
    }
    let Some((landmark_line, lx, ly)) = find_landmark(doc, blocks, vocab, &ctx.block) else {
        return (doc.clone(), Relocation::NoLandmark);
    };
    let to = (lx + vocab.landmark_offset.0, ly + vocab.landmark_offset.1);

    let mut out = doc.clone();
    let mut missing = Vec::new();
    for (line, key, value) in [
        (ctx.position.x_line, &vocab.pos_x_key, to.0),
        (ctx.position.y_line, &vocab.pos_y_key, to.1),
    ] {
        let text = format_coord(value);
        let rewritten = line.and_then(|idx| {
            ScalarLine::parse(out.line(idx)).map(|scalar| (idx, scalar.with_value(&text)))
        });
        match rewritten {
            Some((idx, updated)) => out = out.replace_line(idx, updated),
            None => {
                if let Some(idx) = line {
                    let line = format!("{}{key} {text}", indent_of(out.line(idx)));
                    out = out.replace_line(idx, line);
                } else {
                    missing.push((key, text));
                }
            }
        }
    }

    let type_line = out.line(ctx.type_line).to_string();
    let template = ScalarLine::parse(&type_line);
    let mut landmark_line = landmark_line;
    if landmark_line > ctx.type_line {
        landmark_line += missing.len();
    }
    for (offset, (key, text)) in missing.into_iter().enumerate() {
        let line = match &template {
            Some(scalar) => scalar.aligned(key, &text),
            None => format!("{}{key} {text}", indent_of(&type_line)),
        };
        out = out.insert_line(ctx.type_line + 1 + offset, line);
    }

    (out, Relocation::Relocated { to, landmark_line })
}
