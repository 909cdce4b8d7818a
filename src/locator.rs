use crate::config::Vocabulary;
use crate::document::{Document, key_of, value_for};
use crate::error::PatchError;
use crate::scanner::{self, Block};

/// What the patch needs to know about the anchor entity. Valid only for the
/// document it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityContext {
    pub block: Block,
    pub type_line: usize,
    pub id_i: i64,
    pub id_u: i64,
    pub anchor_line: usize,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub x_line: Option<usize>,
    pub y_line: Option<usize>,
}

/// Index of the first `Type <entity_type>` line, if any.
pub fn find_type_marker(doc: &Document, entity_type: &str, from: usize) -> Option<usize> {
    doc.lines()
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, line)| is_type_marker(line, entity_type))
        .map(|(idx, _)| idx)
}

fn is_type_marker(line: &str, entity_type: &str) -> bool {
    let mut tokens = line.split_whitespace();
    tokens.next() == Some("Type") && tokens.next() == Some(entity_type)
}

/// First line in `range` whose key is `key`, parsed as `T`.
fn first_value<T: std::str::FromStr>(
    doc: &Document,
    range: std::ops::Range<usize>,
    key: &str,
) -> Option<(usize, Option<T>)> {
    range
        .into_iter()
        .find(|idx| key_of(doc.line(*idx)) == Some(key))
        .map(|idx| (idx, value_for(doc.line(idx), key).and_then(|v| v.parse().ok())))
}

pub fn read_position(doc: &Document, block: &Block, vocab: &Vocabulary) -> Position {
    let x = first_value::<f64>(doc, block.body(), &vocab.pos_x_key);
    let y = first_value::<f64>(doc, block.body(), &vocab.pos_y_key);
    Position {
        x: x.and_then(|(_, value)| value),
        y: y.and_then(|(_, value)| value),
        x_line: x.map(|(idx, _)| idx),
        y_line: y.map(|(idx, _)| idx),
    }
}

/// Locate the anchor entity and the fields hanging off it.
#[cfg(test)]
pub fn locate(doc: &Document, vocab: &Vocabulary) -> Result<EntityContext, PatchError> {
    let blocks = scanner::scan(doc)?;
    locate_in(doc, &blocks, vocab)
}

pub fn locate_in(
    doc: &Document,
    blocks: &[Block],
    vocab: &Vocabulary,
) -> Result<EntityContext, PatchError> {
    let entity = &vocab.entity_type;
    let type_line = find_type_marker(doc, entity, 0)
        .ok_or_else(|| PatchError::EntityNotFound(entity.clone()))?;
    let block = scanner::enclosing(blocks, type_line)
        .cloned()
        .ok_or_else(|| PatchError::EnclosingBlockMissing {
            entity: entity.clone(),
            line: type_line + 1,
        })?;

    let id_i = first_value::<i64>(doc, block.body(), &vocab.id_i_key).and_then(|(_, v)| v);
    let id_u = first_value::<i64>(doc, block.body(), &vocab.id_u_key).and_then(|(_, v)| v);
    let (id_i, id_u) = match (id_i, id_u) {
        (Some(i), Some(u)) => (i, u),
        (i, u) => {
            let missing = [(i.is_none(), &vocab.id_i_key), (u.is_none(), &vocab.id_u_key)]
                .into_iter()
                .filter(|(absent, _)| *absent)
                .map(|(_, key)| key.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PatchError::IdentifiersMissing {
                entity: entity.clone(),
                missing,
            });
        }
    };

    let anchor_line = (type_line + 1..block.end)
        .find(|idx| key_of(doc.line(*idx)) == Some(vocab.anchor_key.as_str()))
        .ok_or_else(|| PatchError::AnchorMissing {
            entity: entity.clone(),
            key: vocab.anchor_key.clone(),
        })?;

    let position = read_position(doc, &block, vocab);
    Ok(EntityContext {
        block,
        type_line,
        id_i,
        id_u,
        anchor_line,
        position,
    })
}
