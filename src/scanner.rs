use crate::document::Document;
use crate::error::PatchError;

/// Structural role of a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Begin(&'a str),
    /// `BEGIN <Name> ... END` on one line. Never nests.
    SingleLine(&'a str),
    End,
    Plain,
}

pub fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    let mut tokens = trimmed.split_whitespace();
    match tokens.next() {
        Some("BEGIN") => {
            let rest = trimmed["BEGIN".len()..].trim_start();
            let name = block_name(rest);
            let after_name = rest[name.len()..].trim();
            if after_name == "END" || after_name.ends_with(" END") {
                LineKind::SingleLine(name)
            } else {
                LineKind::Begin(name)
            }
        }
        Some("END") => LineKind::End,
        _ => LineKind::Plain,
    }
}

/// Block names are a bare token or a quoted label such as `"[i 5]"`.
fn block_name(rest: &str) -> &str {
    if let Some(tail) = rest.strip_prefix('"') {
        if let Some(close) = tail.find('"') {
            return &rest[..close + 2];
        }
    }
    rest.split_whitespace().next().unwrap_or("")
}

/// A `BEGIN ... END` region. `end` is the index of the `END` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub depth: usize,
    pub single_line: bool,
}

impl Block {
    pub fn contains(&self, idx: usize) -> bool {
        self.start <= idx && idx <= self.end
    }

    /// Lines strictly between the `BEGIN` and `END` lines.
    pub fn body(&self) -> std::ops::Range<usize> {
        if self.single_line {
            self.start..self.start
        } else {
            self.start + 1..self.end
        }
    }
}

/// Every block in the document, ordered by start line.
pub fn scan(doc: &Document) -> Result<Vec<Block>, PatchError> {
    let mut blocks = Vec::new();
    let mut open: Vec<(String, usize)> = Vec::new();

    for (idx, line) in doc.lines().iter().enumerate() {
        match classify(line) {
            LineKind::Begin(name) => open.push((name.to_string(), idx)),
            LineKind::SingleLine(name) => blocks.push(Block {
                name: name.to_string(),
                start: idx,
                end: idx,
                depth: open.len(),
                single_line: true,
            }),
            LineKind::End => {
                let (name, start) = open
                    .pop()
                    .ok_or_else(|| PatchError::malformed(idx, "END without a matching BEGIN"))?;
                blocks.push(Block {
                    name,
                    start,
                    end: idx,
                    depth: open.len(),
                    single_line: false,
                });
            }
            LineKind::Plain => {}
        }
    }

    if let Some((name, start)) = open.first() {
        return Err(PatchError::malformed(
            *start,
            format!("BEGIN {name} is never closed"),
        ));
    }

    blocks.sort_by_key(|block| block.start);
    Ok(blocks)
}

/// Outermost occurrences of `name` in document order. A block nested inside
/// a block of the same name belongs to its parent and is not reported.
pub fn find_named(blocks: &[Block], name: &str) -> Vec<Block> {
    let mut found: Vec<Block> = Vec::new();
    for block in blocks.iter().filter(|block| block.name == name) {
        if found.last().is_some_and(|outer| outer.contains(block.start)) {
            continue;
        }
        found.push(block.clone());
    }
    found
}

/// Innermost multi-line block whose body contains `idx`.
pub fn enclosing(blocks: &[Block], idx: usize) -> Option<&Block> {
    blocks
        .iter()
        .filter(|block| !block.single_line && block.start < idx && idx < block.end)
        .max_by_key(|block| block.depth)
}

/// Direct and nested children of `parent` with the given name, outermost first.
pub fn children_named<'a>(blocks: &'a [Block], parent: &Block, name: &str) -> Vec<&'a Block> {
    blocks
        .iter()
        .filter(|block| {
            block.name == name && block.start > parent.start && block.end < parent.end
        })
        .collect()
}
