use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::PatchError;

const UTF8_BOM: &str = "\u{FEFF}";

static SCALAR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(\S+)(\s+)(\S+)(.*)$").expect("scalar line pattern"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

/// The ending used for lines the patch writes. CRLF wins ties, including
/// documents without any line break.
fn dominant_ending(endings: &[LineEnding]) -> LineEnding {
    let crlf = endings.iter().filter(|e| **e == LineEnding::Crlf).count();
    if crlf * 2 >= endings.len() {
        LineEnding::Crlf
    } else {
        LineEnding::Lf
    }
}

/// A save document as an ordered list of lines. Every edit returns a new document.
///
/// Each line keeps the terminator it was read with, so untouched lines render
/// byte for byte. Lines added by an edit use the dominant ending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
    endings: Vec<LineEnding>,
    line_ending: LineEnding,
    trailing_newline: bool,
    bom: bool,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let (bom, body) = match text.strip_prefix(UTF8_BOM) {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let mut lines = Vec::new();
        let mut endings = Vec::new();
        for piece in body.split_inclusive('\n') {
            if let Some(line) = piece.strip_suffix("\r\n") {
                lines.push(line.to_string());
                endings.push(LineEnding::Crlf);
            } else if let Some(line) = piece.strip_suffix('\n') {
                lines.push(line.to_string());
                endings.push(LineEnding::Lf);
            } else {
                lines.push(piece.to_string());
            }
        }
        let trailing_newline = body.ends_with('\n');
        let line_ending = dominant_ending(&endings);
        // The unterminated last line renders with the dominant ending if
        // something is appended after it.
        endings.resize(lines.len(), line_ending);
        Self {
            lines,
            endings,
            line_ending,
            trailing_newline,
            bom,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PatchError> {
        let text = std::str::from_utf8(bytes).map_err(|_| PatchError::InvalidUtf8)?;
        Ok(Self::parse(text))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.bom {
            out.push_str(UTF8_BOM);
        }
        let last = self.lines.len().saturating_sub(1);
        for (idx, (line, ending)) in self.lines.iter().zip(&self.endings).enumerate() {
            out.push_str(line);
            if idx < last || self.trailing_newline {
                out.push_str(ending.as_str());
            }
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line(&self, idx: usize) -> &str {
        &self.lines[idx]
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[cfg(test)]
    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Replace the lines in `range` (end exclusive) with `replacement`.
    pub fn splice(&self, range: Range<usize>, replacement: Vec<String>) -> Self {
        let mut out = self.clone();
        let added = replacement.len();
        out.lines.splice(range.clone(), replacement);
        out.endings.splice(range, std::iter::repeat_n(self.line_ending, added));
        out
    }

    pub fn insert_line(&self, idx: usize, line: String) -> Self {
        self.splice(idx..idx, vec![line])
    }

    pub fn remove_line(&self, idx: usize) -> Self {
        self.splice(idx..idx + 1, Vec::new())
    }

    /// Swap the text of one line, keeping its terminator.
    pub fn replace_line(&self, idx: usize, line: String) -> Self {
        let mut out = self.clone();
        out.lines[idx] = line;
        out
    }

    /// Keep only the lines for which `keep(index, line)` holds.
    pub fn retain(&self, mut keep: impl FnMut(usize, &str) -> bool) -> Self {
        let mut out = self.clone();
        let (lines, endings): (Vec<String>, Vec<LineEnding>) = self
            .lines
            .iter()
            .zip(&self.endings)
            .enumerate()
            .filter(|(idx, (line, _))| keep(*idx, line.as_str()))
            .map(|(_, (line, ending))| (line.clone(), *ending))
            .unzip();
        out.lines = lines;
        out.endings = endings;
        out
    }

    /// Drop trailing blank lines and trailing whitespace, then append `block`.
    pub fn append_block(&self, block: Vec<String>) -> Self {
        let mut out = self.clone();
        while out.lines.last().is_some_and(|line| line.trim().is_empty()) {
            out.lines.pop();
            out.endings.pop();
        }
        if let Some(last) = out.lines.last_mut() {
            let keep = last.trim_end().len();
            last.truncate(keep);
        }
        out.endings.extend(std::iter::repeat_n(self.line_ending, block.len()));
        out.lines.extend(block);
        out.trailing_newline = true;
        out
    }
}

/// First whitespace-delimited token of a line.
pub fn key_of(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

pub fn indent_of(line: &str) -> &str {
    let body = line.trim_start();
    &line[..line.len() - body.len()]
}

/// A `<indent><key><gap><value><rest>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarLine<'a> {
    pub indent: &'a str,
    pub key: &'a str,
    pub gap: &'a str,
    pub value: &'a str,
    pub rest: &'a str,
}

impl<'a> ScalarLine<'a> {
    pub fn parse(line: &'a str) -> Option<Self> {
        let caps = SCALAR_LINE.captures(line)?;
        let get = |idx| caps.get(idx).map(|m| m.as_str()).unwrap_or("");
        Some(Self {
            indent: get(1),
            key: get(2),
            gap: get(3),
            value: get(4),
            rest: get(5),
        })
    }

    /// The same line with only the value token swapped.
    pub fn with_value(&self, value: &str) -> String {
        format!(
            "{}{}{}{}{}",
            self.indent, self.key, self.gap, value, self.rest
        )
    }

    pub fn value_column(&self) -> usize {
        self.indent.chars().count() + self.key.chars().count() + self.gap.chars().count()
    }

    /// Build a new `key value` line that lines up with this one.
    pub fn aligned(&self, key: &str, value: &str) -> String {
        let used = self.indent.chars().count() + key.chars().count();
        let pad = self.value_column().saturating_sub(used).max(1);
        format!("{}{key}{}{value}", self.indent, " ".repeat(pad))
    }
}

/// Value of a `key value` line when the key matches exactly.
pub fn value_for<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    ScalarLine::parse(line)
        .filter(|scalar| scalar.key == key)
        .map(|scalar| scalar.value)
}
