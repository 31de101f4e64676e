//! Builds output text from the untouched source plus a list of edits, and
//! records where every piece of output came from.
//!
//! Columns in [`Mapping`] are UTF-16 code units, as source maps expect.

use std::cmp::Ordering;

/// Inserts at the same offset are ordered by side first, then by `scope`,
/// then by `seq`. Opening text sorts first so an empty body `{}` still gets
/// its wrapper halves in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Side {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: u32,
    /// Equal to `start` for a pure insertion.
    pub end: u32,
    pub text: String,
    /// Source offset inserted text is attributed to.
    pub anchor: u32,
    pub side: Side,
    pub scope: i64,
    pub seq: i64,
}

impl Edit {
    pub fn insert(at: u32, text: String, anchor: u32, side: Side, scope: i64, seq: i64) -> Self {
        Self {
            start: at,
            end: at,
            text,
            anchor,
            side,
            scope,
            seq,
        }
    }

    pub fn replace(start: u32, end: u32, text: String, anchor: u32) -> Self {
        Self {
            start,
            end,
            text,
            anchor,
            side: Side::Open,
            scope: 0,
            seq: 0,
        }
    }

    fn order(&self, other: &Self) -> Ordering {
        (self.start, self.side, self.scope, self.seq).cmp(&(
            other.start,
            other.side,
            other.scope,
            other.seq,
        ))
    }
}

/// One generated position and the source position it resolves to. All
/// values are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub gen_line: u32,
    pub gen_col: u32,
    pub src_line: u32,
    pub src_col: u32,
}

#[derive(Debug, Clone)]
pub struct Rewritten {
    pub code: String,
    pub mappings: Vec<Mapping>,
}

/// Byte offset to (line, UTF-16 column) lookup.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { line_starts }
    }

    pub fn position(&self, text: &str, offset: usize) -> (u32, u32) {
        let offset = offset.min(text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let col = text
            .get(start..offset)
            .map(|s| s.encode_utf16().count())
            .unwrap_or(0);
        (line as u32, col as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Word,
    Space,
    Punct,
}

fn class_of(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Space
    } else if c.is_alphanumeric() || c == '_' || c == '$' {
        CharClass::Word
    } else {
        CharClass::Punct
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    line: u32,
    col: u32,
}

impl Cursor {
    fn step(&mut self, c: char) {
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += c.len_utf16() as u32;
        }
    }
}

struct Writer<'a> {
    source: &'a str,
    index: LineIndex,
    out: String,
    gen: Cursor,
    src: Cursor,
    mappings: Vec<Mapping>,
}

impl Writer<'_> {
    fn map_here(&mut self, src_line: u32, src_col: u32) {
        let mapping = Mapping {
            gen_line: self.gen.line,
            gen_col: self.gen.col,
            src_line,
            src_col,
        };
        if self.mappings.last().map_or(true, |last| {
            (last.gen_line, last.gen_col) != (mapping.gen_line, mapping.gen_col)
        }) {
            self.mappings.push(mapping);
        }
    }

    /// Copy `source[from..to]` verbatim, mapping each token start.
    fn copy(&mut self, from: usize, to: usize) {
        let source = self.source;
        let Some(segment) = source.get(from..to) else {
            return;
        };
        let mut prev: Option<CharClass> = None;
        for c in segment.chars() {
            let class = class_of(c);
            let boundary = prev != Some(class) || class == CharClass::Punct;
            if boundary && class != CharClass::Space {
                let (line, col) = (self.src.line, self.src.col);
                self.map_here(line, col);
            }
            prev = Some(class);
            self.out.push(c);
            self.gen.step(c);
            self.src.step(c);
        }
    }

    fn skip(&mut self, from: usize, to: usize) {
        if let Some(segment) = self.source.get(from..to) {
            for c in segment.chars() {
                self.src.step(c);
            }
        }
    }

    /// Emit generated text; every non-empty line maps to `anchor`.
    fn insert(&mut self, text: &str, anchor: u32) {
        let (line, col) = self.index.position(self.source, anchor as usize);
        let mut line_start = true;
        for c in text.chars() {
            if line_start && c != '\n' {
                self.map_here(line, col);
                line_start = false;
            }
            self.out.push(c);
            self.gen.step(c);
            if c == '\n' {
                line_start = true;
            }
        }
    }
}

/// Apply `edits` to `source` in one pass. Overlapping replacements keep the
/// first one in order; later ones only contribute their text.
pub fn apply(source: &str, mut edits: Vec<Edit>) -> Rewritten {
    edits.sort_by(Edit::order);

    let extra: usize = edits.iter().map(|e| e.text.len()).sum();
    let mut writer = Writer {
        source,
        index: LineIndex::new(source),
        out: String::with_capacity(source.len() + extra),
        gen: Cursor::default(),
        src: Cursor::default(),
        mappings: Vec::new(),
    };

    let mut cursor = 0usize;
    for edit in &edits {
        let start = (edit.start as usize).max(cursor).min(source.len());
        let end = (edit.end as usize).max(start).min(source.len());
        writer.copy(cursor, start);
        writer.insert(&edit.text, edit.anchor);
        writer.skip(start, end);
        cursor = end;
    }
    writer.copy(cursor, source.len());

    Rewritten {
        code: writer.out,
        mappings: writer.mappings,
    }
}
