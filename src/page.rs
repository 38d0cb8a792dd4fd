//! The page buffer: one full screen of styled character cells.

use std::fmt::{
    self,
    Debug,
    Write as _,
};

use bytes::BufMut;

use crate::codec::{
    self,
    Color,
};

/// Number of display lines.
pub const PAGE_LINES: usize = 14;

/// Number of characters per display line.
pub const PAGE_CHARS_PER_LINE: usize = 24;

/// One styled character cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub color: Color,
    pub small: bool,
}

impl Cell {
    pub const BLANK: Self = Self {
        ch: ' ',
        color: Color::White,
        small: false,
    };

    pub fn is_blank(&self) -> bool {
        self.ch == ' '
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::BLANK
    }
}

/// A full screen worth of cells.
///
/// Created blank, mutated line-by-line or cell-by-cell as aggregated
/// simulator state changes, and serialized to wire bytes on every show.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    cells: [[Cell; PAGE_CHARS_PER_LINE]; PAGE_LINES],
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    pub fn new() -> Self {
        Self {
            cells: [[Cell::BLANK; PAGE_CHARS_PER_LINE]; PAGE_LINES],
        }
    }

    /// Reset every cell to blank.
    pub fn clear(&mut self) {
        self.cells = [[Cell::BLANK; PAGE_CHARS_PER_LINE]; PAGE_LINES];
    }

    pub fn get(&self, line: usize, col: usize) -> Option<Cell> {
        self.cells.get(line)?.get(col).copied()
    }

    /// Raw cell write. Out-of-range coordinates log and do nothing.
    pub fn set(&mut self, line: usize, col: usize, cell: Cell) {
        if line >= PAGE_LINES || col >= PAGE_CHARS_PER_LINE {
            tracing::warn!(line, col, "cell coordinates out of range");
            return;
        }
        self.cells[line][col] = cell;
    }

    /// Write `text` starting at `start_col` of `line`.
    ///
    /// Bounds-checked: a line index outside the page, or text that would
    /// run past the end of the line, leaves the page completely unchanged.
    /// A line is never partially written.
    pub fn write_line(&mut self, line: usize, start_col: usize, text: &str, color: Color, small: bool) {
        if line >= PAGE_LINES {
            tracing::warn!(line, text, "line number out of range");
            return;
        }
        let length = text.chars().count();
        if start_col + length > PAGE_CHARS_PER_LINE {
            tracing::warn!(line, start_col, length, text, "text overflows the line");
            return;
        }
        for (i, ch) in text.chars().enumerate() {
            self.cells[line][start_col + i] = Cell { ch, color, small };
        }
    }

    /// Write `text` centered on `line`, truncating it to the line width.
    ///
    /// The start column is `(width - len) / 2`, so odd-length remainders
    /// lean left.
    pub fn write_centered(&mut self, line: usize, text: &str, color: Color, small: bool) {
        let text: String = text.chars().take(PAGE_CHARS_PER_LINE).collect();
        let start_col = (PAGE_CHARS_PER_LINE - text.chars().count()) / 2;
        self.write_line(line, start_col, &text, color, small);
    }

    /// Merge `other` into `self`: non-blank cells of `self` always win,
    /// blank cells take `other`'s value.
    ///
    /// Used to combine partially-filled variants of the same region, e.g.
    /// the large-font and small-font renditions of a content line.
    pub fn overlay(&mut self, other: &Page) {
        for line in 0..PAGE_LINES {
            for col in 0..PAGE_CHARS_PER_LINE {
                if self.cells[line][col].is_blank() {
                    self.cells[line][col] = other.cells[line][col];
                }
            }
        }
    }

    /// Copy one line of `other` over the same line of `self`.
    pub fn copy_line(&mut self, line: usize, other: &Page) {
        if line >= PAGE_LINES {
            tracing::warn!(line, "line number out of range");
            return;
        }
        self.cells[line] = other.cells[line];
    }

    /// Serialize row-major into `buffer`; each cell emits its codec bytes.
    ///
    /// The total length varies with special-glyph expansion.
    pub fn encode<B: BufMut>(&self, mut buffer: B) {
        for line in &self.cells {
            for cell in line {
                codec::encode_cell(cell, &mut buffer);
            }
        }
    }

    /// The characters of one line, without styling.
    pub fn line_text(&self, line: usize) -> String {
        self.cells
            .get(line)
            .map(|cells| cells.iter().map(|cell| cell.ch).collect())
            .unwrap_or_default()
    }

    /// Character-based mock-up of the page, for logs and tests.
    pub fn to_terminal_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "|{}|", "-".repeat(PAGE_CHARS_PER_LINE));
        for line in 0..PAGE_LINES {
            let _ = writeln!(out, "|{}|", self.line_text(line));
        }
        let _ = writeln!(out, "|{}|", "-".repeat(PAGE_CHARS_PER_LINE));
        out
    }
}

impl Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_terminal_string())
    }
}
