//! Character display surface.
//!
//! The controller never touches pixels. It writes text into a 4 x 16 cell
//! surface through [`TextDisplay`]; the board layer decides how the cells
//! reach the panel. [`FrameBuffer`] is the in-memory surface used by the
//! firmware: it keeps the cell contents and remembers which rows changed so
//! only those are flushed.

/// Visible text rows.
pub const ROWS: usize = 4;

/// Characters per row.
pub const COLS: usize = 16;

/// A row/column addressable text surface, origin top-left, zero based.
///
/// Text running past the last column is clipped; writes to rows outside the
/// surface are ignored.
pub trait TextDisplay {
    /// Blanks every cell.
    fn clear(&mut self);

    /// Writes `text` starting at `row`, `col`.
    fn write_str(&mut self, row: usize, col: usize, text: &str);

    /// Writes one character at `row`, `col`.
    fn write_char(&mut self, row: usize, col: usize, c: char) {
        let mut buf = [0u8; 4];
        self.write_str(row, col, c.encode_utf8(&mut buf));
    }
}

/// In-memory 4 x 16 ASCII frame with per-row dirty tracking.
///
/// Non-ASCII characters are stored as `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    cells: [[u8; COLS]; ROWS],
    dirty: u8,
    clears: u32,
}

impl FrameBuffer {
    /// Blank frame with every row dirty, so the first flush paints the panel.
    pub const fn new() -> Self {
        Self {
            cells: [[b' '; COLS]; ROWS],
            dirty: (1 << ROWS) - 1,
            clears: 0,
        }
    }

    /// Text of one row. Rows outside the surface read as empty.
    pub fn row(&self, row: usize) -> &str {
        match self.cells.get(row) {
            // Cells only ever hold ASCII.
            Some(cells) => core::str::from_utf8(cells).unwrap_or(""),
            None => "",
        }
    }

    /// Character at a cell, `None` outside the surface.
    pub fn char_at(&self, row: usize, col: usize) -> Option<char> {
        self.cells.get(row)?.get(col).map(|&b| b as char)
    }

    /// Calls `flush` with every row changed since the last call, then marks
    /// all rows clean.
    pub fn flush_dirty(&mut self, mut flush: impl FnMut(usize, &str)) {
        for row in 0..ROWS {
            if self.dirty & (1 << row) != 0 {
                flush(row, self.row(row));
            }
        }
        self.dirty = 0;
    }

    /// Whether any row changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty != 0
    }

    /// Number of full clears so far.
    pub fn clear_count(&self) -> u32 {
        self.clears
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDisplay for FrameBuffer {
    fn clear(&mut self) {
        self.cells = [[b' '; COLS]; ROWS];
        self.dirty = (1 << ROWS) - 1;
        self.clears += 1;
    }

    fn write_str(&mut self, row: usize, col: usize, text: &str) {
        let Some(cells) = self.cells.get_mut(row) else {
            return;
        };
        let mut changed = false;
        for (cell, c) in cells.iter_mut().skip(col).zip(text.chars()) {
            let byte = if c.is_ascii() { c as u8 } else { b'?' };
            if *cell != byte {
                *cell = byte;
                changed = true;
            }
        }
        if changed {
            self.dirty |= 1 << row;
        }
    }
}
