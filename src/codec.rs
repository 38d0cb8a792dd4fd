//! Cell style and glyph encoding for the MCDU character display.
//!
//! Every cell on the wire is two style bytes (a little-endian `u16`
//! selecting color and font size) followed by the character itself: one
//! byte for printable ASCII, or a multi-byte UTF-8 sequence for the fixed
//! set of special glyphs the firmware understands.
//!
//! The style masks and the glyph table differ between device firmware
//! revisions; the tables below are the ones for the revision this crate
//! targets (see DESIGN.md). A blank white large-font cell encodes as
//! `42 00 20`.

use bytes::{
    Buf,
    BufMut,
};

use crate::page::Cell;

/// Added to a color mask to select the small font.
pub const SMALL_FONT_OFFSET: u16 = 0x016B;

/// Display colors understood by the device.
///
/// Wire masks are spaced `0x21` apart, starting at [`Color::Amber`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Amber,
    #[default]
    White,
    Cyan,
    Green,
    Magenta,
    Red,
    Yellow,
    Brown,
    Grey,
    Khaki,
}

impl Color {
    const MASKS: [(Color, u16); 10] = [
        (Color::Amber, 0x0021),
        (Color::White, 0x0042),
        (Color::Cyan, 0x0063),
        (Color::Green, 0x0084),
        (Color::Magenta, 0x00A5),
        (Color::Red, 0x00C6),
        (Color::Yellow, 0x00E7),
        (Color::Brown, 0x0108),
        (Color::Grey, 0x0129),
        (Color::Khaki, 0x014A),
    ];

    pub fn mask(self) -> u16 {
        Self::MASKS
            .iter()
            .find(|(color, _)| *color == self)
            .map(|(_, mask)| *mask)
            .unwrap_or(0x0042)
    }

    pub fn from_mask(mask: u16) -> Option<Self> {
        Self::MASKS
            .iter()
            .find(|(_, m)| *m == mask)
            .map(|(color, _)| *color)
    }
}

/// Special glyphs the firmware renders from multi-byte sequences.
///
/// Everything outside this table must be printable ASCII.
pub const SPECIAL_GLYPHS: [(char, &[u8]); 12] = [
    ('°', &[0xC2, 0xB0]),
    ('←', &[0xE2, 0x86, 0x90]),
    ('↑', &[0xE2, 0x86, 0x91]),
    ('→', &[0xE2, 0x86, 0x92]),
    ('↓', &[0xE2, 0x86, 0x93]),
    ('☐', &[0xE2, 0x98, 0x90]),
    ('Δ', &[0xCE, 0x94]),
    ('⬡', &[0xE2, 0xAC, 0xA1]),
    ('◀', &[0xE2, 0x97, 0x80]),
    ('▶', &[0xE2, 0x96, 0xB6]),
    ('[', &[0x5B]),
    (']', &[0x5D]),
];

/// Style word for a (color, font size) pair.
pub fn style_word(color: Color, small: bool) -> u16 {
    let mask = color.mask();
    if small { mask + SMALL_FONT_OFFSET } else { mask }
}

/// Exact inverse of [`style_word`], for the reverse/test path.
///
/// The large-font masks top out below `SMALL_FONT_OFFSET + 0x21`, so the
/// two ranges never overlap.
pub fn decode_style(word: u16) -> Option<(Color, bool)> {
    if let Some(color) = Color::from_mask(word) {
        Some((color, false))
    }
    else if let Some(color) = Color::from_mask(word.checked_sub(SMALL_FONT_OFFSET)?) {
        Some((color, true))
    }
    else {
        None
    }
}

/// Whether the codec can emit this character without substitution.
pub fn is_encodable(ch: char) -> bool {
    (' '..='~').contains(&ch) || SPECIAL_GLYPHS.iter().any(|(glyph, _)| *glyph == ch)
}

/// Encode one cell: 2 style bytes, then 1..=3 character bytes.
///
/// A character outside the ASCII-printable range and the glyph table is an
/// encoding error for that cell only; a space is substituted and the rest
/// of the page keeps encoding.
pub fn encode_cell<B: BufMut>(cell: &Cell, mut buffer: B) {
    buffer.put_u16_le(style_word(cell.color, cell.small));

    if (' '..='~').contains(&cell.ch) {
        buffer.put_u8(cell.ch as u8);
        return;
    }
    if let Some((_, bytes)) = SPECIAL_GLYPHS.iter().find(|(glyph, _)| *glyph == cell.ch) {
        buffer.put_slice(bytes);
        return;
    }

    tracing::error!(
        character = %cell.ch.escape_unicode(),
        "character not encodable, substituting a space"
    );
    buffer.put_u8(b' ');
}

/// Decode one cell from the wire.
///
/// Only needed by the reverse/test path; returns `None` on an unknown
/// style word or a malformed character sequence.
pub fn decode_cell<B: Buf>(mut buffer: B) -> Option<Cell> {
    if buffer.remaining() < 3 {
        return None;
    }
    let (color, small) = decode_style(buffer.get_u16_le())?;

    let first = buffer.get_u8();
    let extra = match first {
        0x00..=0x7F => 0,
        0xC0..=0xDF => 1,
        0xE0..=0xEF => 2,
        _ => return None,
    };
    let mut raw = vec![first];
    if buffer.remaining() < extra {
        return None;
    }
    for _ in 0..extra {
        raw.push(buffer.get_u8());
    }
    let ch = std::str::from_utf8(&raw).ok()?.chars().next()?;

    Some(Cell { ch, color, small })
}
