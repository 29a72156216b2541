//! BMS (Basic Mapping Support) map definitions.
//!
//! A map is an ordered list of named fields plus a symbolic record buffer.
//! Each field owns three consecutive slots in that buffer:
//! - Length: 2 bytes, big-endian signed; `-1` asks for the cursor
//! - Attribute: 1 byte, a 3270 attribute character or LOW-VALUE when unset
//! - Value: `length` bytes of single-byte (Latin-1) text
//!
//! Attribute characters are the EBCDIC graphics of the 64 valid 3270
//! attribute bytes, as found in DFHBMSCA, and are decoded through fixed
//! character sets.

mod field;
mod library;
mod map;

pub use field::FieldControl;
pub use library::{lock_map, MapLibrary, SharedMap};
pub use map::{MapDefinition, MapSpec, PopulateOptions, SlotLayout, SymbolicMap};

use serde::{Deserialize, Serialize};

/// Screen width used for cursor positions.
pub const SCREEN_COLUMNS: usize = 80;

/// Bytes a field occupies in the record besides its value (Length + Attribute).
pub const SLOT_OVERHEAD: usize = 3;

/// Length sub-slot value asking for the cursor on this field.
pub const CURSOR_SENTINEL: i16 = -1;

/// LOW-VALUE.
pub const LOW_VALUE: u8 = 0x00;

/// Attribute character written by translated programs for "never set".
pub const ATTR_UNSET: u8 = b'_';

/// Attribute characters that make a field bright.
pub const BRIGHT_ATTRS: &[u8] = b"HI\xA2.QR!$YZ\xA6,89:#";
/// Attribute characters that make a field dark (non-display).
pub const DARK_ATTRS: &[u8] = b"<(+|*);\xAC%_>?@'=\"";
/// Attribute characters that make a field protected.
pub const PROTECTED_ATTRS: &[u8] = b"-/STUVWXYZ\xA6,%_>?0123456789:#@'=\"";
/// Attribute characters that carry the modified data tag.
pub const MODIFIED_ATTRS: &[u8] = b"ACEGI.(|JLNPR$)\xAC/TVXZ,_?13579#'\"";

/// The 64 attribute characters indexed by 3270 attribute bits.
const ATTRIBUTE_GRAPHICS: &[u8; 64] =
    b" ABCDEFGHI\xA2.<(+|&JKLMNOPQR!$*);\xAC-/STUVWXYZ\xA6,%_>?0123456789:#@'=\"";

/// Common DFHBMSCA attribute constants.
pub mod dfhbmsca {
    /// Unprotected.
    pub const UNPROT: u8 = b' ';
    /// Unprotected, numeric.
    pub const UNPROT_NUM: u8 = b'&';
    /// Unprotected, bright.
    pub const UNPROT_BRT: u8 = b'H';
    /// Unprotected, dark.
    pub const UNPROT_DRK: u8 = b'<';
    /// Unprotected, modified.
    pub const UNPROT_FSET: u8 = b'A';
    /// Protected.
    pub const PROT: u8 = b'-';
    /// Protected, bright.
    pub const PROT_BRT: u8 = b'Y';
    /// Protected, dark.
    pub const PROT_DRK: u8 = b'%';
    /// Autoskip.
    pub const ASKIP: u8 = b'0';
    /// Autoskip, bright.
    pub const ASKIP_BRT: u8 = b'8';
}

/// Boolean display attributes of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAttributes {
    pub bright: bool,
    pub dark: bool,
    pub protected: bool,
    pub autoskip: bool,
    pub modified: bool,
    pub numeric: bool,
}

impl FieldAttributes {
    /// Whether an attribute slot holds the "never set" sentinel.
    pub fn is_unset(attr: u8) -> bool {
        attr == LOW_VALUE || attr == ATTR_UNSET
    }

    /// Decode an attribute character on top of the declared attributes.
    ///
    /// Bright, dark, protected and modified come from the character; numeric
    /// and autoskip keep their declared values.
    pub fn decode(attr: u8, declared: FieldAttributes) -> FieldAttributes {
        FieldAttributes {
            bright: BRIGHT_ATTRS.contains(&attr),
            dark: DARK_ATTRS.contains(&attr),
            protected: PROTECTED_ATTRS.contains(&attr),
            modified: MODIFIED_ATTRS.contains(&attr),
            numeric: declared.numeric,
            autoskip: declared.autoskip,
        }
    }

    /// Attribute character for these attributes.
    pub fn to_attribute_char(&self) -> u8 {
        let mut index = 0usize;
        if self.protected || self.autoskip {
            index |= 0x20;
        }
        if self.numeric || self.autoskip {
            index |= 0x10;
        }
        if self.dark {
            index |= 0x0C;
        } else if self.bright {
            index |= 0x08;
        }
        if self.modified {
            index |= 0x01;
        }
        ATTRIBUTE_GRAPHICS[index]
    }
}

/// Field justification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldJustify {
    /// Left justified, blank fill (default)
    #[default]
    Left,
    /// Right justified, blank fill
    Right,
}

/// 3270 field colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldColor {
    Default,
    Blue,
    Red,
    Pink,
    Green,
    Turquoise,
    Yellow,
    White,
}

impl FieldColor {
    /// Style token for the client.
    pub fn name(&self) -> &'static str {
        match self {
            FieldColor::Default => "default",
            FieldColor::Blue => "blue",
            FieldColor::Red => "red",
            FieldColor::Pink => "pink",
            FieldColor::Green => "green",
            FieldColor::Turquoise => "turquoise",
            FieldColor::Yellow => "yellow",
            FieldColor::White => "white",
        }
    }
}

/// 3270 field highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldHighlight {
    Normal,
    Blink,
    Reverse,
    Underscore,
}

impl FieldHighlight {
    /// Style token for the client.
    pub fn name(&self) -> &'static str {
        match self {
            FieldHighlight::Normal => "normal",
            FieldHighlight::Blink => "blink",
            FieldHighlight::Reverse => "reverse",
            FieldHighlight::Underscore => "underscore",
        }
    }
}

/// Encode text as single-byte Latin-1. Characters outside Latin-1 become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Decode single-byte Latin-1 text.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Screen position of a field, `(row-1)*80+column`.
pub fn screen_position(row: usize, column: usize) -> usize {
    row.saturating_sub(1) * SCREEN_COLUMNS + column
}
