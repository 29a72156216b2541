//! Attention identifier (AID) translation.
//!
//! The terminal client reports the key the user pressed by name (`"ENTER"`,
//! `"PF3"`, ...). Translated programs compare EIBAID against the single
//! character constants of DFHAID, so every turn maps the key name to that
//! character. The table is bidirectional and fixed.

use std::fmt;

/// A terminal attention key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aid {
    Clear,
    Escape,
    Enter,
    Pa1,
    Pa2,
    Pa3,
    Pf1,
    Pf2,
    Pf3,
    Pf4,
    Pf5,
    Pf6,
    Pf7,
    Pf8,
    Pf9,
    Pf10,
    Pf11,
    Pf12,
    Pf13,
    Pf14,
    Pf15,
    Pf16,
    Pf17,
    Pf18,
    Pf19,
    Pf20,
    Pf21,
    Pf22,
    Pf23,
    Pf24,
}

/// Key names and their AID characters.
///
/// PF13..PF24 run `A`..`L` except PF22, which carries the EBCDIC X'4A'
/// graphic `¢` as in DFHAID.
const AID_TABLE: &[(Aid, &str, char)] = &[
    (Aid::Clear, "CLEAR", '_'),
    (Aid::Escape, "ESCAPE", '|'),
    (Aid::Enter, "ENTER", '\''),
    (Aid::Pa1, "PA1", '%'),
    (Aid::Pa2, "PA2", '>'),
    (Aid::Pa3, "PA3", ','),
    (Aid::Pf1, "PF1", '1'),
    (Aid::Pf2, "PF2", '2'),
    (Aid::Pf3, "PF3", '3'),
    (Aid::Pf4, "PF4", '4'),
    (Aid::Pf5, "PF5", '5'),
    (Aid::Pf6, "PF6", '6'),
    (Aid::Pf7, "PF7", '7'),
    (Aid::Pf8, "PF8", '8'),
    (Aid::Pf9, "PF9", '9'),
    (Aid::Pf10, "PF10", ':'),
    (Aid::Pf11, "PF11", '#'),
    (Aid::Pf12, "PF12", '@'),
    (Aid::Pf13, "PF13", 'A'),
    (Aid::Pf14, "PF14", 'B'),
    (Aid::Pf15, "PF15", 'C'),
    (Aid::Pf16, "PF16", 'D'),
    (Aid::Pf17, "PF17", 'E'),
    (Aid::Pf18, "PF18", 'F'),
    (Aid::Pf19, "PF19", 'G'),
    (Aid::Pf20, "PF20", 'H'),
    (Aid::Pf21, "PF21", 'I'),
    (Aid::Pf22, "PF22", '¢'),
    (Aid::Pf23, "PF23", 'K'),
    (Aid::Pf24, "PF24", 'L'),
];

impl Aid {
    /// Every key, in table order.
    pub fn all() -> impl Iterator<Item = Aid> {
        AID_TABLE.iter().map(|(aid, _, _)| *aid)
    }

    fn entry(&self) -> &'static (Aid, &'static str, char) {
        AID_TABLE
            .iter()
            .find(|(aid, _, _)| aid == self)
            .unwrap_or(&AID_TABLE[2])
    }

    /// Canonical key name (`"ENTER"`, `"PF3"`).
    pub fn name(&self) -> &'static str {
        self.entry().1
    }

    /// DFHAID character for EIBAID.
    pub fn code(&self) -> char {
        self.entry().2
    }

    /// Parse a key name. `CLR` and `ENTR` are accepted as aliases; matching
    /// ignores case and surrounding blanks.
    pub fn from_name(name: &str) -> Option<Aid> {
        let upper = name.trim().to_uppercase();
        let canonical = match upper.as_str() {
            "CLR" => "CLEAR",
            "ENTR" => "ENTER",
            other => other,
        };
        AID_TABLE
            .iter()
            .find(|(_, key, _)| *key == canonical)
            .map(|(aid, _, _)| *aid)
    }

    /// Parse a DFHAID character.
    pub fn from_code(code: char) -> Option<Aid> {
        AID_TABLE
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(aid, _, _)| *aid)
    }

    /// Whether this key asks for the working screen to be cleared.
    pub fn clears_screen(&self) -> bool {
        matches!(self, Aid::Clear | Aid::Escape)
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key name to AID code. Unknown names give the empty string.
pub fn to_aid(key: &str) -> String {
    Aid::from_name(key)
        .map(|aid| aid.code().to_string())
        .unwrap_or_default()
}

/// AID code to key name. Anything but a single known character gives the
/// empty string.
pub fn from_aid(code: &str) -> String {
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Aid::from_code(c)
            .map(|aid| aid.name().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}
