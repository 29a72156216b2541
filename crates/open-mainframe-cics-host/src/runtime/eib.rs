//! Execute Interface Block (EIB).
//!
//! The EIB carries the status of the current task: identifiers, date and
//! time, the key that started the turn, the cursor position, the commarea
//! length and the response of the last command.

use crate::response::{CicsResponse, Condition};

/// Execute Interface Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eib {
    /// Time of day (HHMMSS)
    pub eibtime: u32,
    /// Date (0CYYDDD)
    pub eibdate: u32,
    /// Transaction ID
    pub eibtrnid: String,
    /// Task number
    pub eibtaskn: u64,
    /// Terminal ID
    pub eibtrmid: String,
    /// Attention ID (DFHAID character, `'\0'` when none)
    pub eibaid: char,
    /// Cursor position
    pub eibcposn: u16,
    /// Commarea length
    pub eibcalen: u16,
    /// Response code
    pub eibresp: u32,
    /// Response code 2
    pub eibresp2: u32,
    /// Resource named by the last failing command
    pub eibrsrce: String,
    /// Abend code of the last ABEND
    pub eibabcode: String,
}

impl Default for Eib {
    fn default() -> Self {
        Self::new()
    }
}

impl Eib {
    pub fn new() -> Self {
        Self {
            eibtime: 0,
            eibdate: 0,
            eibtrnid: String::new(),
            eibtaskn: 0,
            eibtrmid: String::new(),
            eibaid: '\0',
            eibcposn: 0,
            eibcalen: 0,
            eibresp: 0,
            eibresp2: 0,
            eibrsrce: String::new(),
            eibabcode: String::new(),
        }
    }

    /// Set transaction ID (at most 4 characters).
    pub fn set_transaction_id(&mut self, id: &str) {
        self.eibtrnid = id.trim().chars().take(4).collect::<String>().to_uppercase();
    }

    /// Set terminal ID (at most 4 characters).
    pub fn set_terminal_id(&mut self, id: &str) {
        self.eibtrmid = id.trim().chars().take(4).collect::<String>().to_uppercase();
    }

    /// Set the AID from its DFHAID code; an empty code clears it.
    pub fn set_aid(&mut self, code: &str) {
        self.eibaid = code.chars().next().unwrap_or('\0');
    }

    /// AID code as a string (empty when none).
    pub fn aid(&self) -> String {
        if self.eibaid == '\0' {
            String::new()
        } else {
            self.eibaid.to_string()
        }
    }

    pub fn set_commarea_length(&mut self, len: usize) {
        self.eibcalen = u16::try_from(len).unwrap_or(u16::MAX);
    }

    pub fn set_cursor_position(&mut self, pos: usize) {
        self.eibcposn = u16::try_from(pos).unwrap_or(u16::MAX);
    }

    /// Set response code.
    pub fn set_response(&mut self, resp: CicsResponse) {
        self.eibresp = resp.code();
    }

    /// Set response code and the resource it concerns.
    pub fn set_response_for(&mut self, resp: CicsResponse, resource: &str) {
        self.eibresp = resp.code();
        self.eibrsrce = resource.to_string();
    }

    /// Response of the last command.
    pub fn response(&self) -> Option<CicsResponse> {
        CicsResponse::from_u32(self.eibresp)
    }

    /// Classified response of the last command.
    pub fn condition(&self) -> Condition {
        Condition::classify(self.eibresp)
    }

    /// Reset for new command.
    pub fn reset_for_command(&mut self) {
        self.eibresp = 0;
        self.eibresp2 = 0;
        self.eibrsrce.clear();
    }
}
