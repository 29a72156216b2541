//! CICS runtime for command execution.
//!
//! [`TransactionContext`] is the per-session state every program receives:
//! the EIB, the program stack, the commarea, channels, held resource locks
//! and the screen being composed.

mod clock;
mod context;
pub mod eib;
mod locks;

pub use clock::{eib_date, eib_time, RegionClock};
pub use context::{ControlMark, TransactionContext};
pub use eib::Eib;
pub use locks::ResourceLockTable;

use crate::config::RegionSettings;
use crate::{CicsError, CicsResult};

/// Largest commarea RETURN keeps for the next turn.
pub const MAX_COMMAREA: usize = 32_763;

/// Who a session runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// User id, 1-8 characters
    pub user_id: String,
    /// Operator id, the first 3 characters of the user id
    pub operator_id: String,
    /// Terminal id, 1-4 characters
    pub terminal_id: String,
}

impl SessionIdentity {
    /// Resolve a login. The terminal falls back to the region default.
    pub fn resolve(
        login_id: &str,
        terminal_id: Option<&str>,
        settings: &RegionSettings,
    ) -> CicsResult<Self> {
        let user_id = login_id.trim().to_uppercase();
        if user_id.is_empty() || user_id.chars().count() > 8 {
            return Err(CicsError::Initialize {
                reason: format!("user id '{}' must be 1-8 characters", login_id.trim()),
            });
        }
        let terminal_id = terminal_id
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&settings.default_terminal)
            .to_uppercase();
        if terminal_id.chars().count() > 4 {
            return Err(CicsError::Initialize {
                reason: format!("terminal id '{terminal_id}' must be 1-4 characters"),
            });
        }
        Ok(Self {
            operator_id: user_id.chars().take(3).collect(),
            user_id,
            terminal_id,
        })
    }

    /// Identity of a session nobody signed on to.
    pub fn default_for(settings: &RegionSettings) -> Self {
        let user_id = settings.default_user.to_uppercase();
        Self {
            operator_id: user_id.chars().take(3).collect(),
            user_id,
            terminal_id: settings.default_terminal.to_uppercase(),
        }
    }
}
