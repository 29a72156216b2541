//! Pseudo-conversational CICS transaction host for OpenMainframe.
//!
//! This crate runs translated CICS transaction programs against a decoupled
//! terminal client:
//! - A per-session worker thread driven turn-by-turn by a caller thread
//!   ([`session::SessionService`], [`dispatcher::TransactionDispatcher`])
//! - An EIB-compatible transaction context with LINK/XCTL/RETURN, containers,
//!   resource locks and TD queues ([`runtime::TransactionContext`])
//! - The BMS field protocol that turns symbolic maps into named screen fields
//!   and back ([`terminal::protocol`])
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use open_mainframe_cics_host::{ProgramRegistry, Region, RegionConfig, SessionService};
//! use open_mainframe_cics_host::terminal::FieldList;
//!
//! let mut programs = ProgramRegistry::new();
//! programs.register_fn("CT02P000", |ctx| Ok(ctx.return_(Some("CT02"), None)));
//!
//! let config = RegionConfig::from_file("region.toml")?;
//! let region = Arc::new(Region::new(config, programs)?);
//! let session = SessionService::new(Arc::clone(&region));
//! session.initialize("USER01", Some("T001"))?;
//! let screen = session.run(FieldList::entry("CT02"));
//! ```

#![forbid(unsafe_code)]

pub mod aid;
pub mod bms;
pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod program;
pub mod queues;
pub mod region;
pub mod registry;
pub mod response;
pub mod runtime;
pub mod session;
pub mod terminal;

pub use config::RegionConfig;
pub use program::{Outcome, ProgramRegistry, TransactionProgram};
pub use region::Region;
pub use response::{CicsResponse, Condition};
pub use runtime::TransactionContext;
pub use session::SessionService;

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by the transaction host.
///
/// CICS conditions (NOTFND, QZERO, ...) are not errors: they are reported
/// through the EIB response fields. These variants are the faults that end a
/// turn or reject a configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum CicsError {
    /// Transaction code has no program mapping.
    #[error("transaction '{transid}' is not defined")]
    #[diagnostic(code(cics::transaction_not_found))]
    TransactionNotFound { transid: String },

    /// No factory registered for a program name.
    #[error("program '{program}' is not registered")]
    #[diagnostic(code(cics::program_not_found))]
    ProgramNotFound { program: String },

    /// Destination id missing from the destination table.
    #[error("destination '{dest}' is not defined")]
    #[diagnostic(code(cics::destination_not_found))]
    DestinationNotFound { dest: String },

    /// Indirect destination chain did not end within the allowed depth.
    #[error("indirect destination '{dest}' did not resolve within {depth} hops")]
    #[diagnostic(code(cics::indirect_too_deep))]
    IndirectTooDeep { dest: String, depth: usize },

    /// BMS map not present in the map library.
    #[error("map '{map}' in mapset '{mapset}' is not defined")]
    #[diagnostic(code(cics::map_not_found))]
    MapNotFound { mapset: String, map: String },

    /// Caller record buffer cannot be reconciled with the map layout.
    #[error("map {map}: buffer length {actual} does not match map length {expected}")]
    #[diagnostic(
        code(cics::buffer_mismatch),
        help("the symbolic map record and the map definition were built from different sources")
    )]
    BufferMismatch {
        map: String,
        expected: usize,
        actual: usize,
    },

    /// LINK target failed; the inner cause is kept as the source.
    #[error("LINK to program '{program}' failed")]
    #[diagnostic(code(cics::link_failed))]
    LinkFailed {
        program: String,
        #[source]
        source: Box<CicsError>,
    },

    /// Program ended abnormally.
    #[error("ABEND {code} in program '{program}'")]
    #[diagnostic(code(cics::abend))]
    Abend { program: String, code: String },

    /// Program panicked or reported an unexpected fault.
    #[error("program '{program}' failed: {message}")]
    #[diagnostic(code(cics::program_fault))]
    ProgramFault { program: String, message: String },

    /// RETURN TRANSID chain kept going without a screen being sent.
    #[error("transaction '{transid}' returned {hops} times without sending a screen")]
    #[diagnostic(code(cics::no_screen), help("a pseudo-conversational RETURN must follow a SEND MAP"))]
    NoScreen { transid: String, hops: usize },

    /// Session identity could not be established.
    #[error("cannot initialize session: {reason}")]
    #[diagnostic(code(cics::initialize))]
    Initialize { reason: String },

    /// Session worker is gone.
    #[error("session worker has terminated")]
    #[diagnostic(code(cics::session_closed))]
    SessionClosed,

    /// Turn exchange payload is malformed.
    #[error("invalid field list: {0}")]
    #[diagnostic(code(cics::invalid_field_list))]
    InvalidFieldList(String),

    /// Invalid request
    #[error("invalid request: {0}")]
    #[diagnostic(code(cics::invalid_request))]
    InvalidRequest(String),

    /// Configuration is inconsistent.
    #[error("configuration error: {0}")]
    #[diagnostic(code(cics::config))]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("cannot parse configuration: {0}")]
    #[diagnostic(code(cics::config_parse))]
    ConfigParse(#[from] toml::de::Error),

    /// JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    #[diagnostic(code(cics::json))]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(cics::io))]
    Io(#[from] std::io::Error),
}

impl CicsError {
    /// Whether this error is one of the not-found conditions that keep the
    /// session accepting input.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CicsError::TransactionNotFound { .. }
                | CicsError::ProgramNotFound { .. }
                | CicsError::DestinationNotFound { .. }
                | CicsError::MapNotFound { .. }
        )
    }
}

/// Result type for CICS operations.
pub type CicsResult<T> = Result<T, CicsError>;
