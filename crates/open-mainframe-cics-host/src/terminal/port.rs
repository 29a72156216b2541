//! Worker side of the turn rendezvous.
//!
//! The caller sends a [`TurnRequest`] holding the input and a one-shot reply
//! slot, then blocks on the slot. The worker keeps the slot until it has a
//! screen to answer with, so exactly one side runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{FieldList, QUIT};

/// One caller turn.
#[derive(Debug)]
pub struct TurnRequest {
    pub fields: FieldList,
    pub reply: oneshot::Sender<FieldList>,
}

/// Create the caller sender and the worker port of one session.
pub fn channel(cancel: Arc<AtomicBool>) -> (mpsc::Sender<TurnRequest>, TerminalPort) {
    let (input_tx, input_rx) = mpsc::channel(1);
    (
        input_tx,
        TerminalPort {
            input: input_rx,
            pending: None,
            cancel,
        },
    )
}

/// Worker end of the rendezvous.
#[derive(Debug)]
pub struct TerminalPort {
    input: mpsc::Receiver<TurnRequest>,
    pending: Option<oneshot::Sender<FieldList>>,
    cancel: Arc<AtomicBool>,
}

impl TerminalPort {
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Block until the next input. `None` once the session is cancelled or
    /// the caller side is gone.
    pub fn next_input(&mut self) -> Option<FieldList> {
        if self.is_cancelled() {
            return None;
        }
        let request = self.input.blocking_recv()?;
        if self.is_cancelled() {
            let _ = request.reply.send(closed_screen());
            return None;
        }
        self.pending = Some(request.reply);
        Some(request.fields)
    }

    /// Answer the pending caller. Returns false if nobody was waiting.
    pub fn reply(&mut self, screen: FieldList) -> bool {
        match self.pending.take() {
            Some(reply) => reply.send(screen).is_ok(),
            None => false,
        }
    }

    /// Answer the pending caller, then wait for its next input.
    pub fn exchange(&mut self, screen: FieldList) -> Option<FieldList> {
        self.reply(screen);
        self.next_input()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for TerminalPort {
    fn drop(&mut self) {
        if self.reply(closed_screen()) {
            debug!("Answered pending caller while closing session");
        }
    }
}

fn closed_screen() -> FieldList {
    FieldList::error_screen(QUIT, "Session closed")
}
