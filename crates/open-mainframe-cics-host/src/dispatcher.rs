//! Turn dispatcher running on a session's worker thread.
//!
//! Each turn takes the client's field list, picks the transaction to run,
//! runs its program (following XCTL without yielding) and answers with the
//! composed screen. Failures inside a program, panics included, stop at this
//! boundary and become an error screen.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::program::Outcome;
use crate::region::Region;
use crate::runtime::{ControlMark, SessionIdentity, TransactionContext};
use crate::terminal::port::TerminalPort;
use crate::terminal::protocol;
use crate::terminal::{ControlKey, Entry, FieldList, QUIT, RETURN};
use crate::CicsError;

/// RETURN TRANSID hops a turn may take without sending a screen.
const MAX_UNSENT_RETURNS: usize = 16;

/// Where the dispatcher is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    AwaitingInput,
    Resolving,
    Executing,
    Sending,
    /// Conversation ended; the next input starts a fresh one
    Quit,
}

/// Turn loop of one session.
#[derive(Debug)]
pub struct TransactionDispatcher {
    ctx: TransactionContext,
    state: DispatchState,
    current_transaction: Option<String>,
}

impl TransactionDispatcher {
    pub fn new(ctx: TransactionContext) -> Self {
        Self {
            ctx,
            state: DispatchState::AwaitingInput,
            current_transaction: None,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn context(&self) -> &TransactionContext {
        &self.ctx
    }

    /// Transaction the next plain key press runs.
    pub fn current_transaction(&self) -> Option<&str> {
        self.current_transaction.as_deref()
    }

    /// Run one turn and return the screen to show.
    pub fn turn(&mut self, input: FieldList) -> FieldList {
        self.state = DispatchState::Resolving;
        if input.is_quit() {
            info!(terminal = %self.ctx.assign_termid(), "Conversation ended by terminal");
            self.end_conversation();
            return FieldList::quit();
        }

        let (transid, fresh, entry_point) = match input.control.entry() {
            Entry::Transaction(code) => (Some(code.to_uppercase()), true, false),
            Entry::EntryPoint(code) => (Some(code.to_uppercase()), false, true),
            Entry::Key(aid) => {
                if aid.clears_screen() {
                    let region = Arc::clone(self.ctx.region());
                    if let Err(err) = protocol::clear_active(region.maps(), self.ctx.active_map()) {
                        warn!(error = %err, "Could not clear the active map");
                    }
                }
                (None, false, false)
            }
            Entry::Empty | Entry::Return | Entry::Quit => (None, false, false),
        };
        let transid = transid
            .or_else(|| self.ctx.pending_transaction().map(str::to_string))
            .or_else(|| self.current_transaction.clone());
        let Some(mut transid) = transid else {
            warn!(key = %input.control.entry_or_key, "No transaction to run");
            self.state = DispatchState::AwaitingInput;
            return FieldList::error_screen(RETURN, "No transaction in progress");
        };

        let mut program = match self.resolve(&transid) {
            Ok(program) => program,
            Err(err) => return self.not_found(err),
        };
        if fresh {
            // A typed transaction code starts over.
            self.end_conversation();
        }
        if !entry_point {
            self.current_transaction = Some(transid.clone());
        }

        self.ctx.accept_input(input);
        let mut unsent = 0;
        loop {
            self.ctx.begin_task(&transid);
            self.state = DispatchState::Executing;
            info!(
                transid = %transid,
                program = %program,
                task = self.ctx.eib.eibtaskn,
                calen = self.ctx.eib.eibcalen,
                "Dispatching transaction"
            );
            let (outcome, last_program) = self.execute(program);
            self.ctx.finish_turn();

            self.state = DispatchState::Sending;
            match outcome {
                Outcome::Normal => {}
                Outcome::Abend(code) => {
                    error!(transid = %transid, program = %last_program, code = %code, "Transaction abended");
                    return self.failed(CicsError::Abend {
                        program: last_program,
                        code,
                    });
                }
                Outcome::Fault(err) if err.is_not_found() => {
                    self.end_conversation();
                    return self.not_found(err);
                }
                Outcome::Fault(err) => {
                    error!(transid = %transid, program = %last_program, error = %err, "Transaction failed");
                    return self.failed(err);
                }
            }

            // RETURN TRANSID without a screen runs the next transaction
            // straight away.
            let next = match (self.ctx.control_mark(), self.ctx.has_screen()) {
                (ControlMark::Return, false) => self.ctx.pending_transaction().map(str::to_string),
                _ => None,
            };
            let Some(next) = next else {
                return self.completed();
            };
            unsent += 1;
            if unsent > MAX_UNSENT_RETURNS {
                error!(transid = %next, hops = unsent, "No screen sent by pseudo-conversation");
                return self.failed(CicsError::NoScreen {
                    transid: next,
                    hops: unsent,
                });
            }
            debug!(from = %transid, to = %next, "RETURN TRANSID without a screen");
            program = match self.resolve(&next) {
                Ok(program) => program,
                Err(err) => {
                    self.end_conversation();
                    return self.not_found(err);
                }
            };
            self.current_transaction = Some(next.clone());
            transid = next;
        }
    }

    fn resolve(&self, transid: &str) -> Result<String, CicsError> {
        self.ctx
            .region()
            .transactions()
            .resolve(transid)
            .map(str::to_string)
    }

    /// Run `program` and every XCTL target after it.
    fn execute(&mut self, program: String) -> (Outcome, String) {
        let mut current = program;
        loop {
            let ctx = &mut self.ctx;
            let name = current.as_str();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| ctx.run_once(name))) {
                Ok(outcome) => outcome,
                Err(payload) => Outcome::Fault(CicsError::ProgramFault {
                    program: current.clone(),
                    message: panic_message(payload.as_ref()),
                }),
            };
            if !outcome.is_normal() {
                return (outcome, current);
            }
            match self.ctx.take_transfer() {
                Some(next) => {
                    debug!(from = %current, to = %next, "XCTL");
                    current = next;
                }
                None => return (outcome, current),
            }
        }
    }

    fn completed(&mut self) -> FieldList {
        let mut screen = self
            .ctx
            .take_screen()
            .unwrap_or_else(|| FieldList::new(ControlKey::default(), Vec::new()));
        match self.ctx.control_mark() {
            ControlMark::Return => {
                screen.control.entry_or_key = RETURN.to_string();
                self.current_transaction = self.ctx.pending_transaction().map(str::to_string);
                self.state = DispatchState::AwaitingInput;
            }
            ControlMark::Quit | ControlMark::None => {
                screen.control.entry_or_key = QUIT.to_string();
                self.end_conversation();
            }
        }
        screen
    }

    fn not_found(&mut self, err: CicsError) -> FieldList {
        warn!(error = %err, "Resource not found");
        self.state = DispatchState::AwaitingInput;
        FieldList::error_screen(RETURN, &err.to_string())
    }

    fn failed(&mut self, err: CicsError) -> FieldList {
        self.end_conversation();
        FieldList::error_screen(QUIT, &err.to_string())
    }

    fn end_conversation(&mut self) {
        self.ctx.end_conversation();
        self.current_transaction = None;
        self.state = DispatchState::Quit;
    }

    /// Serve turns until the session is cancelled or its caller goes away.
    pub(crate) fn serve(&mut self, first: FieldList) {
        let mut input = Some(first);
        while let Some(fields) = input {
            let screen = self.turn(fields);
            if self.ctx.is_cancelled() {
                break;
            }
            input = self.ctx.exchange(screen);
        }
    }
}

/// Body of a session worker thread. The context is created once the first
/// input arrives.
pub(crate) fn run_worker(region: Arc<Region>, identity: SessionIdentity, mut port: TerminalPort) {
    let Some(first) = port.next_input() else {
        debug!(terminal = %identity.terminal_id, "Session closed before its first turn");
        return;
    };
    info!(user = %identity.user_id, terminal = %identity.terminal_id, "Session worker started");
    let terminal = identity.terminal_id.clone();
    let ctx = TransactionContext::attached(region, identity, port);
    let mut dispatcher = TransactionDispatcher::new(ctx);
    dispatcher.serve(first);
    info!(terminal = %terminal, "Session worker stopped");
}

/// Run the queued START requests in the background, each in its own
/// terminal-less context. Returns the number of transactions run.
pub fn run_started(region: &Arc<Region>) -> usize {
    let requests = region.take_start_requests();
    let count = requests.len();
    for request in requests {
        let identity = SessionIdentity {
            operator_id: request.user_id.chars().take(3).collect(),
            user_id: request.user_id.clone(),
            terminal_id: request.terminal_id.clone(),
        };
        let mut ctx = TransactionContext::new(Arc::clone(region), identity);
        ctx.put_container(None, "START", &request.data);
        let program = match region.transactions().resolve(&request.transid) {
            Ok(program) => program.to_string(),
            Err(err) => {
                warn!(error = %err, "Started transaction vanished");
                continue;
            }
        };
        ctx.begin_task(&request.transid);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ctx.run_program(&program)))
            .unwrap_or_else(|payload| {
                Outcome::Fault(CicsError::ProgramFault {
                    program: program.clone(),
                    message: panic_message(payload.as_ref()),
                })
            });
        match outcome {
            Outcome::Normal => debug!(transid = %request.transid, "Started transaction completed"),
            failed => error!(
                transid = %request.transid,
                status = failed.status(),
                outcome = ?failed,
                "Started transaction failed"
            ),
        }
    }
    count
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("program panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("program panicked: {s}")
    } else {
        "program panicked (unknown payload)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::Aid;
    use crate::bms::{FieldControl, MapSpec};
    use crate::config::RegionConfig;
    use crate::program::ProgramRegistry;
    use crate::terminal::protocol::SendMapOptions;
    use crate::terminal::ERROR_FIELD;

    fn region() -> Arc<Region> {
        let mut programs = ProgramRegistry::new();
        programs.register_fn("MENU", |ctx| {
            let mut out = ctx.symbolic_map("MENUMAP", None)?;
            let count = ctx.commarea().first().copied().unwrap_or(b'0');
            out.set("COUNT", &(count as char).to_string())?;
            ctx.send_map("MENUMAP", None, Some(out.as_bytes()), SendMapOptions::erase())?;
            Ok(ctx.return_(Some("MENU"), Some(&[count + 1])))
        });
        programs.register_fn("FIRST", |ctx| {
            ctx.transfer("SECOND", b"hi", 2)?;
            Ok(Outcome::Normal)
        });
        programs.register_fn("SECOND", |ctx| {
            let area = ctx.commarea().to_vec();
            ctx.put_container(None, "SEEN", &area);
            Ok(ctx.return_(None, None))
        });
        programs.register_fn("BOOM", |_ctx| -> crate::CicsResult<Outcome> { panic!("bad subscript") });
        programs.register_fn("ABND", |ctx| Ok(ctx.abend("ASRA")));
        programs.register_fn("NOSEND", |ctx| Ok(ctx.return_(Some("MENU"), None)));
        programs.register_fn("LOOPER", |ctx| Ok(ctx.return_(Some("LOOP"), None)));
        programs.register_fn("GHOST", |ctx| {
            ctx.transfer("NOWHERE", b"", 0)?;
            Ok(Outcome::Normal)
        });

        let mut config = RegionConfig::default()
            .with_transaction("MENU", "MENU")
            .with_transaction("XCTL", "FIRST")
            .with_transaction("BOOM", "BOOM")
            .with_transaction("ABND", "ABND")
            .with_transaction("GHST", "GHOST")
            .with_transaction("NOSN", "NOSEND")
            .with_transaction("LOOP", "LOOPER");
        config.maps.push(MapSpec {
            mapset: "MENUSET".into(),
            name: "MENUMAP".into(),
            error_map: false,
            fields: vec![FieldControl::new("COUNT", 1, 1, 1).cursor()],
        });
        Arc::new(Region::new(config, programs).unwrap())
    }

    fn dispatcher() -> TransactionDispatcher {
        let region = region();
        let identity = SessionIdentity::default_for(&region.config().region);
        TransactionDispatcher::new(TransactionContext::new(region, identity))
    }

    #[test]
    fn test_pseudo_conversation_keeps_commarea() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("MENU"));
        assert_eq!(screen.control.entry_or_key, RETURN);
        assert_eq!(screen.text("COUNT"), Some("0"));
        assert_eq!(dispatcher.state(), DispatchState::AwaitingInput);

        let screen = dispatcher.turn(FieldList::key(Aid::Enter));
        assert_eq!(screen.text("COUNT"), Some("1"));
        assert_eq!(dispatcher.context().eib.eibcalen, 1);
        assert_eq!(dispatcher.current_transaction(), Some("MENU"));
    }

    #[test]
    fn test_xctl_runs_without_yielding() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("XCTL"));
        assert!(screen.is_quit());
        assert_eq!(dispatcher.state(), DispatchState::Quit);
    }

    #[test]
    fn test_unknown_transaction_keeps_session() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("ZZZZ"));
        assert_eq!(screen.control.entry_or_key, RETURN);
        assert!(screen.text(ERROR_FIELD).unwrap().contains("ZZZZ"));

        let screen = dispatcher.turn(FieldList::entry("MENU"));
        assert_eq!(screen.text("COUNT"), Some("0"));
    }

    #[test]
    fn test_unknown_code_mid_conversation_keeps_commarea() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("MENU"));
        assert_eq!(screen.text("COUNT"), Some("0"));

        let screen = dispatcher.turn(FieldList::entry("ZZZZ"));
        assert_eq!(screen.control.entry_or_key, RETURN);
        assert!(screen.text(ERROR_FIELD).unwrap().contains("ZZZZ"));
        // an unknown key name is taken as a transaction code
        let screen = dispatcher.turn(FieldList::entry("PF25"));
        assert!(screen.text(ERROR_FIELD).unwrap().contains("PF25"));

        let screen = dispatcher.turn(FieldList::key(Aid::Enter));
        assert_eq!(screen.text("COUNT"), Some("1"));
        assert_eq!(dispatcher.current_transaction(), Some("MENU"));
    }

    #[test]
    fn test_return_without_screen_runs_next_transaction() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("NOSN"));
        assert_eq!(screen.control.entry_or_key, RETURN);
        assert_eq!(screen.text("COUNT"), Some("0"));
        assert_eq!(dispatcher.current_transaction(), Some("MENU"));

        let screen = dispatcher.turn(FieldList::key(Aid::Enter));
        assert_eq!(screen.text("COUNT"), Some("1"));
    }

    #[test]
    fn test_return_chain_without_screen_is_bounded() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("LOOP"));
        assert!(screen.is_quit());
        let message = screen.text(ERROR_FIELD).unwrap();
        assert!(message.contains("'LOOP'"));
        assert!(message.contains("without sending a screen"));
        assert_eq!(dispatcher.state(), DispatchState::Quit);
        assert_eq!(dispatcher.current_transaction(), None);
    }

    #[test]
    fn test_panic_becomes_quit_screen() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("BOOM"));
        assert!(screen.is_quit());
        assert!(screen.text(ERROR_FIELD).unwrap().contains("bad subscript"));
        assert!(dispatcher.context().program_stack().is_empty());

        // next input starts fresh
        let screen = dispatcher.turn(FieldList::entry("MENU"));
        assert_eq!(screen.text("COUNT"), Some("0"));
    }

    #[test]
    fn test_abend_reports_code() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("ABND"));
        assert!(screen.is_quit());
        assert_eq!(screen.text(ERROR_FIELD), Some("ABEND ASRA in program 'ABND'"));
    }

    #[test]
    fn test_missing_xctl_target_is_not_found() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry("GHST"));
        assert_eq!(screen.control.entry_or_key, RETURN);
        assert!(screen.text(ERROR_FIELD).unwrap().contains("NOWHERE"));
    }

    #[test]
    fn test_quit_input_ends_conversation() {
        let mut dispatcher = dispatcher();
        dispatcher.turn(FieldList::entry("MENU"));
        let screen = dispatcher.turn(FieldList::quit());
        assert!(screen.is_quit());
        assert_eq!(dispatcher.current_transaction(), None);

        let screen = dispatcher.turn(FieldList::key(Aid::Enter));
        assert!(screen.text(ERROR_FIELD).is_some());
    }

    #[test]
    fn test_entry_point_runs_once() {
        let mut dispatcher = dispatcher();
        let screen = dispatcher.turn(FieldList::entry_point("XCTL"));
        assert!(screen.is_quit());
        assert_eq!(dispatcher.current_transaction(), None);
    }

    #[test]
    fn test_run_started_requests() {
        let region = region();
        let identity = SessionIdentity::default_for(&region.config().region);
        let mut ctx = TransactionContext::new(Arc::clone(&region), identity);
        ctx.start("XCTL", b"payload").unwrap();
        assert_eq!(run_started(&region), 1);
        assert_eq!(run_started(&region), 0);
    }
}
