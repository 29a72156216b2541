//! Per-session transaction context and the CICS verbs programs call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::clock::{eib_date, eib_time};
use super::eib::Eib;
use super::{SessionIdentity, MAX_COMMAREA};
use crate::aid::to_aid;
use crate::bms::{lock_map, SymbolicMap, LOW_VALUE};
use crate::channels::ChannelManager;
use crate::program::{Outcome, TransactionProgram};
use crate::queues::{SpoolFile, StartRequest};
use crate::region::Region;
use crate::response::{CicsResponse, Condition};
use crate::terminal::port::TerminalPort;
use crate::terminal::protocol::{self, SendMapOptions};
use crate::terminal::FieldList;
use crate::{CicsError, CicsResult};

/// How the top-level program asked the turn to end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlMark {
    /// No RETURN issued yet
    #[default]
    None,
    /// RETURN TRANSID: keep the conversation going
    Return,
    /// RETURN without TRANSID: end the conversation
    Quit,
}

#[derive(Debug)]
struct Transfer {
    program: String,
    commarea: Vec<u8>,
}

#[derive(Clone, Copy)]
enum Cache {
    Programs,
    Subroutines,
}

/// State of one session, handed to every program it runs.
pub struct TransactionContext {
    region: Arc<Region>,
    /// Execute Interface Block
    pub eib: Eib,
    identity: SessionIdentity,
    session_id: u64,
    cancel: Arc<AtomicBool>,
    terminal: Option<TerminalPort>,
    program_stack: Vec<String>,
    commarea: Vec<u8>,
    next_transaction: Option<String>,
    pending_transfer: Option<Transfer>,
    control: ControlMark,
    input: FieldList,
    screen: Option<FieldList>,
    active_map: Option<String>,
    held_locks: Vec<String>,
    channels: ChannelManager,
    spools: HashMap<String, SpoolFile>,
    spool_count: u32,
    programs: HashMap<String, Box<dyn TransactionProgram>>,
    subroutines: HashMap<String, Box<dyn TransactionProgram>>,
}

impl TransactionContext {
    /// Context without a terminal, for background tasks and tests.
    pub fn new(region: Arc<Region>, identity: SessionIdentity) -> Self {
        Self::build(region, identity, Arc::new(AtomicBool::new(false)), None)
    }

    /// Context of a terminal session.
    pub(crate) fn attached(region: Arc<Region>, identity: SessionIdentity, port: TerminalPort) -> Self {
        let cancel = port.cancel_flag();
        Self::build(region, identity, cancel, Some(port))
    }

    fn build(
        region: Arc<Region>,
        identity: SessionIdentity,
        cancel: Arc<AtomicBool>,
        terminal: Option<TerminalPort>,
    ) -> Self {
        let session_id = region.next_session_id();
        let mut eib = Eib::new();
        eib.set_terminal_id(&identity.terminal_id);
        Self {
            region,
            eib,
            identity,
            session_id,
            cancel,
            terminal,
            program_stack: Vec::new(),
            commarea: Vec::new(),
            next_transaction: None,
            pending_transfer: None,
            control: ControlMark::None,
            input: FieldList::default(),
            screen: None,
            active_map: None,
            held_locks: Vec::new(),
            channels: ChannelManager::new(),
            spools: HashMap::new(),
            spool_count: 0,
            programs: HashMap::new(),
            subroutines: HashMap::new(),
        }
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Owner id of this session's resource locks.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn current_program(&self) -> Option<&str> {
        self.program_stack.last().map(String::as_str)
    }

    /// Programs currently running, outermost first.
    pub fn program_stack(&self) -> &[String] {
        &self.program_stack
    }

    /// Commarea passed to the running program.
    pub fn commarea(&self) -> &[u8] {
        &self.commarea
    }

    pub fn commarea_mut(&mut self) -> &mut [u8] {
        &mut self.commarea
    }

    /// Screen input of the current turn.
    pub fn input(&self) -> &FieldList {
        &self.input
    }

    /// Screen composed so far this turn.
    pub fn screen(&self) -> Option<&FieldList> {
        self.screen.as_ref()
    }

    /// Qualified name of the map on screen.
    pub fn active_map(&self) -> Option<&str> {
        self.active_map.as_deref()
    }

    pub fn next_transaction(&self) -> Option<&str> {
        self.next_transaction.as_deref()
    }

    pub fn control_mark(&self) -> ControlMark {
        self.control
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelManager {
        &mut self.channels
    }

    /// Response of the last command.
    pub fn response(&self) -> Option<CicsResponse> {
        self.eib.response()
    }

    pub fn condition(&self) -> Condition {
        self.eib.condition()
    }

    // ---- program control ----

    /// LINK: run `program` with a copy of `commarea` padded to `length`.
    ///
    /// Changes made by the callee are copied back when it ends normally.
    /// On failure EIBCALEN is zeroed, `commarea` is left untouched and the
    /// callee's error is returned as the source of [`CicsError::LinkFailed`].
    pub fn link(&mut self, program: &str, commarea: &mut [u8], length: usize) -> CicsResult<()> {
        let target = normalize(program);
        self.eib.reset_for_command();
        debug!(program = %target, length, depth = self.program_stack.len(), "LINK");

        let mut area = vec![LOW_VALUE; length];
        let copied = commarea.len().min(length);
        area[..copied].copy_from_slice(&commarea[..copied]);

        let caller_area = std::mem::replace(&mut self.commarea, area);
        let caller_calen = self.eib.eibcalen;
        let caller_transfer = self.pending_transfer.take();
        self.eib.set_commarea_length(length);

        let outcome = self.run_level(&target);

        let callee_area = std::mem::replace(&mut self.commarea, caller_area);
        self.pending_transfer = caller_transfer;
        match outcome.into_result(&target) {
            Ok(()) => {
                let copied = commarea.len().min(callee_area.len());
                commarea[..copied].copy_from_slice(&callee_area[..copied]);
                self.eib.eibcalen = caller_calen;
                Ok(())
            }
            Err(source) => {
                self.eib.eibcalen = 0;
                if matches!(source, CicsError::ProgramNotFound { .. }) {
                    self.eib.set_response_for(CicsResponse::Pgmiderr, &target);
                }
                warn!(program = %target, error = %source, "LINK failed");
                Err(CicsError::LinkFailed {
                    program: target,
                    source: Box::new(source),
                })
            }
        }
    }

    /// XCTL: transfer control to `program` once the current one ends.
    ///
    /// The commarea is truncated to `length`, never padded.
    pub fn transfer(&mut self, program: &str, commarea: &[u8], length: usize) -> CicsResult<()> {
        let target = normalize(program);
        self.eib.reset_for_command();
        if !self.region.programs().exists(&target) {
            self.eib.set_response_for(CicsResponse::Pgmiderr, &target);
            return Err(CicsError::ProgramNotFound { program: target });
        }
        let kept = commarea.len().min(length);
        debug!(program = %target, length = kept, "XCTL");
        self.pending_transfer = Some(Transfer {
            program: target,
            commarea: commarea[..kept].to_vec(),
        });
        Ok(())
    }

    /// CALL a subroutine with by-reference arguments.
    pub fn call(&mut self, program: &str, args: &mut [Vec<u8>]) -> CicsResult<()> {
        let target = normalize(program);
        self.program_stack.push(target.clone());
        let result = self.invoke(&target, Cache::Subroutines, |instance, ctx| instance.call(ctx, args));
        self.program_stack.pop();
        Outcome::from_result(result.and_then(|r| r)).into_result(&target)
    }

    /// RETURN. Only the top-level program ends the turn; a nested RETURN
    /// just gives control back to the caller.
    pub fn return_(&mut self, transid: Option<&str>, commarea: Option<&[u8]>) -> Outcome {
        self.eib.reset_for_command();
        if self.program_stack.len() > 1 {
            if transid.is_some() {
                self.eib.set_response(CicsResponse::Invreq);
            }
            return Outcome::Normal;
        }

        self.release_locks();
        match transid.map(str::trim).filter(|t| !t.is_empty()) {
            Some(code) => {
                self.next_transaction = Some(code.to_uppercase());
                self.control = ControlMark::Return;
            }
            None => {
                self.next_transaction = None;
                self.control = ControlMark::Quit;
            }
        }
        match commarea {
            Some(area) => {
                if area.len() > MAX_COMMAREA {
                    self.eib.set_response(CicsResponse::Lengerr);
                }
                self.commarea = area[..area.len().min(MAX_COMMAREA)].to_vec();
            }
            None => self.commarea.clear(),
        }
        Outcome::Normal
    }

    /// ABEND with a four-character code.
    pub fn abend(&mut self, code: &str) -> Outcome {
        let code = normalize(code);
        self.eib.eibabcode = code.clone();
        Outcome::Abend(code)
    }

    /// START a transaction. The request is queued on the region.
    pub fn start(&mut self, transid: &str, data: &[u8]) -> CicsResult<()> {
        self.eib.reset_for_command();
        let code = normalize(transid);
        if !self.region.transactions().contains(&code) {
            self.eib.set_response_for(CicsResponse::Transiderr, &code);
            return Err(CicsError::TransactionNotFound { transid: code });
        }
        self.queue_start(code, data.to_vec());
        Ok(())
    }

    fn queue_start(&self, transid: String, data: Vec<u8>) {
        self.region.queue_start(StartRequest {
            transid,
            data,
            terminal_id: self.identity.terminal_id.clone(),
            user_id: self.identity.user_id.clone(),
            requested_at: self.region.clock().now(),
        });
    }

    // ---- transient data ----

    /// WRITEQ TD. Reaching an intrapartition trigger level queues the
    /// trigger transaction.
    pub fn write_td(&mut self, dest: &str, data: &[u8]) -> CicsResult<()> {
        self.eib.reset_for_command();
        let region = Arc::clone(&self.region);
        let entry = match region.destinations().resolve(dest) {
            Ok(entry) => entry,
            Err(err) => {
                self.eib.set_response_for(CicsResponse::Qiderr, &normalize(dest));
                return Err(err);
            }
        };
        if let Some(transid) = region.td_queues().write(entry, data.to_vec()) {
            if region.transactions().contains(&transid) {
                info!(dest = %entry.id, transid = %transid, "TD trigger level reached");
                self.queue_start(transid, Vec::new());
            } else {
                warn!(dest = %entry.id, transid = %transid, "TD trigger transaction is not defined");
            }
        }
        Ok(())
    }

    /// READQ TD. `None` with QZERO when the queue is empty.
    pub fn read_td(&mut self, dest: &str) -> CicsResult<Option<Vec<u8>>> {
        self.eib.reset_for_command();
        let region = Arc::clone(&self.region);
        let entry = match region.destinations().resolve(dest) {
            Ok(entry) => entry,
            Err(err) => {
                self.eib.set_response_for(CicsResponse::Qiderr, &normalize(dest));
                return Err(err);
            }
        };
        let record = region.td_queues().read(entry);
        if record.is_none() {
            self.eib.set_response_for(CicsResponse::Qzero, &entry.id);
        }
        Ok(record)
    }

    // ---- channels ----

    pub fn put_container(&mut self, channel: Option<&str>, container: &str, data: &[u8]) {
        self.eib.reset_for_command();
        self.channels.put_container(channel, container, data);
    }

    /// GET CONTAINER. `None` with CHANNELERR or CONTAINERERR in the EIB.
    pub fn get_container(&mut self, channel: Option<&str>, container: &str) -> Option<Vec<u8>> {
        self.eib.reset_for_command();
        match self.channels.get_container(channel, container) {
            Ok(data) => Some(data.to_vec()),
            Err(resp) => {
                self.eib.set_response_for(resp, container);
                None
            }
        }
    }

    pub fn delete_container(&mut self, channel: Option<&str>, container: &str) -> bool {
        self.eib.reset_for_command();
        match self.channels.delete_container(channel, container) {
            Ok(()) => true,
            Err(resp) => {
                self.eib.set_response_for(resp, container);
                false
            }
        }
    }

    // ---- resource locks ----

    /// ENQ: block until the named resource is ours.
    pub fn set_resource_lock(&mut self, name: &str) -> CicsResult<()> {
        self.eib.reset_for_command();
        let key = normalize(name);
        self.region.locks().acquire(&key, self.session_id, &self.cancel)?;
        if !self.held_locks.contains(&key) {
            self.held_locks.push(key);
        }
        Ok(())
    }

    /// DEQ. Returns false if the lock was not held by this session.
    pub fn remove_resource_lock(&mut self, name: &str) -> bool {
        self.eib.reset_for_command();
        let key = normalize(name);
        self.held_locks.retain(|held| *held != key);
        self.region.locks().release(&key, self.session_id)
    }

    /// Resources this session holds.
    pub fn held_locks(&self) -> &[String] {
        &self.held_locks
    }

    fn release_locks(&mut self) {
        self.held_locks.clear();
        let released = self.region.locks().release_all(self.session_id);
        if released > 0 {
            debug!(session = self.session_id, released, "Released resource locks");
        }
    }

    // ---- date and time ----

    /// ASKTIME: refresh EIBDATE and EIBTIME together.
    pub fn asktime(&mut self) -> NaiveDateTime {
        let now = self.region.clock().now();
        self.eib.eibdate = eib_date(now);
        self.eib.eibtime = eib_time(now);
        now
    }

    /// Current EIBDATE (refreshes EIBTIME too).
    pub fn eibdate(&mut self) -> u32 {
        self.asktime();
        self.eib.eibdate
    }

    /// Current EIBTIME (refreshes EIBDATE too).
    pub fn eibtime(&mut self) -> u32 {
        self.asktime();
        self.eib.eibtime
    }

    // ---- ASSIGN ----

    pub fn assign_userid(&self) -> &str {
        &self.identity.user_id
    }

    pub fn assign_opid(&self) -> &str {
        &self.identity.operator_id
    }

    pub fn assign_termid(&self) -> &str {
        &self.identity.terminal_id
    }

    // ---- spool ----

    /// SPOOLOPEN OUTPUT. Returns the token for later writes.
    pub fn spool_open(&mut self, class: char) -> String {
        self.eib.reset_for_command();
        self.spool_count += 1;
        let token = format!("SPL{:05}", self.spool_count);
        self.spools.insert(
            token.clone(),
            SpoolFile {
                token: token.clone(),
                user_id: self.identity.user_id.clone(),
                class: class.to_ascii_uppercase(),
                lines: Vec::new(),
            },
        );
        token
    }

    pub fn spool_write(&mut self, token: &str, line: &str) -> CicsResponse {
        self.eib.reset_for_command();
        let resp = match self.spools.get_mut(token) {
            Some(file) => {
                file.lines.push(line.to_string());
                CicsResponse::Normal
            }
            None => CicsResponse::Notopen,
        };
        self.eib.set_response_for(resp, token);
        resp
    }

    /// SPOOLCLOSE: hand the file to the region.
    pub fn spool_close(&mut self, token: &str) -> CicsResponse {
        self.eib.reset_for_command();
        let resp = match self.spools.remove(token) {
            Some(file) => {
                self.region.submit_spool(file);
                CicsResponse::Normal
            }
            None => CicsResponse::Notopen,
        };
        self.eib.set_response_for(resp, token);
        resp
    }

    // ---- BMS ----

    /// SEND MAP. Without a mapset the first mapset holding `map` is used.
    pub fn send_map(
        &mut self,
        map: &str,
        mapset: Option<&str>,
        record: Option<&[u8]>,
        options: SendMapOptions,
    ) -> CicsResult<()> {
        self.eib.reset_for_command();
        let mapset = self.resolve_mapset(map, mapset)?;
        let region = Arc::clone(&self.region);
        let screen = protocol::send(region.maps(), &mut self.active_map, &mapset, map, record, options)?;
        self.screen = Some(screen);
        Ok(())
    }

    /// RECEIVE MAP into `record`.
    ///
    /// A screen sent earlier in the same turn is shown first and the
    /// program waits for the answer (conversational receive).
    pub fn receive_map(&mut self, map: &str, mapset: Option<&str>, record: &mut [u8]) -> CicsResult<()> {
        self.eib.reset_for_command();
        let mapset = self.resolve_mapset(map, mapset)?;
        if self.terminal.is_some() {
            if let Some(screen) = self.screen.take() {
                let input = self.exchange(screen).ok_or(CicsError::SessionClosed)?;
                self.accept_input(input);
            }
        }

        let region = Arc::clone(&self.region);
        let received = protocol::receive(region.maps(), &mapset, map, &self.input, record)?;
        if let Some(position) = received.cursor_position {
            self.eib.set_cursor_position(position);
        }
        if received.fields == 0 {
            self.eib.set_response_for(CicsResponse::Mapfail, map);
        }
        Ok(())
    }

    /// Blank symbolic record of a map.
    pub fn symbolic_map(&self, map: &str, mapset: Option<&str>) -> CicsResult<SymbolicMap> {
        let mapset = self.resolve_mapset(map, mapset)?;
        let shared = self.region.maps().get(&mapset, map)?;
        let def = lock_map(&shared);
        Ok(def.symbolic())
    }

    fn resolve_mapset(&self, map: &str, mapset: Option<&str>) -> CicsResult<String> {
        match mapset.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => Ok(name.to_uppercase()),
            None => self
                .region
                .maps()
                .resolve_mapset(map)
                .ok_or_else(|| CicsError::MapNotFound {
                    mapset: String::new(),
                    map: normalize(map),
                }),
        }
    }

    // ---- dispatcher hooks ----

    /// Run one program at the current level, following XCTL.
    pub fn run_program(&mut self, program: &str) -> Outcome {
        self.run_level(program)
    }

    fn run_level(&mut self, program: &str) -> Outcome {
        let mut current = normalize(program);
        loop {
            let outcome = self.run_once(&current);
            if !outcome.is_normal() {
                return outcome;
            }
            match self.take_transfer() {
                Some(next) => current = next,
                None => return outcome,
            }
        }
    }

    /// Run `program` once without following XCTL.
    pub(crate) fn run_once(&mut self, program: &str) -> Outcome {
        self.program_stack.push(program.to_string());
        let result = self.invoke(program, Cache::Programs, |instance, ctx| instance.run(ctx));
        self.program_stack.pop();
        Outcome::from_result(result.and_then(|r| r))
    }

    /// Take the pending XCTL target and install its commarea.
    pub(crate) fn take_transfer(&mut self) -> Option<String> {
        let transfer = self.pending_transfer.take()?;
        self.eib.set_commarea_length(transfer.commarea.len());
        self.commarea = transfer.commarea;
        Some(transfer.program)
    }

    fn invoke<T>(
        &mut self,
        name: &str,
        cache: Cache,
        body: impl FnOnce(&mut dyn TransactionProgram, &mut Self) -> T,
    ) -> CicsResult<T> {
        let cached = self.cache_mut(cache).remove(name);
        let mut instance = match cached {
            Some(instance) => instance,
            None => self.region.programs().instantiate(name)?,
        };
        let result = body(instance.as_mut(), self);
        self.cache_mut(cache).insert(name.to_string(), instance);
        Ok(result)
    }

    fn cache_mut(&mut self, cache: Cache) -> &mut HashMap<String, Box<dyn TransactionProgram>> {
        match cache {
            Cache::Programs => &mut self.programs,
            Cache::Subroutines => &mut self.subroutines,
        }
    }

    /// Take the input of a new turn.
    pub(crate) fn accept_input(&mut self, input: FieldList) {
        self.eib.set_aid(&to_aid(&input.control.entry_or_key));
        self.eib.set_cursor_position(input.control.current_position);
        self.input = input;
    }

    /// Prepare a task for `transid`.
    pub(crate) fn begin_task(&mut self, transid: &str) {
        self.eib.reset_for_command();
        self.eib.eibabcode.clear();
        self.eib.set_transaction_id(transid);
        self.eib.eibtaskn = self.region.next_task_number();
        self.eib.set_commarea_length(self.commarea.len());
        self.next_transaction = None;
        self.control = ControlMark::None;
        self.screen = None;
        self.asktime();
    }

    /// Transaction named by the last RETURN TRANSID.
    pub(crate) fn pending_transaction(&self) -> Option<&str> {
        self.next_transaction.as_deref()
    }

    pub(crate) fn has_screen(&self) -> bool {
        self.screen.is_some()
    }

    pub(crate) fn take_screen(&mut self) -> Option<FieldList> {
        self.screen.take()
    }

    /// Release what a turn holds once it is over.
    pub(crate) fn finish_turn(&mut self) {
        self.release_locks();
        self.pending_transfer = None;
    }

    /// Forget the conversation: commarea, pending transaction, channels,
    /// open spool files and cached program instances.
    pub(crate) fn end_conversation(&mut self) {
        self.finish_turn();
        self.commarea.clear();
        self.next_transaction = None;
        self.control = ControlMark::None;
        self.screen = None;
        self.active_map = None;
        self.channels.clear();
        for (_, file) in self.spools.drain() {
            self.region.submit_spool(file);
        }
        self.programs.clear();
        self.subroutines.clear();
        self.program_stack.clear();
        self.eib.set_commarea_length(0);
    }

    /// Answer the waiting caller and block for its next input.
    pub(crate) fn exchange(&mut self, screen: FieldList) -> Option<FieldList> {
        self.terminal.as_mut()?.exchange(screen)
    }

    pub(crate) fn next_input(&mut self) -> Option<FieldList> {
        self.terminal.as_mut()?.next_input()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.release_locks();
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("eib", &self.eib)
            .field("identity", &self.identity)
            .field("program_stack", &self.program_stack)
            .field("commarea_len", &self.commarea.len())
            .field("next_transaction", &self.next_transaction)
            .field("active_map", &self.active_map)
            .field("held_locks", &self.held_locks)
            .finish_non_exhaustive()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bms::{FieldControl, MapSpec};
    use crate::config::RegionConfig;
    use crate::program::ProgramRegistry;
    use crate::registry::DestinationEntry;

    fn region() -> Arc<Region> {
        let mut programs = ProgramRegistry::new();
        programs.register_fn("UPPER", |ctx| {
            let area = ctx.commarea_mut();
            area.make_ascii_uppercase();
            Ok(Outcome::Normal)
        });
        programs.register_fn("FAILS", |ctx| Ok(ctx.abend("AEY9")));
        programs.register_fn("HOPPER", |ctx| {
            ctx.commarea_mut()[0] = b'H';
            let area = ctx.commarea().to_vec();
            ctx.transfer("UPPER", &area, 3)?;
            Ok(Outcome::Normal)
        });
        programs.register_fn("NESTED", |ctx| Ok(ctx.return_(Some("CT02"), None)));
        programs.register_fn("ADDER", |_ctx| Ok(Outcome::Normal));

        let mut config = RegionConfig::default()
            .with_transaction("CT02", "UPPER")
            .with_transaction("TRIG", "UPPER")
            .with_destination(DestinationEntry::intra("CSSL").with_trigger("TRIG", 2))
            .with_destination(DestinationEntry::indirect("LOGQ", "CSSL"));
        config.maps.push(MapSpec {
            mapset: "COSGN00".into(),
            name: "COSGN0A".into(),
            error_map: false,
            fields: vec![
                FieldControl::new("USERID", 19, 43, 8).cursor(),
                FieldControl::new("ERRMSG", 23, 1, 40).autoskip(),
            ],
        });
        Arc::new(Region::new(config, programs).unwrap())
    }

    fn context() -> TransactionContext {
        let region = region();
        let identity = SessionIdentity::default_for(&region.config().region);
        TransactionContext::new(region, identity)
    }

    #[test]
    fn test_link_copies_back() {
        let mut ctx = context();
        ctx.program_stack.push("MAIN".into());
        ctx.eib.set_commarea_length(12);
        let mut area = b"abc".to_vec();
        ctx.link("UPPER", &mut area, 5).unwrap();
        assert_eq!(area, b"ABC");
        assert_eq!(ctx.eib.eibcalen, 12);
        assert_eq!(ctx.program_stack(), &["MAIN".to_string()]);
    }

    #[test]
    fn test_link_failure_wraps_cause() {
        let mut ctx = context();
        let mut area = b"abc".to_vec();
        let err = ctx.link("FAILS", &mut area, 3).unwrap_err();
        assert_eq!(ctx.eib.eibcalen, 0);
        assert_eq!(area, b"abc");
        match err {
            CicsError::LinkFailed { program, source } => {
                assert_eq!(program, "FAILS");
                assert!(matches!(*source, CicsError::Abend { ref code, .. } if code == "AEY9"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_link_missing_program() {
        let mut ctx = context();
        let mut area = Vec::new();
        assert!(ctx.link("NOPE", &mut area, 0).is_err());
        assert_eq!(ctx.response(), Some(CicsResponse::Pgmiderr));
    }

    #[test]
    fn test_link_follows_transfer_in_callee() {
        let mut ctx = context();
        let mut area = b"xyzw".to_vec();
        ctx.link("HOPPER", &mut area, 4).unwrap();
        // XCTL truncated the area to 3 bytes; only those come back
        assert_eq!(area, b"HYZw");
    }

    #[test]
    fn test_transfer_unknown_program() {
        let mut ctx = context();
        let err = ctx.transfer("NOPE", b"", 0).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(ctx.response(), Some(CicsResponse::Pgmiderr));
    }

    #[test]
    fn test_nested_return_with_transid_is_invreq() {
        let mut ctx = context();
        ctx.program_stack.push("MAIN".into());
        let mut area = Vec::new();
        ctx.link("NESTED", &mut area, 0).unwrap();
        assert_eq!(ctx.control_mark(), ControlMark::None);
        assert_eq!(ctx.next_transaction(), None);
    }

    #[test]
    fn test_top_level_return() {
        let mut ctx = context();
        ctx.program_stack.push("MAIN".into());
        ctx.return_(Some("ct02"), Some(b"state"));
        assert_eq!(ctx.control_mark(), ControlMark::Return);
        assert_eq!(ctx.next_transaction(), Some("CT02"));
        assert_eq!(ctx.commarea(), b"state");

        ctx.return_(None, None);
        assert_eq!(ctx.control_mark(), ControlMark::Quit);
        assert!(ctx.commarea().is_empty());
    }

    #[test]
    fn test_oversized_return_commarea_truncated() {
        let mut ctx = context();
        ctx.program_stack.push("MAIN".into());
        let big = vec![b'X'; MAX_COMMAREA + 10];
        ctx.return_(Some("CT02"), Some(&big));
        assert_eq!(ctx.commarea().len(), MAX_COMMAREA);
        assert_eq!(ctx.response(), Some(CicsResponse::Lengerr));
    }

    #[test]
    fn test_td_trigger_queues_start() {
        let mut ctx = context();
        ctx.write_td("LOGQ", b"one").unwrap();
        assert!(ctx.region().take_start_requests().is_empty());
        ctx.write_td("CSSL", b"two").unwrap();
        let starts = ctx.region().take_start_requests();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].transid, "TRIG");

        assert_eq!(ctx.read_td("CSSL").unwrap(), Some(b"one".to_vec()));
        assert_eq!(ctx.read_td("CSSL").unwrap(), Some(b"two".to_vec()));
        assert_eq!(ctx.read_td("CSSL").unwrap(), None);
        assert_eq!(ctx.response(), Some(CicsResponse::Qzero));
    }

    #[test]
    fn test_td_unknown_destination() {
        let mut ctx = context();
        let err = ctx.write_td("NOPE", b"x").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(ctx.response(), Some(CicsResponse::Qiderr));
    }

    #[test]
    fn test_start_unknown_transaction() {
        let mut ctx = context();
        assert!(ctx.start("ZZZZ", b"").is_err());
        assert_eq!(ctx.response(), Some(CicsResponse::Transiderr));
        ctx.start("ct02", b"data").unwrap();
        let starts = ctx.region().take_start_requests();
        assert_eq!(starts[0].transid, "CT02");
        assert_eq!(starts[0].user_id, "CICSUSER");
    }

    #[test]
    fn test_containers_set_conditions() {
        let mut ctx = context();
        assert_eq!(ctx.get_container(None, "MISSING"), None);
        assert_eq!(ctx.response(), Some(CicsResponse::Channelerr));
        ctx.put_container(None, "INPUT", b"hello");
        assert_eq!(ctx.get_container(None, "INPUT"), Some(b"hello".to_vec()));
        assert!(!ctx.delete_container(None, "OTHER"));
        assert_eq!(ctx.response(), Some(CicsResponse::Containererr));
    }

    #[test]
    fn test_locks_released_on_return() {
        let mut ctx = context();
        ctx.program_stack.push("MAIN".into());
        ctx.set_resource_lock("file1").unwrap();
        assert_eq!(ctx.region().locks().holder("FILE1"), Some(ctx.session_id()));
        ctx.return_(None, None);
        assert_eq!(ctx.region().locks().holder("FILE1"), None);
        assert!(ctx.held_locks().is_empty());
    }

    #[test]
    fn test_spool_lifecycle() {
        let mut ctx = context();
        let token = ctx.spool_open('a');
        assert_eq!(ctx.spool_write(&token, "LINE 1"), CicsResponse::Normal);
        assert_eq!(ctx.spool_close(&token), CicsResponse::Normal);
        assert_eq!(ctx.spool_write(&token, "late"), CicsResponse::Notopen);
        let files = ctx.region().take_spool_files();
        assert_eq!(files[0].class, 'A');
        assert_eq!(files[0].lines, vec!["LINE 1".to_string()]);
    }

    #[test]
    fn test_send_and_receive_map() {
        let mut ctx = context();
        let out = ctx.symbolic_map("COSGN0A", None).unwrap();
        ctx.send_map("COSGN0A", None, Some(out.as_bytes()), SendMapOptions::erase())
            .unwrap();
        assert_eq!(ctx.active_map(), Some("COSGN00.COSGN0A"));
        assert_eq!(ctx.screen().unwrap().control.current_control, "USERID");

        ctx.accept_input(
            FieldList::key(crate::aid::Aid::Enter)
                .with_field("USERID", "ALICE")
                .with_cursor("USERID"),
        );
        let mut input = ctx.symbolic_map("COSGN0A", Some("COSGN00")).unwrap();
        ctx.receive_map("COSGN0A", Some("COSGN00"), input.as_bytes_mut())
            .unwrap();
        assert_eq!(input.get("USERID").unwrap(), "ALICE");
        assert_eq!(ctx.eib.aid(), "'");
        assert_eq!(ctx.eib.eibcposn, 18 * 80 + 43);
    }

    #[test]
    fn test_receive_without_input_is_mapfail() {
        let mut ctx = context();
        let mut input = ctx.symbolic_map("COSGN0A", None).unwrap();
        ctx.receive_map("COSGN0A", None, input.as_bytes_mut()).unwrap();
        assert_eq!(ctx.response(), Some(CicsResponse::Mapfail));
    }

    #[test]
    fn test_assign_and_time() {
        let mut ctx = context();
        assert_eq!(ctx.assign_userid(), "CICSUSER");
        assert_eq!(ctx.assign_opid(), "CIC");
        assert_eq!(ctx.assign_termid(), "T001");
        let date = ctx.eibdate();
        assert!(date >= 100_000);
        assert!(ctx.eib.eibtime < 240_000);
    }
}
