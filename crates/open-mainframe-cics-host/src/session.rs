//! Session service: one worker thread per signed-on terminal.
//!
//! The caller hands a field list to [`SessionService::run`] and blocks until
//! the worker answers with the next screen. The worker is started on the
//! first turn and restarted if it has stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dispatcher::run_worker;
use crate::region::Region;
use crate::runtime::SessionIdentity;
use crate::terminal::port::{self, TurnRequest};
use crate::terminal::{FieldList, QUIT};
use crate::{CicsError, CicsResult};

struct WorkerHandle {
    input: mpsc::Sender<TurnRequest>,
    cancel: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.thread.is_finished() && !self.input.is_closed()
    }

    fn stop(self) {
        self.cancel.store(true, Ordering::Release);
        // Closing the sender wakes a worker waiting for input.
        drop(self.input);
        if self.thread.join().is_err() {
            error!("CICS session worker panicked");
        }
    }
}

/// Synchronous front end of one terminal session.
pub struct SessionService {
    region: Arc<Region>,
    identity: Mutex<Option<SessionIdentity>>,
    worker: Mutex<Option<WorkerHandle>>,
    turn: tokio::sync::Mutex<()>,
}

impl SessionService {
    pub fn new(region: Arc<Region>) -> Self {
        Self {
            region,
            identity: Mutex::new(None),
            worker: Mutex::new(None),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// Sign on. A running worker is stopped; the next turn starts a new one.
    pub fn initialize(&self, login_id: &str, terminal_id: Option<&str>) -> CicsResult<()> {
        let identity = SessionIdentity::resolve(login_id, terminal_id, &self.region.config().region)?;
        info!(user = %identity.user_id, terminal = %identity.terminal_id, "Session initialized");
        *lock(&self.identity) = Some(identity);
        self.stop_worker();
        Ok(())
    }

    /// Identity of the signed-on user, if any.
    pub fn identity(&self) -> Option<SessionIdentity> {
        lock(&self.identity).clone()
    }

    /// Run one turn. Never fails: errors come back as an error screen.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`run_async`](Self::run_async) there.
    pub fn run(&self, fields: FieldList) -> FieldList {
        let _turn = self.turn.blocking_lock();
        self.submit(fields)
            .and_then(|reply| reply.blocking_recv().map_err(|_| CicsError::SessionClosed))
            .unwrap_or_else(failure_screen)
    }

    /// Async form of [`run`](Self::run).
    pub async fn run_async(&self, fields: FieldList) -> FieldList {
        let _turn = self.turn.lock().await;
        let reply = match self.submit(fields) {
            Ok(reply) => reply,
            Err(err) => return failure_screen(err),
        };
        reply
            .await
            .map_err(|_| CicsError::SessionClosed)
            .unwrap_or_else(failure_screen)
    }

    /// Hand `fields` to the worker, starting it if needed.
    fn submit(&self, fields: FieldList) -> CicsResult<oneshot::Receiver<FieldList>> {
        let sender = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .try_send(TurnRequest {
                fields,
                reply: reply_tx,
            })
            .map_err(|_| CicsError::SessionClosed)?;
        Ok(reply_rx)
    }

    fn sender(&self) -> CicsResult<mpsc::Sender<TurnRequest>> {
        let mut worker = lock(&self.worker);
        if let Some(handle) = worker.as_ref() {
            if handle.is_alive() {
                return Ok(handle.input.clone());
            }
        }
        if let Some(stale) = worker.take() {
            warn!("CICS session worker stopped; starting a new one");
            stale.stop();
        }
        let handle = self.spawn_worker()?;
        let sender = handle.input.clone();
        *worker = Some(handle);
        Ok(sender)
    }

    fn spawn_worker(&self) -> CicsResult<WorkerHandle> {
        let identity = self
            .identity()
            .unwrap_or_else(|| SessionIdentity::default_for(&self.region.config().region));
        let cancel = Arc::new(AtomicBool::new(false));
        let (input, terminal) = port::channel(Arc::clone(&cancel));
        let region = Arc::clone(&self.region);
        let thread = thread::Builder::new()
            .name(format!("cics-session-{}", identity.terminal_id))
            .spawn(move || run_worker(region, identity, terminal))?;
        debug!("CICS session worker spawned");
        Ok(WorkerHandle {
            input,
            cancel,
            thread,
        })
    }

    fn stop_worker(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Stop the worker and wait for it.
    pub fn dispose(&self) {
        self.stop_worker();
        debug!("Session disposed");
    }
}

impl Drop for SessionService {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("identity", &self.identity())
            .field("worker", &lock(&self.worker).is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failure_screen(err: CicsError) -> FieldList {
    warn!(error = %err, "Turn failed");
    FieldList::error_screen(QUIT, &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::program::ProgramRegistry;
    use crate::terminal::ERROR_FIELD;

    fn service() -> SessionService {
        let mut programs = ProgramRegistry::new();
        programs.register_fn("WHOAMI", |ctx| {
            let user = ctx.assign_userid().to_string();
            ctx.put_container(None, "USER", user.as_bytes());
            Ok(ctx.return_(Some("WHO"), None))
        });
        let config = RegionConfig::default().with_transaction("WHO", "WHOAMI");
        SessionService::new(Arc::new(Region::new(config, programs).unwrap()))
    }

    #[test]
    fn test_initialize_validates_login() {
        let service = service();
        assert!(service.initialize("", None).is_err());
        service.initialize("alice", Some("t9")).unwrap();
        let identity = service.identity().unwrap();
        assert_eq!(identity.user_id, "ALICE");
        assert_eq!(identity.terminal_id, "T9");
    }

    #[test]
    fn test_run_turns_on_worker() {
        let service = service();
        service.initialize("alice", None).unwrap();
        let screen = service.run(FieldList::entry("WHO"));
        assert_eq!(screen.control.entry_or_key, "RETURN");
        let screen = service.run(FieldList::entry("NOPE"));
        assert!(screen.text(ERROR_FIELD).is_some());
        service.dispose();
    }

    #[test]
    fn test_run_after_dispose_restarts_worker() {
        let service = service();
        service.run(FieldList::entry("WHO"));
        service.dispose();
        let screen = service.run(FieldList::entry("WHO"));
        assert_eq!(screen.control.entry_or_key, "RETURN");
    }
}
