//! Advisory working-directory lock
//!
//! At most one holder at a time: either one external git process, identified
//! by pid, or the mount itself. External requests are only granted while the
//! mount is `Ready` and its background pipeline reports it can step aside.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use common::protocol::{AcquireLockResponse, AcquireLockResult, LockData, MountState};

use crate::mount::state::MountStateCell;

/// How often a lock holder's process is checked for liveness
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Deny reason reported when readiness was never wired up
const NOT_READY_MESSAGE: &str = "Waiting for the mount to finish starting";

/// Whether the mount's own pipeline can let an external process take the lock.
pub trait ExternalLockReadiness: Send + Sync {
    /// `Err` carries a human-readable deny message.
    fn is_ready_for_external_acquire_lock_requests(&self, requester: &LockData)
        -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockHolder {
    External(LockData),
    Mount,
}

/// Git command session the mount is currently working on behalf of.
///
/// Background worker spans carry it so their log lines can be tied to a command.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    git_session: Arc<RwLock<Option<String>>>,
}

impl SessionContext {
    pub fn set_git_command_session_id(&self, session_id: &str) {
        let value = (!session_id.is_empty()).then(|| session_id.to_string());
        *self.git_session.write() = value;
    }

    pub fn clear(&self) {
        *self.git_session.write() = None;
    }

    pub fn git_command_session_id(&self) -> Option<String> {
        self.git_session.read().clone()
    }
}

pub struct LockArbiter {
    holder: Mutex<Option<LockHolder>>,
    mount_state: MountStateCell,
    readiness: RwLock<Option<Arc<dyn ExternalLockReadiness>>>,
    session: SessionContext,
    liveness_interval: Duration,
    /// Pids with a liveness watcher running
    watched: Mutex<HashSet<u32>>,
}

impl std::fmt::Debug for LockArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockArbiter")
            .field("holder", &*self.holder.lock())
            .field("mount_state", &self.mount_state.get())
            .finish()
    }
}

impl LockArbiter {
    pub fn new(mount_state: MountStateCell, session: SessionContext) -> Self {
        Self {
            holder: Mutex::new(None),
            mount_state,
            readiness: RwLock::new(None),
            session,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            watched: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Install the background pipeline's readiness predicate.
    pub fn set_readiness(&self, readiness: Arc<dyn ExternalLockReadiness>) {
        *self.readiness.write() = Some(readiness);
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn current_holder(&self) -> Option<LockHolder> {
        self.holder.lock().clone()
    }

    /// Pure query: can an external process take the lock right now?
    ///
    /// Returns the external holder when one is blocking.
    pub fn is_lock_available_for_external_requestor(&self) -> (bool, Option<LockData>) {
        match &*self.holder.lock() {
            None => (true, None),
            Some(LockHolder::Mount) => (false, None),
            Some(LockHolder::External(holder)) => (false, Some(holder.clone())),
        }
    }

    /// Take the lock for `requester` if nobody else holds it.
    ///
    /// A process that already holds the lock may take it again. Nothing is
    /// granted unless the mount is `Ready` while the holder is being set. On
    /// failure the blocking external holder, if any, is returned unchanged.
    pub fn try_acquire_lock_for_external_requestor(
        &self,
        requester: &LockData,
    ) -> (bool, Option<LockData>) {
        let mut holder = self.holder.lock();
        if self.mount_state.get() != MountState::Ready {
            return (false, None);
        }
        match &*holder {
            Some(LockHolder::Mount) => (false, None),
            Some(LockHolder::External(current)) if current.pid != requester.pid => {
                (false, Some(current.clone()))
            }
            _ => {
                *holder = Some(LockHolder::External(requester.clone()));
                drop(holder);
                self.session
                    .set_git_command_session_id(&requester.git_command_session_id);
                tracing::info!(holder = %requester, "lock acquired by external process");
                (true, None)
            }
        }
    }

    /// Clear the lock if `pid` holds it. Returns whether anything was released.
    pub fn release_lock_held_by_external_process(&self, pid: u32) -> bool {
        let mut holder = self.holder.lock();
        match &*holder {
            Some(LockHolder::External(current)) if current.pid == pid => {
                tracing::info!(holder = %current, "lock released by external process");
                *holder = None;
                drop(holder);
                self.session.clear();
                true
            }
            other => {
                tracing::debug!(pid, holder = ?other, "ignoring release from a process that does not hold the lock");
                false
            }
        }
    }

    /// Take the lock on behalf of the mount itself.
    pub fn try_acquire_lock_for_mount(&self) -> bool {
        let mut holder = self.holder.lock();
        match &*holder {
            None | Some(LockHolder::Mount) => {
                *holder = Some(LockHolder::Mount);
                true
            }
            Some(LockHolder::External(_)) => false,
        }
    }

    pub fn release_lock_held_by_mount(&self) {
        let mut holder = self.holder.lock();
        if matches!(&*holder, Some(LockHolder::Mount)) {
            *holder = None;
        }
    }

    /// Drop whatever holder is recorded. Used at teardown.
    pub fn clear(&self) {
        *self.holder.lock() = None;
        self.session.clear();
    }

    /// Human-readable description for status output.
    pub fn status(&self) -> String {
        match &*self.holder.lock() {
            None => "Free".to_string(),
            Some(LockHolder::Mount) => "Held by mount".to_string(),
            Some(LockHolder::External(holder)) => format!("Held by {}", holder),
        }
    }

    fn readiness_check(&self, requester: &LockData) -> Result<(), String> {
        match &*self.readiness.read() {
            Some(readiness) => readiness.is_ready_for_external_acquire_lock_requests(requester),
            None => Err(NOT_READY_MESSAGE.to_string()),
        }
    }

    /// Decide an `AcquireLock` request.
    ///
    /// Unmounting is checked before anything else, then mount readiness, then
    /// the holder. Availability checks never change the holder.
    pub fn handle_acquire_request(self: &Arc<Self>, requester: &LockData) -> AcquireLockResponse {
        match self.mount_state.get() {
            MountState::Unmounting => {
                tracing::info!(requester = %requester, "lock request denied, unmount in progress");
                return AcquireLockResponse::new(AcquireLockResult::UnmountInProgress);
            }
            MountState::Ready => {}
            _ => return AcquireLockResponse::new(AcquireLockResult::MountNotReady),
        }

        let (available, blocking) = self.is_lock_available_for_external_requestor();
        let ready = self.readiness_check(requester);

        if requester.check_availability_only {
            return match (ready, blocking) {
                (Ok(()), _) if available => AcquireLockResponse::new(AcquireLockResult::Available),
                (_, Some(holder)) => AcquireLockResponse::deny_git(holder),
                (Err(message), None) => AcquireLockResponse::deny_mount(message),
                (Ok(()), None) => AcquireLockResponse::deny_mount(
                    "Waiting for the mount to release the lock",
                ),
            };
        }

        if let Err(message) = ready {
            return AcquireLockResponse::deny_mount(message);
        }

        match self.try_acquire_lock_for_external_requestor(requester) {
            (true, _) => {
                self.watch_holder(requester.pid);
                AcquireLockResponse::new(AcquireLockResult::Acquired)
            }
            (false, Some(holder)) => AcquireLockResponse::deny_git(holder),
            (false, None) if self.mount_state.get() == MountState::Unmounting => {
                tracing::info!(requester = %requester, "lock request denied, unmount in progress");
                AcquireLockResponse::new(AcquireLockResult::UnmountInProgress)
            }
            (false, None) => {
                AcquireLockResponse::deny_mount("Waiting for the mount to release the lock")
            }
        }
    }

    /// Release the lock automatically if `pid` exits without releasing it.
    ///
    /// At most one watcher runs per pid, however often it re-acquires.
    fn watch_holder(self: &Arc<Self>, pid: u32) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if !self.watched.lock().insert(pid) {
            return;
        }

        let arbiter = Arc::downgrade(self);
        let interval = self.liveness_interval;
        runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(arbiter) = arbiter.upgrade() else {
                    return;
                };

                // checked under `watched` so a re-acquire cannot slip in
                // between this check and the removal
                let mut watched = arbiter.watched.lock();
                let still_held = matches!(
                    arbiter.current_holder(),
                    Some(LockHolder::External(ref holder)) if holder.pid == pid
                );
                if !still_held {
                    watched.remove(&pid);
                    return;
                }

                if !process_is_alive(pid) {
                    tracing::info!(pid, "lock holder exited without releasing the lock");
                    arbiter.release_lock_held_by_external_process(pid);
                    watched.remove(&pid);
                    return;
                }
            }
        });
    }
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // 0 and negatives address process groups
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission check
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    true
}
