//! Out-of-band abort delivery from a provider's monitor thread to the thread
//! running the tracked work.
//!
//! One [`AbortRegistration`] may be active per process. The provider gets an
//! [`AbortCallback`] from it; invoking the callback records the diagnostic and
//! only then raises the flag, so a thread that observes the flag always sees
//! the message. The tracked thread notices the abort at its next interruption
//! point: [`checkpoint`], [`sleep`], or the end of [`crate::TrackingSession::run`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, TrackerError};

/// Invoked by a provider's monitor thread with a diagnostic message.
pub type AbortCallback = Arc<dyn Fn(&str) + Send + Sync>;

const FOREIGN_THREAD_POLL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct AbortState {
    aborted: AtomicBool,
    message: Mutex<Option<String>>,
    thread: Thread,
}

impl AbortState {
    fn signal(&self, message: &str) {
        {
            let mut slot = self.message.lock();
            if let Some(first) = slot.as_ref() {
                tracing::warn!(
                    first = %first,
                    ignored = %message,
                    "Abort already signalled, ignoring"
                );
                return;
            }
            let message = if message.trim().is_empty() {
                "fatal condition reported without a message".to_string()
            } else {
                message.to_string()
            };
            *slot = Some(message);
        }
        self.aborted.store(true, Ordering::Release);
        self.thread.unpark();
    }

    fn check(&self) -> Result<()> {
        if !self.aborted.load(Ordering::Acquire) {
            return Ok(());
        }
        let message = self.message.lock().clone().unwrap_or_default();
        Err(TrackerError::AbortedDuringWork(message))
    }
}

fn active_cell() -> &'static Mutex<Option<Arc<AbortState>>> {
    static CELL: OnceLock<Mutex<Option<Arc<AbortState>>>> = OnceLock::new();
    CELL.get_or_init(|| Mutex::new(None))
}

fn active() -> Option<Arc<AbortState>> {
    active_cell().lock().clone()
}

/// The process-wide interrupt handler slot.
pub struct AbortChannel;

impl AbortChannel {
    /// Install the handler for the calling thread.
    ///
    /// Fails with [`TrackerError::AbortChannelBusy`] while another registration
    /// is alive; the existing one is left untouched.
    pub fn install() -> Result<AbortRegistration> {
        let mut slot = active_cell().lock();
        if slot.is_some() {
            return Err(TrackerError::AbortChannelBusy);
        }
        let state = Arc::new(AbortState {
            aborted: AtomicBool::new(false),
            message: Mutex::new(None),
            thread: thread::current(),
        });
        *slot = Some(state.clone());
        tracing::debug!(thread = ?state.thread.id(), "Abort channel installed");
        Ok(AbortRegistration { state })
    }

    pub fn is_active() -> bool {
        active_cell().lock().is_some()
    }
}

/// Live registration. Dropping it tears the handler down.
#[derive(Debug)]
pub struct AbortRegistration {
    state: Arc<AbortState>,
}

impl AbortRegistration {
    /// Callback to hand to the provider. Signals after teardown are ignored.
    pub fn callback(&self) -> AbortCallback {
        let weak: Weak<AbortState> = Arc::downgrade(&self.state);
        Arc::new(move |message: &str| match weak.upgrade() {
            Some(state) => state.signal(message),
            None => tracing::debug!(msg = message, "Abort signalled after teardown, ignoring"),
        })
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    /// The recorded diagnostic, once aborted
    pub fn message(&self) -> Option<String> {
        if self.is_aborted() {
            self.state.message.lock().clone()
        } else {
            None
        }
    }

    pub fn check(&self) -> Result<()> {
        self.state.check()
    }
}

impl Drop for AbortRegistration {
    fn drop(&mut self) {
        let mut slot = active_cell().lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &self.state)) {
            *slot = None;
            tracing::debug!("Abort channel removed");
        }
    }
}

/// Interruption point for the tracked work. A no-op when nothing is installed.
pub fn checkpoint() -> Result<()> {
    match active() {
        Some(state) => state.check(),
        None => Ok(()),
    }
}

/// Sleep for `duration`, returning early with the abort error if one arrives.
pub fn sleep(duration: Duration) -> Result<()> {
    let Some(state) = active() else {
        thread::sleep(duration);
        return Ok(());
    };
    let own_thread = state.thread.id() == thread::current().id();
    let deadline = Instant::now() + duration;
    loop {
        state.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let remaining = deadline - now;
        if own_thread {
            thread::park_timeout(remaining);
        } else {
            thread::park_timeout(remaining.min(FOREIGN_THREAD_POLL));
        }
    }
}
