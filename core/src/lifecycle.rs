//! Lifecycle and signal control
//!
//! Every process (supervisor or worker) owns exactly one set of the flags
//! below. After `fork` the child gets a private copy and resets it through
//! [`enter_worker`]. Handlers only store into atomics; anything that needs
//! the group table (broadcasting a stop, escalating to SIGKILL) happens in
//! the supervisor's own control flow once a blocking call returns `EINTR`.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{StressError, StressResult};

static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);
static WAIT_FLAG: AtomicBool = AtomicBool::new(true);
static TIMED_OUT: AtomicBool = AtomicBool::new(false);
static DUMP_REQUESTED: AtomicBool = AtomicBool::new(false);
static CAUGHT_SIGNAL: AtomicI32 = AtomicI32::new(0);
static STOP_EVENTS: AtomicU32 = AtomicU32::new(0);
static CHILD_EVENTS: AtomicU32 = AtomicU32::new(0);

/// Signals that interrupt a run and are turned into a cooperative stop
pub const INTERRUPT_SIGNALS: &[Signal] = &[
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGVTALRM,
];

/// Signal used for the global timeout and for cooperative stop broadcasts
pub const TIMEOUT_SIGNAL: Signal = Signal::SIGALRM;

/// Signal requesting a resource snapshot from the supervisor
pub const DUMP_SIGNAL: Signal = Signal::SIGUSR2;

/// Signal telling the supervisor that some worker changed state
pub const CHILD_SIGNAL: Signal = Signal::SIGCHLD;

/// Kill requests after which the configured signal is replaced by SIGKILL
pub const KILL_ESCALATION_THRESHOLD: u32 = 5;

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Spawning and waiting for the stop condition
    Running,
    /// Stop requested, reaping what is left
    Draining,
    /// Every worker has been reaped
    Done,
}

/// Worker state, as seen from inside the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// The workload loop may continue
    Running,
    /// The keep-running flag has been cleared
    Stopping,
}

/// Process-local cancellation token handed to workloads
///
/// Copying the token is cheap; all copies observe the same process flag.
#[derive(Clone, Copy)]
pub struct StopToken {
    flag: &'static AtomicBool,
}

impl StopToken {
    /// Token for the calling process
    pub fn current() -> Self {
        Self {
            flag: &KEEP_RUNNING,
        }
    }

    /// Should the caller keep going?
    #[inline]
    pub fn keep_running(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Ask every holder of this token to stop
    pub fn stop(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Current state of the owning worker
    pub fn state(&self) -> WorkerState {
        if self.keep_running() {
            WorkerState::Running
        } else {
            WorkerState::Stopping
        }
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("keep_running", &self.keep_running())
            .finish()
    }
}

/// Reset all flags at the start of a supervisor run
pub fn reset() {
    KEEP_RUNNING.store(true, Ordering::SeqCst);
    WAIT_FLAG.store(true, Ordering::SeqCst);
    TIMED_OUT.store(false, Ordering::SeqCst);
    DUMP_REQUESTED.store(false, Ordering::SeqCst);
    CAUGHT_SIGNAL.store(0, Ordering::SeqCst);
    STOP_EVENTS.store(0, Ordering::SeqCst);
    CHILD_EVENTS.store(0, Ordering::SeqCst);
}

/// Re-arm the flags for the next sequential round
///
/// Returns false once an interrupt signal has ended the whole run; a
/// timeout only ends the current round.
pub fn begin_round() -> bool {
    if CAUGHT_SIGNAL.load(Ordering::SeqCst) != 0 {
        return false;
    }
    KEEP_RUNNING.store(true, Ordering::SeqCst);
    WAIT_FLAG.store(true, Ordering::SeqCst);
    TIMED_OUT.store(false, Ordering::SeqCst);
    true
}

/// Reset the inherited flags in a freshly forked worker
pub fn enter_worker() {
    KEEP_RUNNING.store(true, Ordering::SeqCst);
    WAIT_FLAG.store(true, Ordering::SeqCst);
    CAUGHT_SIGNAL.store(0, Ordering::SeqCst);
    DUMP_REQUESTED.store(false, Ordering::SeqCst);
}

/// Is the process still expected to keep going?
pub fn keep_running() -> bool {
    KEEP_RUNNING.load(Ordering::SeqCst)
}

/// Request a stop from ordinary (non-handler) code, e.g. on `--abort`
pub fn request_stop() {
    KEEP_RUNNING.store(false, Ordering::SeqCst);
    WAIT_FLAG.store(false, Ordering::SeqCst);
}

/// Should the supervisor keep idling in its wait phase?
pub fn wait_flag() -> bool {
    WAIT_FLAG.load(Ordering::SeqCst)
}

/// Did the global timeout fire?
pub fn timed_out() -> bool {
    TIMED_OUT.load(Ordering::SeqCst)
}

/// Number of asynchronous stop events (interrupts and alarms) seen so far
pub fn stop_events() -> u32 {
    STOP_EVENTS.load(Ordering::SeqCst)
}

/// Number of SIGCHLD deliveries seen so far
pub fn child_events() -> u32 {
    CHILD_EVENTS.load(Ordering::SeqCst)
}

/// Signal that interrupted the process, if any
pub fn caught_signal() -> Option<Signal> {
    match CAUGHT_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        n => Signal::try_from(n).ok(),
    }
}

/// Consume a pending resource-snapshot request
pub fn take_dump_request() -> bool {
    DUMP_REQUESTED.swap(false, Ordering::SeqCst)
}

extern "C" fn supervisor_interrupt(signum: libc::c_int) {
    CAUGHT_SIGNAL.store(signum, Ordering::SeqCst);
    KEEP_RUNNING.store(false, Ordering::SeqCst);
    WAIT_FLAG.store(false, Ordering::SeqCst);
    STOP_EVENTS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn supervisor_alarm(_signum: libc::c_int) {
    TIMED_OUT.store(true, Ordering::SeqCst);
    KEEP_RUNNING.store(false, Ordering::SeqCst);
    WAIT_FLAG.store(false, Ordering::SeqCst);
    STOP_EVENTS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn supervisor_dump(_signum: libc::c_int) {
    DUMP_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn supervisor_child(_signum: libc::c_int) {
    CHILD_EVENTS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn worker_interrupt(signum: libc::c_int) {
    CAUGHT_SIGNAL.store(signum, Ordering::SeqCst);
    KEEP_RUNNING.store(false, Ordering::SeqCst);
}

extern "C" fn worker_alarm(_signum: libc::c_int) {
    KEEP_RUNNING.store(false, Ordering::SeqCst);
}

/// Restores the previous signal dispositions when dropped
pub struct HandlerGuard {
    previous: Vec<(Signal, SigAction)>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        for (signal, action) in self.previous.drain(..).rev() {
            // SAFETY: restoring a disposition we previously read back from the kernel.
            let _ = unsafe { sigaction(signal, &action) };
        }
    }
}

impl HandlerGuard {
    fn set(&mut self, signal: Signal, handler: SigHandler, flags: SaFlags) -> StressResult<()> {
        // No SA_RESTART: blocking waits must return EINTR so the caller can
        // react to the flags the handler just set.
        let action = SigAction::new(handler, flags, SigSet::empty());
        // SAFETY: the handlers only touch atomics.
        let previous = unsafe { sigaction(signal, &action) }
            .map_err(|e| StressError::Signal(format!("cannot install {signal} handler: {e}")))?;
        self.previous.push((signal, previous));
        Ok(())
    }
}

fn install(
    handlers: &[(Signal, extern "C" fn(libc::c_int))],
) -> StressResult<HandlerGuard> {
    let mut guard = HandlerGuard {
        previous: Vec::with_capacity(handlers.len() + 1),
    };
    for &(signal, handler) in handlers {
        guard.set(signal, SigHandler::Handler(handler), SaFlags::empty())?;
    }
    Ok(guard)
}

/// Install the supervisor's handlers for interrupts, timeout, dumps and
/// worker exits
pub fn install_supervisor_handlers() -> StressResult<HandlerGuard> {
    let mut handlers: Vec<(Signal, extern "C" fn(libc::c_int))> = INTERRUPT_SIGNALS
        .iter()
        .map(|&s| (s, supervisor_interrupt as extern "C" fn(libc::c_int)))
        .collect();
    handlers.push((TIMEOUT_SIGNAL, supervisor_alarm));
    handlers.push((DUMP_SIGNAL, supervisor_dump));
    let mut guard = install(&handlers)?;
    // Only exits matter; stopped or continued workers must not wake the reaper.
    guard.set(
        CHILD_SIGNAL,
        SigHandler::Handler(supervisor_child),
        SaFlags::SA_NOCLDSTOP,
    )?;
    Ok(guard)
}

/// Install a worker's handlers; the guard is leaked since workers never return
pub fn install_worker_handlers() -> StressResult<()> {
    let mut handlers: Vec<(Signal, extern "C" fn(libc::c_int))> = INTERRUPT_SIGNALS
        .iter()
        .map(|&s| (s, worker_interrupt as extern "C" fn(libc::c_int)))
        .collect();
    handlers.push((TIMEOUT_SIGNAL, worker_alarm));
    std::mem::forget(install(&handlers)?);

    // The dump signal is supervisor-only; the default action would kill us.
    // SAFETY: SIG_IGN has no handler code.
    unsafe {
        sigaction(
            DUMP_SIGNAL,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )
    }
    .map_err(|e| StressError::Signal(format!("cannot ignore {DUMP_SIGNAL}: {e}")))?;

    // Workloads that fork their own helpers get the default disposition back.
    // SAFETY: SIG_DFL has no handler code.
    unsafe {
        sigaction(
            CHILD_SIGNAL,
            &SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
        )
    }
    .map_err(|e| StressError::Signal(format!("cannot reset {CHILD_SIGNAL}: {e}")))?;
    Ok(())
}

/// Picks the signal for each successive forced-termination request
#[derive(Debug, Clone)]
pub struct KillEscalation {
    requests: u32,
    signal: Signal,
    threshold: u32,
}

impl KillEscalation {
    /// Escalation starting with `signal`
    pub fn new(signal: Signal) -> Self {
        Self {
            requests: 0,
            signal,
            threshold: KILL_ESCALATION_THRESHOLD,
        }
    }

    /// Record a request and return the signal to send for it
    pub fn next_signal(&mut self) -> Signal {
        self.requests += 1;
        if self.requests > self.threshold {
            Signal::SIGKILL
        } else {
            self.signal
        }
    }

    /// Requests made so far
    pub fn requests(&self) -> u32 {
        self.requests
    }
}
