//! Freeze watchdog.
//!
//! A background thread watches for liveness pulses from the supervised loop.
//! When a full period passes without one it first asks the interpreter to
//! report back through the escalation hook; if the next period is missed as
//! well, the freeze is confirmed, dumped and the process is aborted.
//!
//! Shared timer state lives behind one mutex. The monitor thread is stopped
//! cooperatively through a per-arming [`ShutdownLatch`], which carries no
//! data.

use crate::config::WatchdogConfig;
use crate::reporter::Reporter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Delivers heartbeats while the watchdog is armed.
///
/// The host owns the actual scheduling (a timer on the supervised loop), so
/// heartbeats only arrive while that loop makes progress.
pub trait PulseScheduler: Send + Sync {
    /// Call `heartbeat.beat()` every `interval` until cancelled.
    fn schedule_pulse(&self, interval: Duration, heartbeat: Heartbeat);

    /// Stop the pulses started by `schedule_pulse`.
    fn cancel_pulse(&self) {}
}

/// Ends the process once a freeze has been dumped.
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

/// Production terminator: `abort()`, never a normal exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessAbort;

impl Terminate for ProcessAbort {
    fn terminate(&self) {
        std::process::abort();
    }
}

/// Observable watchdog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    Idle,
    Armed,
    Paused,
}

struct WatchdogState {
    last_liveness: Instant,
    period: Duration,
    sleeping: bool,
}

impl WatchdogState {
    fn deadline(&self) -> Option<Instant> {
        self.last_liveness.checked_add(self.period)
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.deadline()
            .map_or(Duration::MAX, |deadline| deadline.saturating_duration_since(now))
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now > deadline)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle that records a liveness pulse.
#[derive(Clone)]
pub struct Heartbeat {
    state: Arc<Mutex<WatchdogState>>,
}

impl Heartbeat {
    pub fn beat(&self) {
        lock(&self.state).last_liveness = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Open,
    Released,
    /// The monitor or the hook has claimed the arming to report a freeze.
    Fired,
}

/// Per-arming latch used only to wake and stop a monitor thread.
///
/// Releasing and firing are exclusive: once `destroy` has released the
/// latch no freeze can be reported for that arming, and once a freeze has
/// been claimed a release no longer stops it.
struct ShutdownLatch {
    state: Mutex<LatchState>,
    signal: Condvar,
}

impl ShutdownLatch {
    fn new() -> Self {
        ShutdownLatch {
            state: Mutex::new(LatchState::Open),
            signal: Condvar::new(),
        }
    }

    /// Returns false when a freeze was already claimed.
    fn release(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == LatchState::Fired {
            return false;
        }
        *state = LatchState::Released;
        drop(state);
        self.signal.notify_all();
        true
    }

    fn is_released(&self) -> bool {
        *lock(&self.state) == LatchState::Released
    }

    /// Claim the arming for a freeze report. Fails after a release.
    fn fire(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == LatchState::Released {
            return false;
        }
        *state = LatchState::Fired;
        true
    }

    /// Wait up to `timeout` for a release. Returns whether it was released.
    fn wait(&self, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, _) = self
            .signal
            .wait_timeout_while(state, timeout, |state| *state == LatchState::Open)
            .unwrap_or_else(PoisonError::into_inner);
        *state == LatchState::Released
    }
}

struct Arming {
    latch: Arc<ShutdownLatch>,
}

/// The watchdog control surface.
pub struct Watchdog {
    config: WatchdogConfig,
    state: Arc<Mutex<WatchdogState>>,
    arming: Mutex<Option<Arming>>,
    reporter: Arc<Reporter>,
    scheduler: Box<dyn PulseScheduler>,
    terminator: Arc<dyn Terminate>,
    monitors_spawned: AtomicUsize,
    monitors_running: Arc<AtomicUsize>,
}

impl Watchdog {
    pub fn new(
        config: WatchdogConfig,
        reporter: Arc<Reporter>,
        scheduler: Box<dyn PulseScheduler>,
        terminator: Arc<dyn Terminate>,
    ) -> Self {
        let period = config.effective_period(0);
        Watchdog {
            config,
            state: Arc::new(Mutex::new(WatchdogState {
                last_liveness: Instant::now(),
                period,
                sleeping: false,
            })),
            arming: Mutex::new(None),
            reporter,
            scheduler,
            terminator,
            monitors_spawned: AtomicUsize::new(0),
            monitors_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Arm the watchdog with a period of `requested` time-units.
    ///
    /// If it is already armed this only resumes it from a pause; the
    /// requested period is ignored and no second monitor is started.
    /// Returns whether a monitor thread was started.
    pub fn start(&self, requested: i64) -> bool {
        let mut arming = lock(&self.arming);
        if arming.is_some() {
            lock(&self.state).sleeping = false;
            log::info!("Watchdog resumed");
            return false;
        }

        let period = self.config.effective_period(requested);
        {
            let mut state = lock(&self.state);
            state.period = period;
            state.last_liveness = Instant::now();
            state.sleeping = false;
        }

        let latch = Arc::new(ShutdownLatch::new());
        let monitor = Monitor {
            state: self.state.clone(),
            latch: latch.clone(),
            reporter: self.reporter.clone(),
            terminator: self.terminator.clone(),
            escalation_hook: self.config.escalation_hook,
            running: self.monitors_running.clone(),
        };

        self.monitors_running.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("gcrash-watchdog".to_string())
            .spawn(move || monitor.run());
        if let Err(e) = spawned {
            self.monitors_running.fetch_sub(1, Ordering::SeqCst);
            log::error!("Failed to spawn watchdog thread: {}", e);
            return false;
        }
        self.monitors_spawned.fetch_add(1, Ordering::SeqCst);
        *arming = Some(Arming { latch });

        // Scheduled before the arming lock is released so a concurrent
        // destroy always cancels this pulse.
        self.scheduler
            .schedule_pulse(self.config.pulse_interval(period), self.heartbeat_handle());
        drop(arming);
        log::info!("Watchdog started with a period of {:?}", period);
        true
    }

    /// Suspend escalation without stopping the monitor thread.
    pub fn pause(&self) {
        let arming = lock(&self.arming);
        if arming.is_some() {
            lock(&self.state).sleeping = true;
            log::info!("Watchdog paused");
        }
    }

    /// Stop the monitor thread. The thread notices at its current wait and
    /// exits on its own; this never blocks on it.
    pub fn destroy(&self) -> bool {
        let Some(arming) = lock(&self.arming).take() else {
            return false;
        };
        if !arming.latch.release() {
            log::warn!("Watchdog destroyed while a freeze is being reported");
        }
        self.scheduler.cancel_pulse();
        log::info!("Watchdog destroyed");
        true
    }

    /// Record a liveness pulse. Legal in every state.
    pub fn heartbeat(&self) {
        lock(&self.state).last_liveness = Instant::now();
    }

    pub fn heartbeat_handle(&self) -> Heartbeat {
        Heartbeat {
            state: self.state.clone(),
        }
    }

    pub fn status(&self) -> WatchdogStatus {
        let arming = lock(&self.arming);
        match *arming {
            None => WatchdogStatus::Idle,
            Some(_) if lock(&self.state).sleeping => WatchdogStatus::Paused,
            Some(_) => WatchdogStatus::Armed,
        }
    }

    /// Called by the interpreter when the escalation hook fires.
    ///
    /// Confirms the freeze from the interpreter's own context, unless the
    /// watchdog has since been paused or destroyed; then the hook is removed
    /// and execution continues.
    pub fn escalation_triggered(&self) {
        let period = {
            let arming = lock(&self.arming);
            let state = lock(&self.state);
            match arming.as_ref() {
                Some(arming) if !state.sleeping && arming.latch.fire() => Some(state.period),
                _ => None,
            }
        };

        match period {
            Some(period) => {
                self.reporter.report_freeze(period);
                self.terminator.terminate();
            }
            None => {
                if let Some(context) = self.reporter.context() {
                    context.disarm_escalation_hook();
                }
                log::debug!("Escalation hook fired while inactive, removed it");
            }
        }
    }

    /// Number of monitor threads started so far.
    pub fn monitors_spawned(&self) -> usize {
        self.monitors_spawned.load(Ordering::SeqCst)
    }

    /// Number of monitor threads that have not exited yet.
    pub fn monitors_running(&self) -> usize {
        self.monitors_running.load(Ordering::SeqCst)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct Monitor {
    state: Arc<Mutex<WatchdogState>>,
    latch: Arc<ShutdownLatch>,
    reporter: Arc<Reporter>,
    terminator: Arc<dyn Terminate>,
    escalation_hook: bool,
    running: Arc<AtomicUsize>,
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Monitor {
    fn run(self) {
        let _running = RunningGuard(self.running.clone());
        let mut escalated_at: Option<Instant> = None;

        let mut state = lock(&self.state);
        let period = loop {
            let wait = state.remaining(Instant::now());
            drop(state);

            if self.latch.wait(wait) {
                log::debug!("Watchdog monitor exiting");
                return;
            }

            state = lock(&self.state);
            if self.latch.is_released() {
                return;
            }

            let now = Instant::now();
            if state.sleeping {
                state.last_liveness = now;
                if escalated_at.take().is_some() {
                    self.disarm();
                }
                continue;
            }

            if !state.expired(now) {
                // A heartbeat arrived while we waited.
                if escalated_at.is_some_and(|at| state.last_liveness > at) {
                    escalated_at = None;
                    self.disarm();
                    log::info!("Heartbeat resumed, escalation cancelled");
                }
                continue;
            }

            if self.escalation_hook && escalated_at.is_none() {
                log::warn!(
                    "No heartbeat for {:?}, arming the interpreter hook",
                    state.period
                );
                if let Some(context) = self.reporter.context() {
                    context.arm_escalation_hook();
                }
                state.last_liveness = now;
                escalated_at = Some(now);
                continue;
            }

            break state.period;
        };
        drop(state);

        if !self.latch.fire() {
            log::debug!("Watchdog destroyed before the freeze was reported");
            return;
        }
        self.reporter.report_freeze(period);
        self.terminator.terminate();
    }

    fn disarm(&self) {
        if let Some(context) = self.reporter.context() {
            context.disarm_escalation_hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExecutionContext, StackFrame};
    use crate::dump::DumpWriter;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicBool;

    const UNIT_MS: u64 = 20;

    #[derive(Default)]
    struct Recorder {
        terminated: AtomicUsize,
        hooks_armed: AtomicUsize,
        hooks_disarmed: AtomicUsize,
    }

    impl Terminate for Arc<Recorder> {
        fn terminate(&self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RecordingContext(Arc<Recorder>);

    impl ExecutionContext for RecordingContext {
        fn stack_frames(&self) -> Vec<StackFrame> {
            Vec::new()
        }

        fn arm_escalation_hook(&self) {
            self.0.hooks_armed.fetch_add(1, Ordering::SeqCst);
        }

        fn disarm_escalation_hook(&self) {
            self.0.hooks_disarmed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Pulses from a background thread, like a host timer on a healthy loop.
    #[derive(Default)]
    struct ThreadPulse {
        stop: Arc<AtomicBool>,
        intervals: Arc<Mutex<Vec<Duration>>>,
    }

    impl PulseScheduler for ThreadPulse {
        fn schedule_pulse(&self, interval: Duration, heartbeat: Heartbeat) {
            lock(&self.intervals).push(interval);
            let stop = self.stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    heartbeat.beat();
                    thread::sleep(interval);
                }
            });
        }

        fn cancel_pulse(&self) {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    /// A loop that never gets to run its timers.
    struct NoPulse;

    impl PulseScheduler for NoPulse {
        fn schedule_pulse(&self, _interval: Duration, _heartbeat: Heartbeat) {}
    }

    fn config(escalation_hook: bool) -> WatchdogConfig {
        WatchdogConfig {
            time_unit_ms: UNIT_MS,
            escalation_hook,
            ..Default::default()
        }
    }

    fn watchdog(
        dir: &Path,
        escalation_hook: bool,
        scheduler: Box<dyn PulseScheduler>,
    ) -> (Watchdog, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let reporter = Arc::new(Reporter::new(
            DumpWriter::new(dir, "luadump"),
            Some(Arc::new(RecordingContext(recorder.clone()))),
        ));
        let watchdog = Watchdog::new(
            config(escalation_hook),
            reporter,
            scheduler,
            Arc::new(recorder.clone()),
        );
        (watchdog, recorder)
    }

    fn units(n: u64) -> Duration {
        Duration::from_millis(n * UNIT_MS)
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn dump_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect()
    }

    #[test]
    fn test_pulses_keep_watchdog_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let pulse = ThreadPulse::default();
        let intervals = pulse.intervals.clone();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(pulse));

        assert!(watchdog.start(10));
        assert_eq!(*lock(&intervals), vec![units(10) / 3]);

        thread::sleep(units(60));
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.hooks_armed.load(Ordering::SeqCst), 0);
        assert!(dump_files(dir.path()).is_empty());

        watchdog.destroy();
    }

    #[test]
    fn test_missed_deadlines_escalate_then_dump() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        let started = Instant::now();
        watchdog.start(10);

        assert!(wait_until(units(100), || {
            recorder.terminated.load(Ordering::SeqCst) == 1
        }));
        assert!(
            started.elapsed() >= units(20),
            "two full periods pass before the freeze is confirmed"
        );
        assert_eq!(recorder.hooks_armed.load(Ordering::SeqCst), 1);

        let dumps = dump_files(dir.path());
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].starts_with("**Freeze detected"));
    }

    #[test]
    fn test_without_hook_first_miss_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), false, Box::new(NoPulse));

        let started = Instant::now();
        watchdog.start(10);
        assert!(wait_until(units(100), || {
            recorder.terminated.load(Ordering::SeqCst) == 1
        }));
        assert!(started.elapsed() >= units(10));
        assert!(started.elapsed() < units(20) + Duration::from_millis(150));
        assert_eq!(recorder.hooks_armed.load(Ordering::SeqCst), 0);
        assert_eq!(dump_files(dir.path()).len(), 1);
    }

    #[test]
    fn test_late_heartbeat_prevents_escalation() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), false, Box::new(NoPulse));

        watchdog.start(10);
        for _ in 0..8 {
            thread::sleep(units(6));
            watchdog.heartbeat();
        }
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        assert!(dump_files(dir.path()).is_empty());
        watchdog.destroy();
    }

    #[test]
    fn test_pause_suspends_escalation() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(10);
        watchdog.pause();
        assert_eq!(watchdog.status(), WatchdogStatus::Paused);

        thread::sleep(units(50));
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        assert!(dump_files(dir.path()).is_empty());

        // Resuming reuses the running monitor
        assert!(!watchdog.start(10));
        assert_eq!(watchdog.status(), WatchdogStatus::Armed);
        assert_eq!(watchdog.monitors_spawned(), 1);

        assert!(wait_until(units(100), || {
            recorder.terminated.load(Ordering::SeqCst) == 1
        }));
    }

    #[test]
    fn test_second_start_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, _recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        assert!(watchdog.start(30));
        assert!(!watchdog.start(10));
        assert!(!watchdog.start(50));
        assert_eq!(watchdog.monitors_spawned(), 1);
        assert_eq!(watchdog.monitors_running(), 1);

        watchdog.destroy();
    }

    #[test]
    fn test_destroy_stops_monitor_without_dump() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(10);
        thread::sleep(units(3));
        assert!(watchdog.destroy());
        assert_eq!(watchdog.status(), WatchdogStatus::Idle);

        assert!(wait_until(units(10), || watchdog.monitors_running() == 0));
        thread::sleep(units(30));
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        assert!(dump_files(dir.path()).is_empty());

        assert!(!watchdog.destroy(), "second destroy is a no-op");
    }

    #[test]
    fn test_restart_after_destroy_spawns_fresh_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, _recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(10);
        watchdog.destroy();
        assert!(watchdog.start(10));
        assert_eq!(watchdog.monitors_spawned(), 2);
        watchdog.destroy();
        assert!(wait_until(units(20), || watchdog.monitors_running() == 0));
    }

    #[test]
    fn test_operations_when_idle_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.heartbeat();
        watchdog.pause();
        assert!(!watchdog.destroy());
        assert_eq!(watchdog.status(), WatchdogStatus::Idle);
        assert_eq!(watchdog.monitors_spawned(), 0);

        // A pause while idle must not leak into the next arming
        watchdog.start(10);
        assert_eq!(watchdog.status(), WatchdogStatus::Armed);
        watchdog.destroy();
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hook_path_dumps_when_armed() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(30);
        watchdog.escalation_triggered();
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(dump_files(dir.path()).len(), 1);

        // The monitor reaching its own deadline later must not dump again
        watchdog.escalation_triggered();
        assert_eq!(dump_files(dir.path()).len(), 1);
        watchdog.destroy();
    }

    #[test]
    fn test_hook_path_disarms_when_paused() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(30);
        watchdog.pause();
        watchdog.escalation_triggered();
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.hooks_disarmed.load(Ordering::SeqCst), 1);
        assert!(dump_files(dir.path()).is_empty());
        watchdog.destroy();
    }

    #[test]
    fn test_latch_release_and_fire_are_exclusive() {
        let latch = ShutdownLatch::new();
        assert!(latch.release());
        assert!(latch.is_released());
        assert!(!latch.fire(), "no freeze is reported after a release");

        let latch = ShutdownLatch::new();
        assert!(latch.fire());
        assert!(!latch.release());
        assert!(!latch.is_released());
        assert!(!latch.wait(Duration::ZERO));
    }

    #[test]
    fn test_hook_after_destroy_does_not_dump() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(30);
        watchdog.destroy();
        watchdog.escalation_triggered();
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        assert!(dump_files(dir.path()).is_empty());
    }

    /// Tracks whether a pulse is currently scheduled.
    #[derive(Clone, Default)]
    struct FlagPulse(Arc<AtomicBool>);

    impl PulseScheduler for FlagPulse {
        fn schedule_pulse(&self, _interval: Duration, _heartbeat: Heartbeat) {
            self.0.store(true, Ordering::SeqCst);
        }

        fn cancel_pulse(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_concurrent_start_and_destroy_leave_no_stray_pulse() {
        let dir = tempfile::tempdir().unwrap();
        let pulse = FlagPulse::default();
        let scheduled = pulse.0.clone();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(pulse));

        for _ in 0..200 {
            thread::scope(|scope| {
                scope.spawn(|| watchdog.start(10));
                scope.spawn(|| watchdog.destroy());
            });
            assert_eq!(
                scheduled.load(Ordering::SeqCst),
                watchdog.status() != WatchdogStatus::Idle
            );
            watchdog.destroy();
            assert!(!scheduled.load(Ordering::SeqCst));
        }

        assert!(wait_until(units(20), || watchdog.monitors_running() == 0));
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_heartbeat_after_escalation_cancels_it() {
        let dir = tempfile::tempdir().unwrap();
        let (watchdog, recorder) = watchdog(dir.path(), true, Box::new(NoPulse));

        watchdog.start(10);
        assert!(wait_until(units(30), || {
            recorder.hooks_armed.load(Ordering::SeqCst) == 1
        }));
        for _ in 0..6 {
            thread::sleep(units(4));
            watchdog.heartbeat();
        }
        assert!(wait_until(units(20), || {
            recorder.hooks_disarmed.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(recorder.terminated.load(Ordering::SeqCst), 0);
        watchdog.destroy();
    }
}
