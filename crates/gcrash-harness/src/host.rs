//! A simulated game server: an interpreter with a fixed call stack and a
//! host loop that runs timers while the interpreter makes progress.

use crate::cli::{HandlerKind, StallMode};
use gcrash::{Diagnostics, ExecutionContext, FrameKind, Heartbeat, PulseScheduler, StackFrame};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// What the simulated script is doing, which decides the innermost frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Ticking = 0,
    Spinning = 1,
    Blocked = 2,
    Crashing = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Spinning,
            2 => Phase::Blocked,
            3 => Phase::Crashing,
            _ => Phase::Ticking,
        }
    }
}

/// Interpreter stand-in. Its state is lock-free so the stack can be read
/// from a signal handler.
#[derive(Default)]
pub struct SimulatedInterpreter {
    phase: AtomicU8,
    hook_armed: AtomicBool,
}

fn lua_frame(source: &str, line: i32, name: &str, name_what: &str, lines: (i32, i32)) -> StackFrame {
    StackFrame {
        level: 0,
        kind: FrameKind::Lua,
        source: source.to_string(),
        current_line: line,
        name: Some(name.to_string()),
        name_what: Some(name_what.to_string()),
        line_defined: lines.0,
        last_line_defined: lines.1,
    }
}

fn native_frame(name: &str) -> StackFrame {
    StackFrame {
        level: 0,
        kind: FrameKind::Native,
        source: "[C]".to_string(),
        current_line: -1,
        name: Some(name.to_string()),
        name_what: Some("field".to_string()),
        line_defined: -1,
        last_line_defined: -1,
    }
}

impl SimulatedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub fn hook_armed(&self) -> bool {
        self.hook_armed.load(Ordering::SeqCst)
    }

    /// Execute one step of script code, returning whether the escalation
    /// hook fired.
    pub fn step(&self) -> bool {
        self.hook_armed()
    }
}

impl ExecutionContext for SimulatedInterpreter {
    fn stack_frames(&self) -> Vec<StackFrame> {
        let mut frames = match self.phase() {
            Phase::Ticking => vec![],
            Phase::Spinning => vec![lua_frame(
                "lua/harness/stall.lua",
                6,
                "spin",
                "local",
                (4, 8),
            )],
            Phase::Blocked => vec![native_frame("sleep")],
            Phase::Crashing => vec![native_frame("crash")],
        };
        frames.push(lua_frame(
            "lua/harness/tick.lua",
            14,
            "Think",
            "method",
            (10, 18),
        ));
        frames.push(StackFrame {
            name: None,
            name_what: None,
            kind: FrameKind::Main,
            ..lua_frame("lua/harness/init.lua", 30, "", "", (0, 42))
        });

        for (level, frame) in frames.iter_mut().enumerate() {
            frame.level = level;
        }
        frames
    }

    fn arm_escalation_hook(&self) {
        self.hook_armed.store(true, Ordering::SeqCst);
    }

    fn disarm_escalation_hook(&self) {
        self.hook_armed.store(false, Ordering::SeqCst);
    }
}

struct PulseTimer {
    interval: Duration,
    heartbeat: Heartbeat,
    next_due: Instant,
}

/// Repeating timers run by the host loop, like the server's `timer` library.
#[derive(Clone, Default)]
pub struct LoopTimers {
    pulse: Arc<Mutex<Option<PulseTimer>>>,
}

impl LoopTimers {
    /// Fire the pulse timer if it is due.
    pub fn run_due(&self) {
        let mut pulse = self.pulse.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = pulse.as_mut() {
            let now = Instant::now();
            if now >= timer.next_due {
                timer.heartbeat.beat();
                timer.next_due = now + timer.interval;
            }
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.pulse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl PulseScheduler for LoopTimers {
    fn schedule_pulse(&self, interval: Duration, heartbeat: Heartbeat) {
        log::debug!("Pulse timer every {:?}", interval);
        *self.pulse.lock().unwrap_or_else(PoisonError::into_inner) = Some(PulseTimer {
            interval,
            heartbeat,
            next_due: Instant::now() + interval,
        });
    }

    fn cancel_pulse(&self) {
        *self.pulse.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Register the crash handler described by `kind`.
pub fn register_handler(diagnostics: &Diagnostics, kind: HandlerKind) {
    match kind {
        HandlerKind::None => {}
        HandlerKind::Ok => diagnostics.set_crash_handler(Some(Box::new(
            |emit: &mut dyn FnMut(&str)| -> Result<(), String> {
                emit("map: gm_construct");
                emit("players: 12");
                Ok(())
            },
        ))),
        HandlerKind::Fail => diagnostics.set_crash_handler(Some(Box::new(
            |emit: &mut dyn FnMut(&str)| -> Result<(), String> {
                emit("map: gm_construct");
                Err("lua/harness/handler.lua:7: attempt to index a nil value".to_string())
            },
        ))),
        HandlerKind::Replaced => {
            diagnostics.set_crash_handler(Some(Box::new(
                |emit: &mut dyn FnMut(&str)| -> Result<(), String> {
                    emit("stale handler");
                    Ok(())
                },
            )));
            diagnostics.set_crash_handler(Some(Box::new(
                |emit: &mut dyn FnMut(&str)| -> Result<(), String> {
                    emit("current handler");
                    Ok(())
                },
            )));
        }
    }
}

/// Schedule of a watchdog run, in time-units.
#[derive(Debug, Clone)]
pub struct WatchdogPlan {
    pub period: i64,
    pub run_for: u64,
    pub stall_after: Option<u64>,
    pub stall: StallMode,
    pub pause_after: Option<u64>,
    pub restart_after: Option<u64>,
}

/// The host loop. Returns after `run_for` unless the watchdog ends the
/// process first.
pub struct HostLoop<'a> {
    pub diagnostics: &'a Diagnostics,
    pub interpreter: &'a SimulatedInterpreter,
    pub timers: &'a LoopTimers,
    pub unit: Duration,
}

impl HostLoop<'_> {
    fn tick(&self) -> Duration {
        (self.unit / 10).max(Duration::from_millis(1))
    }

    fn reached(&self, elapsed: Duration, units: Option<u64>) -> bool {
        units.is_some_and(|units| elapsed >= self.units(units))
    }

    fn units(&self, units: u64) -> Duration {
        self.unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    pub fn run(&self, plan: &WatchdogPlan) {
        self.diagnostics.start_watchdog(plan.period);

        let start = Instant::now();
        let mut paused = false;
        let mut restarted = false;
        let mut stalled = false;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= self.units(plan.run_for) {
                break;
            }

            if !paused && self.reached(elapsed, plan.pause_after) {
                log::info!("Script pauses the watchdog");
                self.diagnostics.stop_watchdog();
                paused = true;
            }
            if !restarted && self.reached(elapsed, plan.restart_after) {
                log::info!("Script starts the watchdog again");
                self.diagnostics.start_watchdog(plan.period);
                restarted = true;
            }
            if !stalled && self.reached(elapsed, plan.stall_after) {
                log::warn!("Interpreter stalls ({:?})", plan.stall);
                self.interpreter.set_phase(match plan.stall {
                    StallMode::Spin => Phase::Spinning,
                    StallMode::Block => Phase::Blocked,
                });
                stalled = true;
            }

            let executing = !stalled || plan.stall == StallMode::Spin;
            if !stalled {
                self.timers.run_due();
            }
            if executing && self.interpreter.step() {
                self.diagnostics.escalation_triggered();
            }
            thread::sleep(self.tick());
        }

        self.diagnostics.destroy_watchdog();
        debug_assert!(!self.timers.is_scheduled());
    }
}
