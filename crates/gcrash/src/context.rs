//! The interpreter whose execution is being diagnosed.
//!
//! gcrash does not talk to Lua directly. The host module implements
//! [`ExecutionContext`] for its interpreter so the dump writer can walk the
//! stack and the watchdog can arm the escalation hook.

/// What kind of function a stack frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A Lua function.
    Lua,
    /// The main chunk of a script.
    Main,
    /// A native (C) function.
    Native,
    /// A tail call whose caller frame is gone.
    Tail,
}

impl FrameKind {
    /// Map the interpreter's `what` field.
    pub fn from_what(what: &str) -> Self {
        match what {
            "C" => FrameKind::Native,
            "main" => FrameKind::Main,
            "tail" => FrameKind::Tail,
            _ => FrameKind::Lua,
        }
    }
}

/// One frame of the interpreter's call stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub level: usize,
    pub kind: FrameKind,
    /// Printable source locator (`short_src`).
    pub source: String,
    pub current_line: i32,
    pub name: Option<String>,
    /// How the name was found ("global", "local", "method", "field", ...).
    pub name_what: Option<String>,
    pub line_defined: i32,
    pub last_line_defined: i32,
}

impl StackFrame {
    /// Format the frame as one traceback line (without the newline).
    pub fn traceback_line(&self) -> String {
        match self.kind {
            FrameKind::Native => format!(
                "#{}\t{} in {}()",
                self.level,
                self.source,
                self.name.as_deref().unwrap_or("?")
            ),
            _ => format!(
                "#{}\t{}:{} in {} {}() <{}-{}>",
                self.level,
                self.source,
                self.current_line,
                self.name_what.as_deref().unwrap_or("anonymous"),
                self.name.as_deref().unwrap_or("function"),
                self.line_defined,
                self.last_line_defined
            ),
        }
    }
}

/// Access to the supervised interpreter.
///
/// Implementations are called from the thread that detected the incident,
/// which may be the watchdog thread or a signal handler. They should read
/// the interpreter's state without taking locks the interpreter thread
/// could be holding.
pub trait ExecutionContext: Send + Sync {
    /// The current call stack, innermost frame first.
    fn stack_frames(&self) -> Vec<StackFrame>;

    /// Install the escalation hook so the interpreter reports back the next
    /// time it executes code.
    fn arm_escalation_hook(&self) {}

    /// Remove a previously installed escalation hook.
    fn disarm_escalation_hook(&self) {}
}
