use thiserror::Error;

use crate::bytecode::DebugInformation;

use super::external::ExternalError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    #[error("division by zero")]
    DivisionByZero,
    #[error("memory access out of bounds at {address:#x} ({size} bytes)")]
    MemoryOutOfBounds { address: u64, size: u32 },
    #[error("null pointer access at {address:#x}")]
    NullPointer { address: u32 },
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unknown external function {0}")]
    UnknownExternalFunction(u32),
    #[error("external function `{name}` failed: {source}")]
    External {
        name: String,
        #[source]
        source: ExternalError,
    },
    #[error("index {index} out of range for length {length}")]
    IndexOutOfRange { index: i64, length: u64 },
    #[error("invalid free of {0:#x}")]
    InvalidFree(u32),
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(u32),
    /// Raised by `crash`; the payload is program data.
    #[error("crash: {0}")]
    UserCrash(i64),
    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(u64),
    #[error("call depth limit exceeded ({0}) - possible infinite recursion")]
    CallDepthExceeded(usize),
    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),
    #[error("instruction pointer {0} is outside the program")]
    CodeOutOfBounds(u32),
}

/// A fault that halted the processor.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("runtime error at ip={instruction_pointer}: {kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub instruction_pointer: u32,
    /// Instruction pointers of the active calls, innermost first. The first
    /// entry is the faulting instruction, the rest are return addresses.
    pub call_trace: Vec<u32>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, instruction_pointer: u32) -> Self {
        Self {
            kind,
            instruction_pointer,
            call_trace: vec![instruction_pointer],
        }
    }

    pub fn with_call_trace(mut self, call_trace: Vec<u32>) -> Self {
        self.call_trace = call_trace;
        self
    }

    /// True for faults raised by the program itself rather than the VM.
    pub fn is_user_crash(&self) -> bool {
        matches!(self.kind, RuntimeErrorKind::UserCrash(_))
    }

    /// Renders the fault against source locations.
    pub fn describe(&self, debug: &DebugInformation) -> String {
        let mut out = format!("runtime error: {}", self.kind);
        if let Some(location) = debug.location(self.instruction_pointer) {
            out.push_str(&format!("\n  at {}", location));
        }
        if !self.call_trace.is_empty() {
            out.push_str("\n  call stack:");
            for (i, ip) in self.call_trace.iter().enumerate() {
                // Return addresses point one past their call.
                let site = if i == 0 { *ip } else { ip.saturating_sub(1) };
                let function = debug
                    .function(site)
                    .map(|f| f.name.as_str())
                    .unwrap_or("<main>");
                match debug.location(site) {
                    Some(location) => {
                        out.push_str(&format!("\n    {}: {} ({})", i, function, location))
                    }
                    None => out.push_str(&format!("\n    {}: {} (ip={})", i, function, site)),
                }
            }
        }
        out
    }
}
