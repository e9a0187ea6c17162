//! Host functions callable from bytecode through `CALL_EXT`.
//!
//! Arguments arrive as one flat block of the declared parameter size, the
//! result goes back as a block of the declared return size. A synchronous
//! function completes inside one tick. An asynchronous one hands back a
//! [`PendingCall`] that the processor polls on each following tick.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::ExternalFunctionInfo;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("{0}")]
    Failed(String),
    #[error("returned {got} bytes, expected {expected}")]
    ReturnSize { expected: u32, got: usize },
    #[error("registered as {registered} parameter / {registered_return} return bytes, program expects {expected} / {expected_return}")]
    Signature {
        registered: u32,
        registered_return: u32,
        expected: u32,
        expected_return: u32,
    },
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExternalError {
    fn from(err: std::io::Error) -> Self {
        ExternalError::Io(err.to_string())
    }
}

/// The completion checker of an asynchronous call.
pub trait PendingCall {
    /// `Ok(None)` while the result is not ready.
    fn poll(&mut self) -> Result<Option<Vec<u8>>, ExternalError>;
}

pub type SyncFunction = Box<dyn FnMut(&[u8], &mut [u8]) -> Result<(), ExternalError>>;
pub type AsyncFunction = Box<dyn FnMut(&[u8]) -> Result<Box<dyn PendingCall>, ExternalError>>;

pub enum ExternalFunction {
    Sync(SyncFunction),
    Async(AsyncFunction),
}

impl std::fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalFunction::Sync(_) => f.write_str("Sync(..)"),
            ExternalFunction::Async(_) => f.write_str("Async(..)"),
        }
    }
}

#[derive(Debug)]
pub struct RegisteredFunction {
    pub info: ExternalFunctionInfo,
    pub function: ExternalFunction,
}

/// Host functions by id.
#[derive(Debug, Default)]
pub struct ExternalFunctions {
    functions: BTreeMap<u32, RegisteredFunction>,
}

impl ExternalFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sync<F>(&mut self, info: ExternalFunctionInfo, function: F)
    where
        F: FnMut(&[u8], &mut [u8]) -> Result<(), ExternalError> + 'static,
    {
        self.functions.insert(
            info.id,
            RegisteredFunction {
                info,
                function: ExternalFunction::Sync(Box::new(function)),
            },
        );
    }

    pub fn register_async<F>(&mut self, info: ExternalFunctionInfo, begin: F)
    where
        F: FnMut(&[u8]) -> Result<Box<dyn PendingCall>, ExternalError> + 'static,
    {
        self.functions.insert(
            info.id,
            RegisteredFunction {
                info,
                function: ExternalFunction::Async(Box::new(begin)),
            },
        );
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut RegisteredFunction> {
        self.functions.get_mut(&id)
    }

    /// Signatures in id order, as the compiler wants them.
    pub fn infos(&self) -> Vec<ExternalFunctionInfo> {
        self.functions.values().map(|f| f.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// =============================================================================
// Standard host functions
// =============================================================================

pub const PRINT_I32: u32 = 1;
pub const PRINT_CHAR: u32 = 2;
pub const PRINT_F32: u32 = 3;
pub const EPRINT_I32: u32 = 4;

pub type SharedWriter = Rc<RefCell<dyn Write>>;

/// `print_i32`, `print_char` and `print_f32` on `stdout`, `eprint_i32` on
/// `stderr`. Numbers are written one per line.
pub fn standard_externals(stdout: SharedWriter, stderr: SharedWriter) -> ExternalFunctions {
    let mut externals = ExternalFunctions::new();

    let out = stdout.clone();
    externals.register_sync(ExternalFunctionInfo::new(PRINT_I32, "print_i32", 4, 0), move |args, _| {
        writeln!(out.borrow_mut(), "{}", i32::from_le_bytes(word(args)?))?;
        Ok(())
    });

    let out = stdout.clone();
    externals.register_sync(ExternalFunctionInfo::new(PRINT_CHAR, "print_char", 2, 0), move |args, _| {
        let unit = u16::from_le_bytes([args[0], args[1]]);
        let ch = char::decode_utf16([unit])
            .next()
            .and_then(Result::ok)
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        write!(out.borrow_mut(), "{}", ch)?;
        Ok(())
    });

    let out = stdout;
    externals.register_sync(ExternalFunctionInfo::new(PRINT_F32, "print_f32", 4, 0), move |args, _| {
        writeln!(out.borrow_mut(), "{}", f32::from_le_bytes(word(args)?))?;
        Ok(())
    });

    let err = stderr;
    externals.register_sync(ExternalFunctionInfo::new(EPRINT_I32, "eprint_i32", 4, 0), move |args, _| {
        writeln!(err.borrow_mut(), "{}", i32::from_le_bytes(word(args)?))?;
        Ok(())
    });

    externals
}

fn word(args: &[u8]) -> Result<[u8; 4], ExternalError> {
    args.get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| ExternalError::Failed(format!("expected 4 argument bytes, got {}", args.len())))
}
