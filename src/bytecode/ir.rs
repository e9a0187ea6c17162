use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::Instruction;
use crate::lang::Location;

/// Size of the frame header `Call` pushes: return address then base pointer.
pub const FRAME_HEADER_SIZE: u32 = 8;

/// Addresses below this are never valid.
pub const NULL_PAGE_SIZE: u32 = 4;

/// A compiled program: the instruction array plus everything needed to run
/// and explain it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BytecodeProgram {
    pub instructions: Vec<Instruction>,
    pub layout: MemoryLayout,
    /// Host functions the program calls, by id.
    pub externals: Vec<ExternalFunctionInfo>,
    pub debug: DebugInformation,
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("cannot encode bytecode: {0}")]
    Encode(postcard::Error),
    #[error("cannot decode bytecode: {0}")]
    Decode(postcard::Error),
}

impl BytecodeProgram {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        postcard::to_allocvec(self).map_err(SerializationError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        postcard::from_bytes(bytes).map_err(SerializationError::Decode)
    }

    pub fn external(&self, id: u32) -> Option<&ExternalFunctionInfo> {
        self.externals.iter().find(|e| e.id == id)
    }
}

/// One byte buffer: the heap at `[0, heap_size)`, the stack above it
/// growing down from `heap_size + stack_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLayout {
    pub heap_size: u32,
    pub stack_size: u32,
    pub pointer_size: u32,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            heap_size: 64 * 1024,
            stack_size: 64 * 1024,
            pointer_size: 4,
        }
    }
}

impl MemoryLayout {
    pub fn memory_size(&self) -> u32 {
        self.heap_size + self.stack_size
    }

    /// Initial stack and base pointer.
    pub fn stack_top(&self) -> u32 {
        self.memory_size()
    }
}

/// A host function as the compiler and the processor see it. Parameters
/// travel as one flat block of `parameters_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFunctionInfo {
    pub id: u32,
    pub name: String,
    pub parameters_size: u32,
    pub return_size: u32,
}

impl ExternalFunctionInfo {
    pub fn new(id: u32, name: impl Into<String>, parameters_size: u32, return_size: u32) -> Self {
        Self {
            id,
            name: name.into(),
            parameters_size,
            return_size,
        }
    }
}

// =============================================================================
// Debug information
// =============================================================================

/// Instruction ranges are half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementMapping {
    pub start: u32,
    pub end: u32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMapping {
    pub name: String,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMapping {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInformation {
    pub statements: Vec<StatementMapping>,
    pub functions: Vec<FunctionMapping>,
    pub globals: Vec<GlobalMapping>,
}

impl DebugInformation {
    /// The innermost statement covering `ip`.
    pub fn location(&self, ip: u32) -> Option<&Location> {
        self.statements
            .iter()
            .filter(|s| s.start <= ip && ip < s.end)
            .min_by_key(|s| s.end - s.start)
            .map(|s| &s.location)
    }

    pub fn function(&self, ip: u32) -> Option<&FunctionMapping> {
        self.functions.iter().find(|f| f.start <= ip && ip < f.end)
    }

    pub fn function_at(&self, start: u32) -> Option<&FunctionMapping> {
        self.functions.iter().find(|f| f.start == start)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalMapping> {
        self.globals.iter().find(|g| g.name == name)
    }
}
