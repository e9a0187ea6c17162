mod address;
pub mod disasm;
mod expression;
mod frame;
pub mod generate;
pub mod generate_error;
pub mod ir;
pub mod op;
pub mod verify;

pub use generate::generate;
pub use generate_error::GenerateError;
pub use ir::{
    BytecodeProgram, DebugInformation, ExternalFunctionInfo, FunctionMapping, GlobalMapping,
    MemoryLayout, SerializationError, StatementMapping, FRAME_HEADER_SIZE, NULL_PAGE_SIZE,
};
pub use op::{AddressOperand, Instruction, InstructionOperand, Opcode, Register, UNRESOLVED_OFFSET};
pub use verify::{VerifyError, verify};
