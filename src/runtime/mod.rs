pub mod external;
pub mod memory;
pub mod processor;
pub mod runtime_error;

pub use external::{
    ExternalError, ExternalFunction, ExternalFunctions, PendingCall, standard_externals,
};
pub use memory::{HeapBlock, HeapSnapshot};
pub use processor::{Processor, ProcessorSettings, ProgramResult, TickOutcome};
pub use runtime_error::{RuntimeError, RuntimeErrorKind};
