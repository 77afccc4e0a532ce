//! Dumped cells and the compiler boundary.

pub mod compiler;
pub mod history;
pub mod registry;

pub use compiler::{CellCompiler, CompiledUnit, Diagnostic, InputLineCompiler, Severity};
pub use history::{ExecutionHistory, RecordedHistory};
pub use registry::{Source, SourceRegistry};
