//! A table-driven, multi-pass macro assembler.
//!
//! Source programs are preprocessed into a linear statement stream, the
//! analyzer pre-links all structured control flow, and the executor then
//! interprets the stream once per phase: an analyze pass to seed the
//! constant table, query passes iterated to a fix-point so forward
//! references settle, and a final authoritative write pass that emits
//! bytes. Target instruction encodings are not built in; an architecture
//! table file describes instruction patterns and their bit-level
//! encoders, making the assembler retargetable without recompilation.

mod analyze;
mod assemble;
mod assembler;
mod diagnostic;
mod eval;
mod execute;
mod loader;
mod program;
mod symbols;
mod table;
mod target;

pub use assembler::Assembler;
pub use diagnostic::{Diagnostic, ErrorKind, Result, Severity};
pub use program::{Endian, Instruction, Phase};
