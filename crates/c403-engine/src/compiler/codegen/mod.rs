//! Code generation
//!
//! Turns parser events into C403 instructions:
//! - `types`: data types, operators and opcode selection
//! - `identifier`: symbol table entries and expression operands
//! - `allocator`: LIFO working/index register allocation
//! - `scope`: global and function scope contexts
//! - `patch`: forward references to placeholder instructions
//! - `generator`: the instruction generator itself

pub mod allocator;
pub mod generator;
pub mod identifier;
pub mod patch;
pub mod scope;
pub mod types;

pub use allocator::RegisterAllocator;
pub use generator::{CallSite, Generator};
pub use identifier::{FunctionInfo, Operand, Symbol, Variable};
pub use patch::{CallRef, ForwardRef, ParallelMode, PatchSite};
pub use scope::{MainCheck, ScopeContext, Scopes};
pub use types::{generate_opcode, resulting_data_type, DataType, Operator};
