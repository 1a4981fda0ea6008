//! Symbol table entries and expression operands
//!
//! A declared name is a [`Symbol`]; the value flowing through the expression
//! stack is an [`Operand`]. Constants and special-register handles are never
//! declared, so they only exist as operands.

use super::types::DataType;
use crate::compiler::bytecode::{RegOperand, Register};

/// A variable or parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    /// Declared type
    pub data_type: DataType,
    /// Base register: RGD for globals, RST for locals and parameters
    pub register: Register,
    /// Byte offset relative to the base register
    pub offset: i32,
    /// Stores to this variable carry the atomic bit
    pub atomic: bool,
    /// Element count when the variable is an array
    pub array_len: Option<u32>,
}

impl Variable {
    pub fn is_array(&self) -> bool {
        self.array_len.is_some()
    }
}

/// A declared function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Declared return type
    pub return_type: DataType,
    /// Absolute address of the first prologue instruction
    pub address: u32,
    /// Parameter types in declaration order; `[Void]` for `f(void)`
    pub parameters: Vec<DataType>,
}

impl FunctionInfo {
    /// Whether the parameter list is the lone `void` sentinel
    pub fn takes_void(&self) -> bool {
        self.parameters.as_slice() == [DataType::Void]
    }

    /// Number of stack slots the caller pushes
    pub fn parameter_count(&self) -> u32 {
        if self.takes_void() {
            0
        } else {
            self.parameters.len() as u32
        }
    }
}

/// Symbol table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    /// Global or local variable
    Variable(Variable),
    /// Function parameter, addressed above the frame marker
    Parameter(Variable),
    /// Function
    Function(FunctionInfo),
}

impl Symbol {
    /// The storage slot, for variables and parameters
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Symbol::Variable(v) | Symbol::Parameter(v) => Some(v),
            Symbol::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionInfo> {
        match self {
            Symbol::Function(f) => Some(f),
            _ => None,
        }
    }
}

/// A value on the generator's operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    /// Register holding or addressing the value
    pub register: Register,
    /// Offset from the register, or the literal for RCT
    pub offset: i32,
    /// Type of the value
    pub data_type: DataType,
    /// Stores through this operand carry the atomic bit
    pub atomic: bool,
}

impl Operand {
    /// Integer literal carried by RCT
    pub fn constant(value: i32) -> Self {
        Self {
            register: Register::Rct,
            offset: value,
            data_type: DataType::Int8,
            atomic: false,
        }
    }

    /// Value held in a register
    pub fn temp(register: Register, data_type: DataType) -> Self {
        Self {
            register,
            offset: 0,
            data_type,
            atomic: false,
        }
    }

    /// Placeholder for the result of a void call
    pub fn invalid() -> Self {
        Self::temp(Register::Inv, DataType::Err)
    }

    /// Whether the value sits in an allocator-managed register
    pub fn is_allocated(&self) -> bool {
        self.register.is_allocatable()
    }

    /// Register and offset as an instruction operand
    pub fn location(&self) -> RegOperand {
        RegOperand::new(self.register, self.offset)
    }
}

impl From<&Variable> for Operand {
    fn from(v: &Variable) -> Self {
        Self {
            register: v.register,
            offset: v.offset,
            data_type: v.data_type,
            atomic: v.atomic,
        }
    }
}
