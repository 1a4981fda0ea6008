//! Program loading
//!
//! Decodes a program image, checks that its layout is one this VM can run
//! and allocates the zeroed global data segment every thread shares.

use super::memory::GlobalData;
use crate::compiler::bytecode::{
    FunctionSymbol, Instruction, Program, ProgramError, ProgramHeader, CODE_ALIGNMENT,
    STACK_ALIGNMENT,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Program load errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Open {
        /// Program path
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// The image does not decode
    #[error(transparent)]
    Program(#[from] ProgramError),

    /// Global data size is not a whole number of words
    #[error("Data size {0} is not a multiple of the stack alignment")]
    MisalignedData(u32),

    /// A function symbol points outside the code section
    #[error("Function symbol {index} points outside the code section ({address:#07X})")]
    SymbolOutOfRange {
        /// Position in the symbol table
        index: usize,
        /// Recorded address
        address: u32,
    },

    /// The stack section cannot hold a single slot
    #[error("Stack size {0} is too small")]
    StackTooSmall(u32),
}

/// A program ready for execution
#[derive(Debug)]
pub struct LoadedProgram {
    header: ProgramHeader,
    symbols: Vec<FunctionSymbol>,
    code: Vec<Instruction>,
    global: GlobalData,
}

impl LoadedProgram {
    /// Validate a decoded program and allocate its global data
    pub fn load(program: Program) -> Result<Self, LoadError> {
        let Program { header, symbols, code } = program;

        if header.data_size % STACK_ALIGNMENT != 0 {
            return Err(LoadError::MisalignedData(header.data_size));
        }
        if header.stack_size < STACK_ALIGNMENT {
            return Err(LoadError::StackTooSmall(header.stack_size));
        }

        let code_end = header.code_start as u64 + code.len() as u64 * CODE_ALIGNMENT as u64;
        for (index, symbol) in symbols.iter().enumerate() {
            let address = symbol.address as u64;
            let in_range = address >= header.code_start as u64
                && address < code_end
                && (address - header.code_start as u64) % CODE_ALIGNMENT as u64 == 0;
            if !in_range {
                return Err(LoadError::SymbolOutOfRange {
                    index,
                    address: symbol.address,
                });
            }
        }

        let global = GlobalData::zeroed((header.data_size / STACK_ALIGNMENT) as usize);
        tracing::debug!(
            code = code.len(),
            symbols = symbols.len(),
            global_words = global.len(),
            "program loaded"
        );
        Ok(Self {
            header,
            symbols,
            code,
            global,
        })
    }

    /// Decode and load a program image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        Self::load(Program::decode(bytes)?)
    }

    /// Read, decode and load a program file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "reading program");
        Self::from_bytes(&bytes)
    }

    /// Program header
    pub fn header(&self) -> &ProgramHeader {
        &self.header
    }

    /// Function symbol table
    pub fn symbols(&self) -> &[FunctionSymbol] {
        &self.symbols
    }

    /// Instruction stream
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Shared global data segment
    pub fn global(&self) -> &GlobalData {
        &self.global
    }

    /// Instruction at a virtual address, if the address is an instruction
    /// boundary inside the code section
    #[inline]
    pub fn fetch(&self, address: u32) -> Option<Instruction> {
        let offset = address.checked_sub(self.header.code_start)?;
        if offset % CODE_ALIGNMENT != 0 {
            return None;
        }
        self.code.get((offset / CODE_ALIGNMENT) as usize).copied()
    }

    /// Linear search of the symbol table
    pub fn function_symbol(&self, address: u32) -> Option<&FunctionSymbol> {
        self.symbols.iter().find(|s| s.address == address)
    }
}

impl TryFrom<Program> for LoadedProgram {
    type Error = LoadError;

    fn try_from(program: Program) -> Result<Self, Self::Error> {
        Self::load(program)
    }
}
