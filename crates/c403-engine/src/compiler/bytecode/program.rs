//! Program container format
//!
//! ```text
//! 0x00  header (64 bytes)
//!       u16 magic, ver_major, ver_minor, stack_align, reserved x2
//!       u32 stack_top, data_start, code_start, stack_size, data_size,
//!           code_size, symbol_size, symbol_location, code_location,
//!           reserved x4
//! 0x40  function symbols, symbol_size bytes: { u32 address; u32 param_count }
//!       one zeroed symbol-sized pad
//! code_location
//!       instructions, code_size bytes, 8 bytes each
//! ```
//!
//! All integers are little-endian.

use super::constants::{
    CODE_START, DATA_START, HEADER_SIZE, MAGIC, STACK_ALIGNMENT, STACK_TOP, VERSION_MAJOR,
    VERSION_MINOR,
};
use super::instruction::Instruction;
use std::io::{Read, Write};
use thiserror::Error;

/// Size of the write batch used while serializing
pub const WRITE_BATCH_SIZE: usize = 4096;

/// Program encoding/decoding errors
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file ended before a section was complete
    #[error("Unexpected end of program at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid magic number
    #[error("Invalid magic number: expected 0xC403, got {0:#06X}")]
    InvalidMagic(u16),

    /// Unsupported version
    #[error("Unsupported version: {major}.{minor} (current: {VERSION_MAJOR}.{VERSION_MINOR})")]
    UnsupportedVersion {
        /// Major version in the file
        major: u16,
        /// Minor version in the file
        minor: u16,
    },

    /// Stack alignment other than the one the VM implements
    #[error("Unsupported stack alignment: {0}")]
    UnsupportedAlignment(u16),

    /// A section size is not a multiple of its entry size
    #[error("{section} size {size} is not a multiple of {entry}")]
    Misaligned {
        /// Section name
        section: &'static str,
        /// Declared size
        size: u32,
        /// Entry size
        entry: u32,
    },
}

/// Program result type
pub type ProgramResult<T> = Result<T, ProgramError>;

// ============================================================================
// Header
// ============================================================================

/// Fixed 64-byte program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Always 0xC403
    pub magic: u16,
    /// Format major version
    pub version_major: u16,
    /// Format minor version
    pub version_minor: u16,
    /// Stack slot size
    pub stack_alignment: u16,
    /// Highest stack address
    pub stack_top: u32,
    /// Global data base address
    pub data_start: u32,
    /// Code base address
    pub code_start: u32,
    /// Bytes of stack per thread
    pub stack_size: u32,
    /// Bytes of global data
    pub data_size: u32,
    /// Bytes of code
    pub code_size: u32,
    /// Bytes of function symbols
    pub symbol_size: u32,
    /// File offset of the symbol table
    pub symbol_location: u32,
    /// File offset of the code blob
    pub code_location: u32,
}

impl ProgramHeader {
    /// Build a header for a program with the given section sizes.
    ///
    /// `data_pointer` is the global context's final data cursor.
    pub fn new(data_pointer: u32, code_count: usize, symbol_count: usize) -> Self {
        let symbol_size = (symbol_count * FunctionSymbol::SIZE) as u32;
        let symbol_location = HEADER_SIZE;
        Self {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            stack_alignment: STACK_ALIGNMENT as u16,
            stack_top: STACK_TOP,
            data_start: DATA_START,
            code_start: CODE_START,
            stack_size: STACK_TOP,
            data_size: data_pointer.saturating_sub(DATA_START) * STACK_ALIGNMENT,
            code_size: (code_count * Instruction::SIZE) as u32,
            symbol_size,
            symbol_location,
            code_location: symbol_location + symbol_size + FunctionSymbol::SIZE as u32,
        }
    }

    fn encode<W: Write>(&self, writer: &mut ProgramWriter<W>) -> std::io::Result<()> {
        writer.emit_u16(self.magic)?;
        writer.emit_u16(self.version_major)?;
        writer.emit_u16(self.version_minor)?;
        writer.emit_u16(self.stack_alignment)?;
        writer.emit_u16(0)?;
        writer.emit_u16(0)?;
        for value in [
            self.stack_top,
            self.data_start,
            self.code_start,
            self.stack_size,
            self.data_size,
            self.code_size,
            self.symbol_size,
            self.symbol_location,
            self.code_location,
        ] {
            writer.emit_u32(value)?;
        }
        for _ in 0..4 {
            writer.emit_u32(0)?;
        }
        Ok(())
    }

    fn decode(reader: &mut ProgramReader<'_>) -> ProgramResult<Self> {
        let magic = reader.read_u16()?;
        if magic != MAGIC {
            return Err(ProgramError::InvalidMagic(magic));
        }
        let version_major = reader.read_u16()?;
        let version_minor = reader.read_u16()?;
        if version_major != VERSION_MAJOR {
            return Err(ProgramError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }
        let stack_alignment = reader.read_u16()?;
        if u32::from(stack_alignment) != STACK_ALIGNMENT {
            return Err(ProgramError::UnsupportedAlignment(stack_alignment));
        }
        reader.read_u16()?;
        reader.read_u16()?;

        let header = Self {
            magic,
            version_major,
            version_minor,
            stack_alignment,
            stack_top: reader.read_u32()?,
            data_start: reader.read_u32()?,
            code_start: reader.read_u32()?,
            stack_size: reader.read_u32()?,
            data_size: reader.read_u32()?,
            code_size: reader.read_u32()?,
            symbol_size: reader.read_u32()?,
            symbol_location: reader.read_u32()?,
            code_location: reader.read_u32()?,
        };
        for _ in 0..4 {
            reader.read_u32()?;
        }

        if header.code_size % Instruction::SIZE as u32 != 0 {
            return Err(ProgramError::Misaligned {
                section: "code",
                size: header.code_size,
                entry: Instruction::SIZE as u32,
            });
        }
        if header.symbol_size % FunctionSymbol::SIZE as u32 != 0 {
            return Err(ProgramError::Misaligned {
                section: "symbol",
                size: header.symbol_size,
                entry: FunctionSymbol::SIZE as u32,
            });
        }
        Ok(header)
    }

    /// Number of instructions in the code section
    pub fn instruction_count(&self) -> usize {
        self.code_size as usize / Instruction::SIZE
    }

    /// Number of function symbols
    pub fn symbol_count(&self) -> usize {
        self.symbol_size as usize / FunctionSymbol::SIZE
    }
}

impl std::fmt::Display for ProgramHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Magic:           {:#06X}", self.magic)?;
        writeln!(f, "Version:         {}.{}", self.version_major, self.version_minor)?;
        writeln!(f, "Stack alignment: {}", self.stack_alignment)?;
        writeln!(f, "Stack top:       {:#07X}", self.stack_top)?;
        writeln!(f, "Data start:      {:#07X}", self.data_start)?;
        writeln!(f, "Code start:      {:#07X}", self.code_start)?;
        writeln!(f, "Stack size:      {}", self.stack_size)?;
        writeln!(f, "Data size:       {}", self.data_size)?;
        writeln!(f, "Code size:       {}", self.code_size)?;
        writeln!(f, "Symbol size:     {}", self.symbol_size)?;
        writeln!(f, "Symbol location: {:#X}", self.symbol_location)?;
        write!(f, "Code location:   {:#X}", self.code_location)
    }
}

// ============================================================================
// Function symbols
// ============================================================================

/// Entry of the function symbol table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionSymbol {
    /// Absolute address of the function's first instruction
    pub address: u32,
    /// Declared parameter count (0 for a `(void)` parameter list)
    pub parameter_count: u32,
}

impl FunctionSymbol {
    /// Encoded size in bytes
    pub const SIZE: usize = 8;
}

// ============================================================================
// Batched writer
// ============================================================================

/// Writer that accumulates output into fixed-size batches before handing
/// them to the underlying sink.
pub struct ProgramWriter<W: Write> {
    inner: W,
    batch: Vec<u8>,
    written: usize,
}

impl<W: Write> ProgramWriter<W> {
    /// Wrap a sink
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            batch: Vec::with_capacity(WRITE_BATCH_SIZE),
            written: 0,
        }
    }

    /// Total bytes accepted so far (flushed or not)
    pub fn offset(&self) -> usize {
        self.written + self.batch.len()
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.batch.extend_from_slice(bytes);
        if self.batch.len() >= WRITE_BATCH_SIZE {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) -> std::io::Result<()> {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) -> std::io::Result<()> {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Emit one instruction
    pub fn emit_instruction(&mut self, instr: Instruction) -> std::io::Result<()> {
        self.emit_bytes(&instr.to_le_bytes())
    }

    fn flush_batch(&mut self) -> std::io::Result<()> {
        if !self.batch.is_empty() {
            self.inner.write_all(&self.batch)?;
            self.written += self.batch.len();
            self.batch.clear();
        }
        Ok(())
    }

    /// Flush the remaining batch and return the sink
    pub fn finish(mut self) -> std::io::Result<W> {
        self.flush_batch()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Bounds-checked little-endian reader over a program image
pub struct ProgramReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ProgramReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Seek to a specific position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    fn take(&mut self, len: usize) -> ProgramResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(ProgramError::UnexpectedEnd(self.position))?;
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> ProgramResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> ProgramResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read one instruction
    pub fn read_instruction(&mut self) -> ProgramResult<Instruction> {
        let b = self.take(Instruction::SIZE)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(Instruction::from_le_bytes(word))
    }
}

// ============================================================================
// Program
// ============================================================================

/// A complete program: header, function symbols and code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Program header
    pub header: ProgramHeader,
    /// Function symbol table, in declaration order
    pub symbols: Vec<FunctionSymbol>,
    /// Instruction stream
    pub code: Vec<Instruction>,
}

impl Program {
    /// Assemble a program, computing its header
    pub fn new(symbols: Vec<FunctionSymbol>, code: Vec<Instruction>, data_pointer: u32) -> Self {
        let header = ProgramHeader::new(data_pointer, code.len(), symbols.len());
        Self { header, symbols, code }
    }

    /// Serialize into a sink through the batched writer
    pub fn write_to<W: Write>(&self, sink: W) -> ProgramResult<W> {
        let mut writer = ProgramWriter::new(sink);
        self.header.encode(&mut writer)?;
        for symbol in &self.symbols {
            writer.emit_u32(symbol.address)?;
            writer.emit_u32(symbol.parameter_count)?;
        }
        // One zeroed symbol between the table and the code
        writer.emit_bytes(&[0u8; FunctionSymbol::SIZE])?;
        debug_assert_eq!(writer.offset(), self.header.code_location as usize);
        for instr in &self.code {
            writer.emit_instruction(*instr)?;
        }
        Ok(writer.finish()?)
    }

    /// Serialize to bytes
    pub fn encode(&self) -> ProgramResult<Vec<u8>> {
        self.write_to(Vec::with_capacity(self.encoded_len()))
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.header.code_location as usize + self.header.code_size as usize
    }

    /// Decode a program image
    pub fn decode(bytes: &[u8]) -> ProgramResult<Self> {
        let mut reader = ProgramReader::new(bytes);
        let header = ProgramHeader::decode(&mut reader)?;

        reader.seek(header.symbol_location as usize);
        let mut symbols = Vec::with_capacity(header.symbol_count());
        for _ in 0..header.symbol_count() {
            symbols.push(FunctionSymbol {
                address: reader.read_u32()?,
                parameter_count: reader.read_u32()?,
            });
        }

        reader.seek(header.code_location as usize);
        let mut code = Vec::with_capacity(header.instruction_count());
        for _ in 0..header.instruction_count() {
            code.push(reader.read_instruction()?);
        }

        Ok(Self { header, symbols, code })
    }

    /// Read and decode a program from a source
    pub fn read_from<R: Read>(mut source: R) -> ProgramResult<Self> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    /// Look up the symbol for a function entry address.
    ///
    /// Linear search; programs carry few functions.
    pub fn function_symbol(&self, address: u32) -> Option<&FunctionSymbol> {
        self.symbols.iter().find(|s| s.address == address)
    }
}
