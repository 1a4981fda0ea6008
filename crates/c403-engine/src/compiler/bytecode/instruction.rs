//! 64-bit instruction word
//!
//! Fields are packed least-significant bit first, starting with the 6-bit
//! opcode. Signed offsets are stored two's-complement in their field width.
//!
//! ```text
//! bit       0      6      11     16     17       21/35/49
//! Arith     op:6   Lt:5   Rt:5   Dt:5 | LtOff:14 RtOff:14 DtOff:14 (from bit 21)
//! Indirect  op:6   Lt:5   Dt:5   kind:1 LtOffset:32 (from bit 17)
//! Store     op:6   Rt:5   Dt:5   atomic:1 RtOff:23 DtOff:23 (from bit 17)
//! Jump      op:6   cond:1 reg:5 (bit 7) off:32 (bit 12) zero:5 (bit 44)
//! Return    op:6   cleanup:32
//! Stack     op:6   reg:5  off:32 (bit 11)
//! Io        op:6   count:32
//! ```

use super::opcode::{InstrShape, Opcode};
use super::register::Register;
use thiserror::Error;

/// Errors raised when an operand does not fit its instruction field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Signed offset outside the field's range
    #[error("{field} offset {value} does not fit in {bits} bits")]
    OffsetOutOfRange {
        /// Name of the field
        field: &'static str,
        /// Offending value
        value: i64,
        /// Field width
        bits: u32,
    },

    /// Opcode used with a constructor for another shape
    #[error("{opcode} cannot be encoded as a {shape:?} instruction")]
    ShapeMismatch {
        /// Opcode given
        opcode: Opcode,
        /// Shape of the constructor
        shape: InstrShape,
    },
}

/// Errors raised when reading operands back out of a word
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Opcode bits do not name an opcode
    #[error("Invalid opcode {0}")]
    InvalidOpcode(u8),

    /// Register field does not name a register
    #[error("Invalid register id {0}")]
    InvalidRegister(u8),

    /// Operands requested for an opcode of a different shape
    #[error("{opcode} is not a {shape:?} instruction")]
    WrongShape {
        /// Opcode in the word
        opcode: Opcode,
        /// Shape requested
        shape: InstrShape,
    },

    /// The ERR sentinel has no operands
    #[error("ERR opcode has no operands")]
    ErrOpcode,
}

/// A register paired with a signed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegOperand {
    /// Base register
    pub register: Register,
    /// Offset applied to the register (or the value itself for RCT)
    pub offset: i32,
}

impl RegOperand {
    /// Register with zero offset
    pub const fn reg(register: Register) -> Self {
        Self { register, offset: 0 }
    }

    /// Register with an offset
    pub const fn new(register: Register, offset: i32) -> Self {
        Self { register, offset }
    }

    /// Constant carried through RCT
    pub const fn constant(value: i32) -> Self {
        Self {
            register: Register::Rct,
            offset: value,
        }
    }
}

impl std::fmt::Display for RegOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.offset < 0 {
            write!(f, "{}-{}", self.register, self.offset.unsigned_abs())
        } else {
            write!(f, "{}+{}", self.register, self.offset)
        }
    }
}

/// Offset operand of an indirect instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndirectOffset {
    /// Embedded signed constant
    Constant(i32),
    /// Value of another register
    Register(Register),
}

/// Arithmetic operands: Dt = Lt op Rt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithOperands {
    /// Left operand
    pub left: RegOperand,
    /// Right operand
    pub right: RegOperand,
    /// Destination
    pub dest: RegOperand,
}

/// Indirect operands: Dt = value(Lt) + offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectOperands {
    /// Source register
    pub source: Register,
    /// Offset added to the source value
    pub offset: IndirectOffset,
    /// Destination register
    pub dest: Register,
}

/// Store operands: [dest] = width(source)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOperands {
    /// Value being stored
    pub source: RegOperand,
    /// Location being written
    pub dest: RegOperand,
    /// Atomic store bit (carried, not enforced)
    pub atomic: bool,
}

/// Jump and call operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpOperands {
    /// Target: RIP-relative, RCT-absolute, or INV while pending
    pub target: RegOperand,
    /// Zero-test register; `Some` only for the conditional form
    pub zero_test: Option<Register>,
}

/// Decoded operands, one variant per shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    /// Arithmetic shape
    Arithmetic(ArithOperands),
    /// Indirect shape
    Indirect(IndirectOperands),
    /// Store shape
    Store(StoreOperands),
    /// Jump shape
    Jump(JumpOperands),
    /// Return shape: stack cleanup in bytes
    Return(u32),
    /// Stack shape: value pushed or location popped into
    Stack(RegOperand),
    /// Io shape: number of stack slots consumed
    Io(u32),
}

// ===== Field layout =====

const REG_BITS: u32 = 5;
const ARITH_OFFSET_BITS: u32 = 14;
const STORE_OFFSET_BITS: u32 = 23;

const ARITH_LT: u32 = 6;
const ARITH_RT: u32 = 11;
const ARITH_DT: u32 = 16;
const ARITH_LT_OFF: u32 = 21;
const ARITH_RT_OFF: u32 = 35;
const ARITH_DT_OFF: u32 = 49;

const INDIRECT_LT: u32 = 6;
const INDIRECT_DT: u32 = 11;
const INDIRECT_KIND: u32 = 16;
const INDIRECT_OFF: u32 = 17;

const STORE_RT: u32 = 6;
const STORE_DT: u32 = 11;
const STORE_ATOMIC: u32 = 16;
const STORE_RT_OFF: u32 = 17;
const STORE_DT_OFF: u32 = 40;

const JUMP_KIND: u32 = 6;
const JUMP_REG: u32 = 7;
const JUMP_OFF: u32 = 12;
const JUMP_ZERO: u32 = 44;

const WORD_LOW: u32 = 6;
const STACK_REG: u32 = 6;
const STACK_OFF: u32 = 11;

/// Indirect offset kind bit: the offset field names a register
const OFFSET_KIND_REGISTER: u64 = 0;
/// Indirect offset kind bit: the offset field is a constant
const OFFSET_KIND_CONSTANT: u64 = 1;

#[inline]
fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

#[inline]
fn put(word: u64, shift: u32, bits: u32, value: u64) -> u64 {
    (word & !(mask(bits) << shift)) | ((value & mask(bits)) << shift)
}

#[inline]
fn get(word: u64, shift: u32, bits: u32) -> u64 {
    (word >> shift) & mask(bits)
}

#[inline]
fn get_signed(word: u64, shift: u32, bits: u32) -> i32 {
    let raw = get(word, shift, bits);
    let unused = 64 - bits;
    (((raw << unused) as i64) >> unused) as i32
}

fn check_signed(field: &'static str, value: i32, bits: u32) -> Result<u64, EncodeError> {
    let value = i64::from(value);
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    if value < min || value > max {
        return Err(EncodeError::OffsetOutOfRange { field, value, bits });
    }
    Ok(value as u64 & mask(bits))
}

fn check_shape(opcode: Opcode, shape: InstrShape) -> Result<(), EncodeError> {
    if opcode.shape() == Some(shape) {
        Ok(())
    } else {
        Err(EncodeError::ShapeMismatch { opcode, shape })
    }
}

fn register_at(word: u64, shift: u32) -> Result<Register, DecodeError> {
    let id = get(word, shift, REG_BITS) as u8;
    Register::from_u8(id).ok_or(DecodeError::InvalidRegister(id))
}

// ============================================================================
// Instruction
// ============================================================================

/// One packed C403 instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Instruction(pub u64);

impl Instruction {
    /// Encoded size in bytes; also the code alignment
    pub const SIZE: usize = 8;

    // ===== Constructors =====

    /// Encode an arithmetic instruction
    pub fn arithmetic(
        opcode: Opcode,
        left: RegOperand,
        right: RegOperand,
        dest: RegOperand,
    ) -> Result<Self, EncodeError> {
        check_shape(opcode, InstrShape::Arithmetic)?;
        let mut w = u64::from(opcode.to_u8());
        w = put(w, ARITH_LT, REG_BITS, u64::from(left.register.to_u8()));
        w = put(w, ARITH_RT, REG_BITS, u64::from(right.register.to_u8()));
        w = put(w, ARITH_DT, REG_BITS, u64::from(dest.register.to_u8()));
        w = put(w, ARITH_LT_OFF, ARITH_OFFSET_BITS, check_signed("left", left.offset, ARITH_OFFSET_BITS)?);
        w = put(w, ARITH_RT_OFF, ARITH_OFFSET_BITS, check_signed("right", right.offset, ARITH_OFFSET_BITS)?);
        w = put(w, ARITH_DT_OFF, ARITH_OFFSET_BITS, check_signed("dest", dest.offset, ARITH_OFFSET_BITS)?);
        Ok(Self(w))
    }

    /// Encode an indirect (address computation) instruction
    pub fn indirect(
        opcode: Opcode,
        source: Register,
        offset: IndirectOffset,
        dest: Register,
    ) -> Result<Self, EncodeError> {
        check_shape(opcode, InstrShape::Indirect)?;
        let mut w = u64::from(opcode.to_u8());
        w = put(w, INDIRECT_LT, REG_BITS, u64::from(source.to_u8()));
        w = put(w, INDIRECT_DT, REG_BITS, u64::from(dest.to_u8()));
        match offset {
            IndirectOffset::Constant(value) => {
                w = put(w, INDIRECT_KIND, 1, OFFSET_KIND_CONSTANT);
                w = put(w, INDIRECT_OFF, 32, u64::from(value as u32));
            }
            IndirectOffset::Register(reg) => {
                w = put(w, INDIRECT_KIND, 1, OFFSET_KIND_REGISTER);
                w = put(w, INDIRECT_OFF, 32, u64::from(reg.to_u8()));
            }
        }
        Ok(Self(w))
    }

    /// Encode a store instruction
    pub fn store(
        opcode: Opcode,
        source: RegOperand,
        dest: RegOperand,
        atomic: bool,
    ) -> Result<Self, EncodeError> {
        check_shape(opcode, InstrShape::Store)?;
        let mut w = u64::from(opcode.to_u8());
        w = put(w, STORE_RT, REG_BITS, u64::from(source.register.to_u8()));
        w = put(w, STORE_DT, REG_BITS, u64::from(dest.register.to_u8()));
        w = put(w, STORE_ATOMIC, 1, u64::from(atomic));
        w = put(w, STORE_RT_OFF, STORE_OFFSET_BITS, check_signed("source", source.offset, STORE_OFFSET_BITS)?);
        w = put(w, STORE_DT_OFF, STORE_OFFSET_BITS, check_signed("dest", dest.offset, STORE_OFFSET_BITS)?);
        Ok(Self(w))
    }

    /// Encode a jump or call. A `zero_test` register makes it conditional.
    pub fn jump(
        opcode: Opcode,
        target: RegOperand,
        zero_test: Option<Register>,
    ) -> Result<Self, EncodeError> {
        check_shape(opcode, InstrShape::Jump)?;
        let mut w = u64::from(opcode.to_u8());
        w = put(w, JUMP_KIND, 1, u64::from(zero_test.is_some()));
        w = put(w, JUMP_REG, REG_BITS, u64::from(target.register.to_u8()));
        w = put(w, JUMP_OFF, 32, u64::from(target.offset as u32));
        if let Some(zero) = zero_test {
            w = put(w, JUMP_ZERO, REG_BITS, u64::from(zero.to_u8()));
        }
        Ok(Self(w))
    }

    /// Encode a return with a stack cleanup byte count
    pub fn ret(stack_cleanup: u32) -> Self {
        Self(put(u64::from(Opcode::Return.to_u8()), WORD_LOW, 32, u64::from(stack_cleanup)))
    }

    /// Encode a push or pop
    pub fn stack(opcode: Opcode, operand: RegOperand) -> Result<Self, EncodeError> {
        check_shape(opcode, InstrShape::Stack)?;
        let mut w = u64::from(opcode.to_u8());
        w = put(w, STACK_REG, REG_BITS, u64::from(operand.register.to_u8()));
        w = put(w, STACK_OFF, 32, u64::from(operand.offset as u32));
        Ok(Self(w))
    }

    /// Encode a print or read
    pub fn io(opcode: Opcode, pop_count: u32) -> Result<Self, EncodeError> {
        check_shape(opcode, InstrShape::Io)?;
        Ok(Self(put(u64::from(opcode.to_u8()), WORD_LOW, 32, u64::from(pop_count))))
    }

    // ===== Decoders =====

    /// Raw opcode bits
    #[inline]
    pub fn opcode_bits(self) -> u8 {
        get(self.0, 0, Opcode::BITS) as u8
    }

    /// Opcode, if the bits name one
    #[inline]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode_bits())
    }

    /// Replace only the opcode bits, leaving operands untouched
    pub fn with_opcode(self, opcode: Opcode) -> Self {
        Self(put(self.0, 0, Opcode::BITS, u64::from(opcode.to_u8())))
    }

    /// Decode operands according to the opcode's shape
    pub fn operands(self) -> Result<Operands, DecodeError> {
        let opcode = self
            .opcode()
            .ok_or(DecodeError::InvalidOpcode(self.opcode_bits()))?;
        let w = self.0;
        match opcode.shape() {
            None => Err(DecodeError::ErrOpcode),
            Some(InstrShape::Arithmetic) => Ok(Operands::Arithmetic(ArithOperands {
                left: RegOperand::new(
                    register_at(w, ARITH_LT)?,
                    get_signed(w, ARITH_LT_OFF, ARITH_OFFSET_BITS),
                ),
                right: RegOperand::new(
                    register_at(w, ARITH_RT)?,
                    get_signed(w, ARITH_RT_OFF, ARITH_OFFSET_BITS),
                ),
                dest: RegOperand::new(
                    register_at(w, ARITH_DT)?,
                    get_signed(w, ARITH_DT_OFF, ARITH_OFFSET_BITS),
                ),
            })),
            Some(InstrShape::Indirect) => {
                let raw_offset = get(w, INDIRECT_OFF, 32) as u32;
                let offset = if get(w, INDIRECT_KIND, 1) == OFFSET_KIND_CONSTANT {
                    IndirectOffset::Constant(raw_offset as i32)
                } else {
                    let id = u8::try_from(raw_offset).map_err(|_| DecodeError::InvalidRegister(u8::MAX))?;
                    IndirectOffset::Register(Register::from_u8(id).ok_or(DecodeError::InvalidRegister(id))?)
                };
                Ok(Operands::Indirect(IndirectOperands {
                    source: register_at(w, INDIRECT_LT)?,
                    offset,
                    dest: register_at(w, INDIRECT_DT)?,
                }))
            }
            Some(InstrShape::Store) => Ok(Operands::Store(StoreOperands {
                source: RegOperand::new(
                    register_at(w, STORE_RT)?,
                    get_signed(w, STORE_RT_OFF, STORE_OFFSET_BITS),
                ),
                dest: RegOperand::new(
                    register_at(w, STORE_DT)?,
                    get_signed(w, STORE_DT_OFF, STORE_OFFSET_BITS),
                ),
                atomic: get(w, STORE_ATOMIC, 1) == 1,
            })),
            Some(InstrShape::Jump) => {
                let zero_test = if get(w, JUMP_KIND, 1) == 1 {
                    Some(register_at(w, JUMP_ZERO)?)
                } else {
                    None
                };
                Ok(Operands::Jump(JumpOperands {
                    target: RegOperand::new(register_at(w, JUMP_REG)?, get(w, JUMP_OFF, 32) as u32 as i32),
                    zero_test,
                }))
            }
            Some(InstrShape::Return) => Ok(Operands::Return(get(w, WORD_LOW, 32) as u32)),
            Some(InstrShape::Stack) => Ok(Operands::Stack(RegOperand::new(
                register_at(w, STACK_REG)?,
                get(w, STACK_OFF, 32) as u32 as i32,
            ))),
            Some(InstrShape::Io) => Ok(Operands::Io(get(w, WORD_LOW, 32) as u32)),
        }
    }

    /// Little-endian encoding
    #[inline]
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode from little-endian bytes
    #[inline]
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Get the raw word
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.opcode() {
            Some(op) => op,
            None => return write!(f, "UNKNOWN(0x{:02X})", self.opcode_bits()),
        };
        let operands = match self.operands() {
            Ok(operands) => operands,
            Err(DecodeError::ErrOpcode) => return write!(f, "{}", op.name()),
            Err(e) => return write!(f, "{:<8} <{}>", op.name(), e),
        };
        match operands {
            Operands::Arithmetic(a) => {
                write!(f, "{:<8} {}, {} -> {}", op.name(), a.left, a.right, a.dest)
            }
            Operands::Indirect(i) => match i.offset {
                IndirectOffset::Constant(c) => {
                    write!(f, "{:<8} {} + {} -> {}", op.name(), i.source, c, i.dest)
                }
                IndirectOffset::Register(r) => {
                    write!(f, "{:<8} {} + {} -> {}", op.name(), i.source, r, i.dest)
                }
            },
            Operands::Store(s) => {
                let atomic = if s.atomic { " (atomic)" } else { "" };
                write!(f, "{:<8} {} -> {}{}", op.name(), s.source, s.dest, atomic)
            }
            Operands::Jump(j) => match j.zero_test {
                Some(zero) => write!(f, "{:<8} {} if {} == 0", op.name(), j.target, zero),
                None => write!(f, "{:<8} {}", op.name(), j.target),
            },
            Operands::Return(cleanup) => write!(f, "{:<8} {}", op.name(), cleanup),
            Operands::Stack(s) => write!(f, "{:<8} {}", op.name(), s),
            Operands::Io(count) => write!(f, "{:<8} {}", op.name(), count),
        }
    }
}

/// Render a code listing with virtual addresses starting at `code_start`
pub fn disassemble(code: &[Instruction], code_start: u32) -> String {
    let mut out = String::new();
    for (i, instr) in code.iter().enumerate() {
        let address = code_start as usize + i * Instruction::SIZE;
        out.push_str(&format!("0x{:05X}  {:016X}  {}\n", address, instr.raw(), instr));
    }
    out
}

// ============================================================================
// CodeBuffer: ordered instruction queue with in-place patching
// ============================================================================

/// Ordered instruction sequence produced by the generator
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    code: Vec<Instruction>,
}

impl CodeBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Append an instruction, returning its position
    #[inline]
    pub fn emit(&mut self, instr: Instruction) -> usize {
        let pos = self.code.len();
        self.code.push(instr);
        pos
    }

    /// Number of instructions emitted so far
    #[inline]
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// Instruction at a position
    pub fn get(&self, pos: usize) -> Option<Instruction> {
        self.code.get(pos).copied()
    }

    /// Overwrite the instruction at a position
    pub fn patch(&mut self, pos: usize, instr: Instruction) {
        self.code[pos] = instr;
    }

    /// Emitted instructions
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Consume the buffer
    pub fn finish(self) -> Vec<Instruction> {
        self.code
    }
}

// ============================================================================
// Tests
// ============================================================================
