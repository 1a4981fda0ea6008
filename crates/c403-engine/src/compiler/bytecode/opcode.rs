//! Opcodes for the C403 virtual machine
//!
//! Every instruction is a 64-bit word whose low 6 bits hold the opcode. The
//! opcode alone selects how the remaining 58 bits are read:
//! - Arithmetic: [op:6][Lt:5][Rt:5][Dt:5][LtOff:14][RtOff:14][DtOff:14]
//! - Indirect:   [op:6][Lt:5][Dt:5][type:1][LtOff:32]
//! - Store:      [op:6][Rt:5][Dt:5][atomic:1][RtOff:23][DtOff:23]
//! - Jump:       [op:6][cond:1][reg:5][off:32][zero:5]
//! - Return:     [op:6][cleanup:32]
//! - Stack:      [op:6][reg:5][off:32]
//! - Io:         [op:6][count:32]

/// Opcode enumeration
///
/// Opcode space is 6 bits wide. The numeric values are part of the program
/// file format and must not be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Arithmetic (1-8) =====
    /// Dt = Lt + Rt (integer)
    Addi = 1,
    /// Dt = Lt + Rt (float)
    Addf = 2,
    /// Dt = Lt - Rt (integer)
    Subi = 3,
    /// Dt = Lt - Rt (float)
    Subf = 4,
    /// Dt = Lt * Rt (integer)
    Muli = 5,
    /// Dt = Lt * Rt (float)
    Mulf = 6,
    /// Dt = Lt / Rt (integer)
    Divi = 7,
    /// Dt = Lt / Rt (float)
    Divf = 8,

    // ===== Address computation (9-10) =====
    /// Reserved move form; never legal at execution time
    Move = 9,
    /// Dt = value(Lt) + offset, offset being a constant or a register
    Rcopyd = 10,

    // ===== Bitwise (11-14) =====
    /// Dt = Lt ^ Rt
    Xor = 11,
    /// Dt = Lt | Rt
    Or = 12,
    /// Dt = Lt & Rt
    And = 13,
    /// Dt = !Lt (not implemented by the VM)
    Not = 14,

    // ===== Logical (15-16) =====
    /// Dt = Lt || Rt
    Lor = 15,
    /// Dt = Lt && Rt
    Land = 16,

    // ===== Comparison (17-22) =====
    /// Dt = Lt == Rt
    Eq = 17,
    /// Dt = Lt != Rt
    Neq = 18,
    /// Dt = Lt < Rt
    Lt = 19,
    /// Dt = Lt > Rt
    Gt = 20,
    /// Dt = Lt <= Rt
    Lte = 21,
    /// Dt = Lt >= Rt
    Gte = 22,

    // ===== Stores (23-30) =====
    /// Store low 8 bits, sign-extended
    Stri8 = 23,
    /// Store low 8 bits, zero-extended
    Stru8 = 24,
    /// Store low 16 bits, sign-extended
    Stri16 = 25,
    /// Store low 16 bits, zero-extended
    Stru16 = 26,
    /// Store 32 bits (signed)
    Stri32 = 27,
    /// Store 32 bits (unsigned)
    Stru32 = 28,
    /// Store a float word
    Strf = 29,
    /// Store a thread handle
    Strth = 30,

    // ===== Control flow (31-36) =====
    /// Unconditional jump
    Jmp = 31,
    /// Jump when the zero-test register is zero
    Jmpz = 32,
    /// Synchronous call
    Callnorm = 33,
    /// Parallel call, caller waits
    Callplls = 34,
    /// Parallel call, caller continues
    Callplla = 35,
    /// Return from the active call
    Return = 36,

    // ===== Stack (37-38) =====
    /// RSB -= 4; [RSB] = value
    Push = 37,
    /// location = [RSB]; RSB += 4
    Pop = 38,

    // ===== I/O (39-40) =====
    /// Print the top `count` stack slots
    Print = 39,
    /// Read values into the addresses held in the top `count` stack slots
    Read = 40,

    /// Sentinel for "no valid opcode"
    Err = 63,
}

/// Instruction shapes
///
/// A shape names one interpretation of the 58 operand bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrShape {
    /// Three register+offset pairs
    Arithmetic,
    /// Address computation with constant or register offset
    Indirect,
    /// Width-specific store
    Store,
    /// Jumps and calls
    Jump,
    /// Return with stack cleanup
    Return,
    /// Push and pop
    Stack,
    /// Print and read
    Io,
}

impl Opcode {
    /// Number of bits the opcode occupies in an instruction word
    pub const BITS: u32 = 6;

    /// Convert a raw 6-bit value to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Addi),
            2 => Some(Self::Addf),
            3 => Some(Self::Subi),
            4 => Some(Self::Subf),
            5 => Some(Self::Muli),
            6 => Some(Self::Mulf),
            7 => Some(Self::Divi),
            8 => Some(Self::Divf),
            9 => Some(Self::Move),
            10 => Some(Self::Rcopyd),
            11 => Some(Self::Xor),
            12 => Some(Self::Or),
            13 => Some(Self::And),
            14 => Some(Self::Not),
            15 => Some(Self::Lor),
            16 => Some(Self::Land),
            17 => Some(Self::Eq),
            18 => Some(Self::Neq),
            19 => Some(Self::Lt),
            20 => Some(Self::Gt),
            21 => Some(Self::Lte),
            22 => Some(Self::Gte),
            23 => Some(Self::Stri8),
            24 => Some(Self::Stru8),
            25 => Some(Self::Stri16),
            26 => Some(Self::Stru16),
            27 => Some(Self::Stri32),
            28 => Some(Self::Stru32),
            29 => Some(Self::Strf),
            30 => Some(Self::Strth),
            31 => Some(Self::Jmp),
            32 => Some(Self::Jmpz),
            33 => Some(Self::Callnorm),
            34 => Some(Self::Callplls),
            35 => Some(Self::Callplla),
            36 => Some(Self::Return),
            37 => Some(Self::Push),
            38 => Some(Self::Pop),
            39 => Some(Self::Print),
            40 => Some(Self::Read),
            63 => Some(Self::Err),
            _ => None,
        }
    }

    /// Convert to the raw opcode value
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// The shape used to read this opcode's operands.
    ///
    /// `Err` has no operands and therefore no shape.
    pub fn shape(self) -> Option<InstrShape> {
        use Opcode::*;
        match self {
            Addi | Addf | Subi | Subf | Muli | Mulf | Divi | Divf | Xor | Or | And | Not
            | Lor | Land | Eq | Neq | Lt | Gt | Lte | Gte => Some(InstrShape::Arithmetic),
            Move | Rcopyd => Some(InstrShape::Indirect),
            Stri8 | Stru8 | Stri16 | Stru16 | Stri32 | Stru32 | Strf | Strth => {
                Some(InstrShape::Store)
            }
            Jmp | Jmpz | Callnorm | Callplls | Callplla => Some(InstrShape::Jump),
            Return => Some(InstrShape::Return),
            Push | Pop => Some(InstrShape::Stack),
            Print | Read => Some(InstrShape::Io),
            Err => None,
        }
    }

    /// Get the mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Addi => "ADDI",
            Self::Addf => "ADDF",
            Self::Subi => "SUBI",
            Self::Subf => "SUBF",
            Self::Muli => "MULI",
            Self::Mulf => "MULF",
            Self::Divi => "DIVI",
            Self::Divf => "DIVF",
            Self::Move => "MOVE",
            Self::Rcopyd => "RCOPYD",
            Self::Xor => "XOR",
            Self::Or => "OR",
            Self::And => "AND",
            Self::Not => "NOT",
            Self::Lor => "LOR",
            Self::Land => "LAND",
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::Lte => "LTE",
            Self::Gte => "GTE",
            Self::Stri8 => "STRI8",
            Self::Stru8 => "STRU8",
            Self::Stri16 => "STRI16",
            Self::Stru16 => "STRU16",
            Self::Stri32 => "STRI32",
            Self::Stru32 => "STRU32",
            Self::Strf => "STRF",
            Self::Strth => "STRTH",
            Self::Jmp => "JMP",
            Self::Jmpz => "JMPZ",
            Self::Callnorm => "CALLNORM",
            Self::Callplls => "CALLPLLS",
            Self::Callplla => "CALLPLLA",
            Self::Return => "RETURN",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Print => "PRINT",
            Self::Read => "READ",
            Self::Err => "ERR",
        }
    }

    /// Check if this opcode transfers control without saving a frame
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::Jmpz)
    }

    /// Check if this opcode is a call (normal or parallel)
    pub fn is_call(self) -> bool {
        matches!(self, Self::Callnorm | Self::Callplls | Self::Callplla)
    }

    /// Check if this opcode is a parallel call
    pub fn is_parallel_call(self) -> bool {
        matches!(self, Self::Callplls | Self::Callplla)
    }

    /// Check if this opcode is a return
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return)
    }

    /// Check if this opcode is a store
    pub fn is_store(self) -> bool {
        self.shape() == Some(InstrShape::Store)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Tests
// ============================================================================
