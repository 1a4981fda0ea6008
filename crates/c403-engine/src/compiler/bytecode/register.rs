//! Register identifiers
//!
//! Register ids fit in the 5-bit register fields of an instruction. Id 18 is
//! a reserved marker (never a real register); ids 19 and 20 are
//! compiler-only pseudo registers that may still appear in a placeholder
//! instruction before it is patched.
//!
//! ```text
//! special   RIP RGD RST RSB RRV RCT (+ RFN, INV)
//! index     RGD RST RSB IX0 IX1 IX2 IX3
//! working   RT0 RT1 RT2 RT3 RT4 RT5 RT6 RT7
//! ```

/// Register id
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Instruction pointer
    Rip = 0,
    /// Global data base
    Rgd = 1,
    /// Stack top (frame base)
    Rst = 2,
    /// Stack bottom (grows downward)
    Rsb = 3,
    /// Return value
    Rrv = 4,
    /// Constant carrier: the operand value is the embedded offset
    Rct = 5,
    /// Index register 0
    Ix0 = 6,
    /// Index register 1
    Ix1 = 7,
    /// Index register 2
    Ix2 = 8,
    /// Index register 3
    Ix3 = 9,
    /// Working register 0
    Rt0 = 10,
    /// Working register 1
    Rt1 = 11,
    /// Working register 2
    Rt2 = 12,
    /// Working register 3
    Rt3 = 13,
    /// Working register 4
    Rt4 = 14,
    /// Working register 5
    Rt5 = 15,
    /// Working register 6
    Rt6 = 16,
    /// Working register 7
    Rt7 = 17,
    /// Pseudo register marking a function identifier
    Rfn = 19,
    /// Pseudo register marking "no register"
    Inv = 20,
}

/// Number of working (RTn) registers
pub const WORKING_REGISTER_COUNT: usize = 8;

/// Number of general-purpose index (IXn) registers
pub const INDEX_REGISTER_COUNT: usize = 4;

/// Number of slots in a runtime register set (RIP through RT7)
pub const REGISTER_SLOT_COUNT: usize = 18;

const WORKING: [Register; WORKING_REGISTER_COUNT] = [
    Register::Rt0,
    Register::Rt1,
    Register::Rt2,
    Register::Rt3,
    Register::Rt4,
    Register::Rt5,
    Register::Rt6,
    Register::Rt7,
];

const INDEX: [Register; INDEX_REGISTER_COUNT] =
    [Register::Ix0, Register::Ix1, Register::Ix2, Register::Ix3];

impl Register {
    /// Convert a raw 5-bit field to a register id
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Rip),
            1 => Some(Self::Rgd),
            2 => Some(Self::Rst),
            3 => Some(Self::Rsb),
            4 => Some(Self::Rrv),
            5 => Some(Self::Rct),
            6..=9 => Some(INDEX[(byte - 6) as usize]),
            10..=17 => Some(WORKING[(byte - 10) as usize]),
            19 => Some(Self::Rfn),
            20 => Some(Self::Inv),
            _ => None,
        }
    }

    /// Raw register id
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// The n-th working register
    pub fn working(n: usize) -> Option<Self> {
        WORKING.get(n).copied()
    }

    /// The n-th general-purpose index register
    pub fn index(n: usize) -> Option<Self> {
        INDEX.get(n).copied()
    }

    /// Position of this register in its allocation class
    /// (RT0 is 0, IX2 is 2). `None` for registers that are never allocated.
    pub fn class_slot(self) -> Option<usize> {
        match self {
            Self::Ix0 | Self::Ix1 | Self::Ix2 | Self::Ix3 => Some((self as usize) - 6),
            r if r.is_working() => Some((r as usize) - 10),
            _ => None,
        }
    }

    /// RIP, RGD, RST, RSB, RRV, RCT and the pseudo registers
    pub fn is_special(self) -> bool {
        matches!(
            self,
            Self::Rip | Self::Rgd | Self::Rst | Self::Rsb | Self::Rrv | Self::Rct | Self::Rfn | Self::Inv
        )
    }

    /// Registers usable as a base address for memory access
    pub fn is_index(self) -> bool {
        matches!(self, Self::Rgd | Self::Rst | Self::Rsb) || self.is_index_ix()
    }

    /// IX0 through IX3
    pub fn is_index_ix(self) -> bool {
        matches!(self, Self::Ix0 | Self::Ix1 | Self::Ix2 | Self::Ix3)
    }

    /// RT0 through RT7
    pub fn is_working(self) -> bool {
        let id = self as u8;
        (10..=17).contains(&id)
    }

    /// Registers handed out and reclaimed by the allocator
    pub fn is_allocatable(self) -> bool {
        self.is_working() || self.is_index_ix()
    }

    /// Whether the register has a slot in a runtime register set
    pub fn has_slot(self) -> bool {
        (self as usize) < REGISTER_SLOT_COUNT
    }

    /// Register mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::Rip => "RIP",
            Self::Rgd => "RGD",
            Self::Rst => "RST",
            Self::Rsb => "RSB",
            Self::Rrv => "RRV",
            Self::Rct => "RCT",
            Self::Ix0 => "IX0",
            Self::Ix1 => "IX1",
            Self::Ix2 => "IX2",
            Self::Ix3 => "IX3",
            Self::Rt0 => "RT0",
            Self::Rt1 => "RT1",
            Self::Rt2 => "RT2",
            Self::Rt3 => "RT3",
            Self::Rt4 => "RT4",
            Self::Rt5 => "RT5",
            Self::Rt6 => "RT6",
            Self::Rt7 => "RT7",
            Self::Rfn => "RFN",
            Self::Inv => "INV",
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
