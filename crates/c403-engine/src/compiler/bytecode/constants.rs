//! Fixed layout constants shared by the generator, the program codec and the VM
//!
//! Programs are compiled against a single flat virtual address space:
//!
//! ```text
//! 0x00000 ─────────────┐
//!                      │ thread stack (grows down from STACK_TOP)
//! 0x7FFFE  STACK_TOP ──┘
//! 0x80000  DATA_START    global data (grows up)
//! 0xA0000  CODE_START    instructions, 8 bytes each
//! ```

/// Program file magic number
pub const MAGIC: u16 = 0xC403;

/// Program format major version
pub const VERSION_MAJOR: u16 = 1;

/// Program format minor version
pub const VERSION_MINOR: u16 = 0;

/// Size of one stack slot and of every variable
pub const STACK_ALIGNMENT: u32 = 4;

/// Size of one instruction
pub const CODE_ALIGNMENT: u32 = 8;

/// Highest stack address; the stack grows down from here
pub const STACK_TOP: u32 = 0x7FFFE;

/// First address of the global data segment
pub const DATA_START: u32 = 0x80000;

/// Address of the first instruction
pub const CODE_START: u32 = 0xA0000;

/// Size of the fixed program header in bytes
pub const HEADER_SIZE: u32 = 0x40;
