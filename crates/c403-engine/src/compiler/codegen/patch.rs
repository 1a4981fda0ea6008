//! Forward references into the instruction queue
//!
//! Some operands are only known after more code has been generated: the
//! address of `main`, a function's total locals size, the distance from a
//! `return` to the epilogue. The generator emits a placeholder, keeps a
//! [`ForwardRef`] to it, and resolves the reference once the value exists.
//! Every resolver checks that the placeholder still has the shape it was
//! emitted with.

use crate::compiler::bytecode::{
    CodeBuffer, IndirectOffset, Instruction, JumpOperands, Opcode, Operands, RegOperand, Register,
};

/// What kind of placeholder a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSite {
    /// Unconditional jump with an unknown target
    Jump,
    /// Conditional jump with an unknown target
    ConditionalJump,
    /// `RCOPYD RSB + size -> RSB` with an unknown locals size
    ReserveLocals,
}

/// Handle to an emitted placeholder instruction
#[must_use = "placeholder instructions must be resolved"]
#[derive(Debug, PartialEq, Eq)]
pub struct ForwardRef {
    position: usize,
    site: PatchSite,
}

impl ForwardRef {
    pub(crate) fn new(position: usize, site: PatchSite) -> Self {
        Self { position, site }
    }

    /// Queue index of the placeholder
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn site(&self) -> PatchSite {
        self.site
    }
}

/// Handle to an emitted normal call, which may later become a parallel call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRef {
    position: usize,
}

impl CallRef {
    pub(crate) fn new(position: usize) -> Self {
        Self { position }
    }

    /// Queue index of the call
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Flavor of a parallel call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// The caller waits for the callee (`CALLPLLS`)
    Sync,
    /// The caller continues immediately (`CALLPLLA`)
    Async,
}

impl ParallelMode {
    pub fn opcode(self) -> Opcode {
        match self {
            ParallelMode::Sync => Opcode::Callplls,
            ParallelMode::Async => Opcode::Callplla,
        }
    }
}

fn placeholder(code: &CodeBuffer, position: usize) -> Instruction {
    match code.get(position) {
        Some(instr) => instr,
        None => panic!("forward reference {} points past the instruction queue", position),
    }
}

fn jump_operands(instr: Instruction) -> (Opcode, JumpOperands) {
    match (instr.opcode(), instr.operands()) {
        (Some(op), Ok(Operands::Jump(j))) if op.is_jump() => (op, j),
        _ => panic!("patch target is not a jump: {}", instr),
    }
}

fn rewrite_jump(code: &mut CodeBuffer, fref: ForwardRef, target: RegOperand) {
    assert!(
        matches!(fref.site, PatchSite::Jump | PatchSite::ConditionalJump),
        "{:?} reference resolved as a jump",
        fref.site
    );
    let (op, old) = jump_operands(placeholder(code, fref.position));
    assert_eq!(
        old.zero_test.is_some(),
        fref.site == PatchSite::ConditionalJump,
        "jump kind changed under a forward reference"
    );
    let patched = Instruction::jump(op, target, old.zero_test)
        .unwrap_or_else(|e| panic!("jump target does not encode: {}", e));
    tracing::debug!(position = fref.position, %patched, "resolve jump");
    code.patch(fref.position, patched);
}

/// Point a jump at an absolute address (`RCT + address`)
pub fn resolve_absolute(code: &mut CodeBuffer, fref: ForwardRef, address: u32) {
    rewrite_jump(code, fref, RegOperand::constant(address as i32));
}

/// Point a jump `delta` bytes away from itself (`RIP + delta`)
pub fn resolve_relative(code: &mut CodeBuffer, fref: ForwardRef, delta: i32) {
    rewrite_jump(code, fref, RegOperand::new(Register::Rip, delta));
}

/// Fill in the locals size of a prologue's stack reservation
pub fn resolve_reserve(code: &mut CodeBuffer, fref: ForwardRef, size: i32) {
    assert_eq!(fref.site, PatchSite::ReserveLocals, "{:?} reference resolved as a reservation", fref.site);
    let instr = placeholder(code, fref.position);
    let ind = match (instr.opcode(), instr.operands()) {
        (Some(Opcode::Rcopyd), Ok(Operands::Indirect(ind)))
            if matches!(ind.offset, IndirectOffset::Constant(_)) =>
        {
            ind
        }
        _ => panic!("patch target is not a constant RCOPYD: {}", instr),
    };
    let patched = Instruction::indirect(Opcode::Rcopyd, ind.source, IndirectOffset::Constant(size), ind.dest)
        .unwrap_or_else(|e| panic!("reservation does not encode: {}", e));
    tracing::debug!(position = fref.position, size, "resolve locals reservation");
    code.patch(fref.position, patched);
}

/// Turn a normal call into a parallel call by rewriting its opcode only
pub fn patch_parallel(code: &mut CodeBuffer, call: CallRef, mode: ParallelMode) {
    let instr = placeholder(code, call.position);
    assert_eq!(instr.opcode(), Some(Opcode::Callnorm), "only a normal call can become parallel");
    tracing::debug!(position = call.position, ?mode, "patch parallel call");
    code.patch(call.position, instr.with_opcode(mode.opcode()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_jump(code: &mut CodeBuffer, zero: Option<Register>) -> ForwardRef {
        let site = if zero.is_some() { PatchSite::ConditionalJump } else { PatchSite::Jump };
        let op = if zero.is_some() { Opcode::Jmpz } else { Opcode::Jmp };
        let pos = code.emit(Instruction::jump(op, RegOperand::reg(Register::Inv), zero).unwrap());
        ForwardRef::new(pos, site)
    }

    #[test]
    fn test_resolve_absolute() {
        let mut code = CodeBuffer::new();
        let fref = pending_jump(&mut code, None);
        resolve_absolute(&mut code, fref, 0xA0040);
        match code.get(0).unwrap().operands().unwrap() {
            Operands::Jump(j) => {
                assert_eq!(j.target, RegOperand::constant(0xA0040));
                assert_eq!(j.zero_test, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_relative_keeps_zero_test() {
        let mut code = CodeBuffer::new();
        code.emit(Instruction::ret(0));
        let fref = pending_jump(&mut code, Some(Register::Rt2));
        resolve_relative(&mut code, fref, -16);
        let instr = code.get(1).unwrap();
        assert_eq!(instr.opcode(), Some(Opcode::Jmpz));
        match instr.operands().unwrap() {
            Operands::Jump(j) => {
                assert_eq!(j.target, RegOperand::new(Register::Rip, -16));
                assert_eq!(j.zero_test, Some(Register::Rt2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_reserve() {
        let mut code = CodeBuffer::new();
        let pos = code.emit(
            Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(1), Register::Rsb)
                .unwrap(),
        );
        resolve_reserve(&mut code, ForwardRef::new(pos, PatchSite::ReserveLocals), -12);
        match code.get(pos).unwrap().operands().unwrap() {
            Operands::Indirect(ind) => assert_eq!(ind.offset, IndirectOffset::Constant(-12)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "not a constant RCOPYD")]
    fn test_reserve_on_wrong_shape_panics() {
        let mut code = CodeBuffer::new();
        let pos = code.emit(Instruction::ret(0));
        resolve_reserve(&mut code, ForwardRef::new(pos, PatchSite::ReserveLocals), -4);
    }

    #[test]
    #[should_panic(expected = "not a jump")]
    fn test_jump_on_call_panics() {
        let mut code = CodeBuffer::new();
        let pos = code.emit(Instruction::jump(Opcode::Callnorm, RegOperand::constant(0xA0000), None).unwrap());
        resolve_absolute(&mut code, ForwardRef::new(pos, PatchSite::Jump), 0xA0008);
    }

    #[test]
    fn test_patch_parallel_changes_opcode_only() {
        let mut code = CodeBuffer::new();
        let pos = code.emit(Instruction::jump(Opcode::Callnorm, RegOperand::constant(0xA0020), None).unwrap());
        let before = code.get(pos).unwrap();
        patch_parallel(&mut code, CallRef::new(pos), ParallelMode::Async);
        let after = code.get(pos).unwrap();
        assert_eq!(after.opcode(), Some(Opcode::Callplla));
        assert_eq!(after.raw() >> Opcode::BITS, before.raw() >> Opcode::BITS);
    }

    #[test]
    #[should_panic(expected = "only a normal call")]
    fn test_patch_parallel_twice_panics() {
        let mut code = CodeBuffer::new();
        let pos = code.emit(Instruction::jump(Opcode::Callnorm, RegOperand::constant(0xA0020), None).unwrap());
        patch_parallel(&mut code, CallRef::new(pos), ParallelMode::Sync);
        patch_parallel(&mut code, CallRef::new(pos), ParallelMode::Sync);
    }
}
