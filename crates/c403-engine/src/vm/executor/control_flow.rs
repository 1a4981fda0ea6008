//! Jump, call and return handlers
//!
//! A normal call checkpoints the whole register set. The callee starts from
//! a fresh set that only carries RIP, the stack registers and RGD; RETURN
//! restores the checkpoint and copies RIP, RRV, RST and RSB back into it.
//!
//! ```text
//! CALLNORM   RSB -= 4; [RSB] = return address; save set; RIP = target
//! RETURN n   RIP = [RSB]; RSB += n + 4; restore set
//! ```

use super::{Executor, Step, INSTRUCTION_SIZE, WORD};
use crate::compiler::bytecode::{JumpOperands, Opcode, Register};
use crate::vm::register_set::RegisterSet;
use crate::vm::thread::ThreadExit;
use crate::vm::{VmError, VmResult};

impl Executor {
    pub(super) fn exec_jump(&mut self, opcode: Opcode, ops: JumpOperands) -> VmResult<()> {
        if opcode.is_parallel_call() {
            return Err(VmError::ParallelCallUnsupported(opcode));
        }
        let rip = self.registers.rip();
        let target = match ops.target.register {
            Register::Rip => rip.wrapping_add(ops.target.offset as u32),
            Register::Rct => ops.target.offset as u32,
            other => return Err(VmError::UnsupportedJumpRegister(other)),
        };

        match opcode {
            Opcode::Jmp => self.registers.set_rip(target),
            Opcode::Jmpz => {
                let taken = match ops.zero_test {
                    Some(register) => self.registers.get(register)? == 0,
                    None => true,
                };
                let next = if taken { target } else { rip.wrapping_add(INSTRUCTION_SIZE) };
                self.registers.set_rip(next);
            }
            Opcode::Callnorm => self.call(target, rip.wrapping_add(INSTRUCTION_SIZE))?,
            other => return Err(VmError::NotImplemented(other)),
        }
        Ok(())
    }

    fn call(&mut self, target: u32, return_address: u32) -> VmResult<()> {
        if self.saved.len() >= self.max_call_depth {
            return Err(VmError::CallDepthExceeded(self.max_call_depth));
        }
        let rsb = self.registers.rsb().wrapping_sub(WORD);
        self.store(rsb as i64, return_address)?;
        self.registers.set_rsb(rsb);

        let mut callee = RegisterSet::new();
        callee.set_rip(target);
        callee.set_rst(self.registers.rst());
        callee.set_rsb(rsb);
        callee.set(Register::Rgd, self.registers.rgd())?;
        let caller = std::mem::replace(&mut self.registers, callee);
        self.saved.push(caller);
        Ok(())
    }

    pub(super) fn exec_return(&mut self, cleanup: u32) -> VmResult<Step> {
        let Some(mut caller) = self.saved.pop() else {
            let exit = ThreadExit {
                return_value: self.registers.rrv() as i32,
                instructions: self.executed,
            };
            tracing::debug!(thread = self.id, ?exit, "thread finished");
            return Ok(Step::Exit(exit));
        };

        let rsb = self.registers.rsb();
        let return_address = self.load(rsb as i64)?;
        caller.set_rip(return_address);
        caller.set_rrv(self.registers.rrv());
        caller.set_rst(self.registers.rst());
        caller.set_rsb(rsb.wrapping_add(cleanup).wrapping_add(WORD));
        self.registers = caller;
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{arith, executor, executor_with, rct, reg};
    use crate::compiler::bytecode::{Instruction, Opcode, RegOperand, Register, CODE_START};
    use crate::vm::register_set::RegisterSet;
    use crate::vm::thread::{ThreadSeed, VmOptions};
    use crate::vm::{Step, VmError};

    fn jump(op: Opcode, target: RegOperand, zero: Option<Register>) -> Instruction {
        Instruction::jump(op, target, zero).unwrap()
    }

    fn zero_test_program() -> Vec<Instruction> {
        vec![
            jump(Opcode::Jmpz, RegOperand::new(Register::Rip, 16), Some(Register::Rt0)),
            Instruction::ret(0),
            arith(Opcode::Addi, rct(5), rct(0), reg(Register::Rrv)),
            Instruction::ret(0),
        ]
    }

    #[test]
    fn test_jmpz_taken_when_zero() {
        let (mut exec, _) = executor(zero_test_program());
        assert_eq!(exec.run().unwrap().return_value, 5);
    }

    #[test]
    fn test_jmpz_falls_through_when_nonzero() {
        let mut registers = RegisterSet::new();
        registers.set(Register::Rt0, 3).unwrap();
        let seed = ThreadSeed {
            registers,
            mini_stack: None,
            jump_address: CODE_START,
        };
        let (mut exec, _) = executor_with(zero_test_program(), 0, "", seed, &VmOptions::default());
        exec.step().unwrap();
        assert_eq!(exec.registers().rip(), CODE_START + 8);
        assert_eq!(exec.run().unwrap().return_value, 0);
    }

    #[test]
    fn test_relative_jump_backwards() {
        let (mut exec, _) = executor(vec![
            jump(Opcode::Jmp, rct(CODE_START as i32 + 16), None),
            Instruction::ret(0),
            arith(Opcode::Addi, rct(1), rct(0), reg(Register::Rrv)),
            jump(Opcode::Jmp, RegOperand::new(Register::Rip, -16), None),
        ]);
        let exit = exec.run().unwrap();
        assert_eq!(exit.return_value, 1);
        assert_eq!(exit.instructions, 4);
    }

    #[test]
    fn test_jump_through_other_register() {
        let (mut exec, _) = executor(vec![jump(Opcode::Jmp, reg(Register::Rt0), None)]);
        assert!(matches!(
            exec.step(),
            Err(VmError::UnsupportedJumpRegister(Register::Rt0))
        ));
    }

    #[test]
    fn test_call_and_return() {
        let (mut exec, _) = executor(vec![
            // 0xA0000
            jump(Opcode::Callnorm, rct(CODE_START as i32 + 24), None),
            arith(Opcode::Addi, reg(Register::Rrv), rct(1), reg(Register::Rrv)),
            Instruction::ret(0),
            // 0xA0018: callee
            arith(Opcode::Addi, rct(41), rct(0), reg(Register::Rrv)),
            Instruction::ret(0),
        ]);
        exec.registers.set(Register::Rt3, 99).unwrap();

        exec.step().unwrap();
        assert_eq!(exec.call_depth(), 1);
        assert_eq!(exec.registers().rip(), CODE_START + 24);
        assert_eq!(exec.registers().rsb(), 0x7FFFE - 4);
        assert_eq!(exec.registers().get(Register::Rt3).unwrap(), 0);

        exec.step().unwrap();
        assert_eq!(exec.step().unwrap(), Step::Continue);
        assert_eq!(exec.call_depth(), 0);
        assert_eq!(exec.registers().rip(), CODE_START + 8);
        assert_eq!(exec.registers().rsb(), 0x7FFFE);
        // Caller registers come back from the checkpoint
        assert_eq!(exec.registers().get(Register::Rt3).unwrap(), 99);

        assert_eq!(exec.run().unwrap().return_value, 42);
    }

    #[test]
    fn test_return_cleans_up_arguments() {
        let (mut exec, _) = executor(vec![
            Instruction::stack(Opcode::Push, rct(6)).unwrap(),
            Instruction::stack(Opcode::Push, rct(7)).unwrap(),
            jump(Opcode::Callnorm, rct(CODE_START as i32 + 32), None),
            Instruction::ret(0),
            // 0xA0020: RRV = first argument - second argument
            arith(
                Opcode::Subi,
                RegOperand::new(Register::Rsb, 8),
                RegOperand::new(Register::Rsb, 4),
                reg(Register::Rrv),
            ),
            Instruction::ret(8),
        ]);
        assert_eq!(exec.run().unwrap().return_value, -1);
        assert_eq!(exec.registers().rsb(), 0x7FFFE);
    }

    #[test]
    fn test_callee_inherits_global_base() {
        let (mut exec, _) = executor(vec![
            jump(Opcode::Callnorm, rct(CODE_START as i32 + 16), None),
            Instruction::ret(0),
            Instruction::indirect(
                Opcode::Rcopyd,
                Register::Rgd,
                crate::compiler::bytecode::IndirectOffset::Constant(0),
                Register::Rrv,
            )
            .unwrap(),
            Instruction::ret(0),
        ]);
        exec.registers.set(Register::Rgd, 0x80000).unwrap();
        assert_eq!(exec.run().unwrap().return_value, 0x80000);
    }

    #[test]
    fn test_call_depth_limit() {
        let options = VmOptions {
            max_call_depth: 4,
            ..VmOptions::default()
        };
        let code = vec![jump(Opcode::Callnorm, rct(CODE_START as i32), None)];
        let (mut exec, _) = executor_with(code, 0, "", ThreadSeed::primary(CODE_START), &options);
        assert!(matches!(exec.run(), Err(VmError::CallDepthExceeded(4))));
        assert_eq!(exec.call_depth(), 4);
    }

    #[test]
    fn test_parallel_calls_unsupported() {
        for op in [Opcode::Callplls, Opcode::Callplla] {
            let (mut exec, _) = executor(vec![jump(op, rct(CODE_START as i32), None)]);
            assert!(matches!(exec.step(), Err(VmError::ParallelCallUnsupported(o)) if o == op));
        }
    }
}
