//! PUSH, POP, PRINT and READ handlers
//!
//! The stack grows down: PUSH lowers RSB by one slot and writes, POP reads
//! and raises RSB. The I/O instructions consume `count` slots above RSB,
//! oldest (highest address) first.

use super::{Executor, WORD};
use crate::compiler::bytecode::{Opcode, RegOperand};
use crate::vm::{VmError, VmResult};

impl Executor {
    pub(super) fn exec_stack(&mut self, opcode: Opcode, operand: RegOperand) -> VmResult<()> {
        match opcode {
            Opcode::Push => {
                let value = self.read(operand)?;
                let rsb = self.registers.rsb().wrapping_sub(WORD);
                self.store(rsb as i64, value)?;
                self.registers.set_rsb(rsb);
            }
            Opcode::Pop => {
                let rsb = self.registers.rsb();
                let value = self.load(rsb as i64)?;
                self.write(operand, value)?;
                self.registers.set_rsb(rsb.wrapping_add(WORD));
            }
            other => return Err(VmError::NotImplemented(other)),
        }
        Ok(())
    }

    pub(super) fn exec_io(&mut self, opcode: Opcode, count: u32) -> VmResult<()> {
        let mut slot = self.registers.rsb() as i64 + (WORD as i64 * count as i64) - WORD as i64;
        for _ in 0..count {
            let value = self.load(slot)?;
            self.registers.set_rsb(self.registers.rsb().wrapping_add(WORD));
            match opcode {
                Opcode::Print => self.console.print(value as i32)?,
                Opcode::Read => {
                    let input = self.console.read_i32()?;
                    self.store(value as i64, input as u32)?;
                }
                other => return Err(VmError::NotImplemented(other)),
            }
            slot -= WORD as i64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{arith, executor, executor_with, rct, reg};
    use crate::compiler::bytecode::{
        IndirectOffset, Instruction, Opcode, RegOperand, Register, CODE_START, DATA_START,
    };
    use crate::vm::thread::{ThreadSeed, VmOptions};
    use crate::vm::VmError;

    fn push(operand: RegOperand) -> Instruction {
        Instruction::stack(Opcode::Push, operand).unwrap()
    }

    fn pop(operand: RegOperand) -> Instruction {
        Instruction::stack(Opcode::Pop, operand).unwrap()
    }

    #[test]
    fn test_push_pop() {
        let (mut exec, _) = executor(vec![
            push(rct(9)),
            push(rct(-4)),
            pop(reg(Register::Rt0)),
            pop(reg(Register::Rrv)),
            Instruction::ret(0),
        ]);
        exec.step().unwrap();
        assert_eq!(exec.registers().rsb(), 0x7FFFE - 4);
        let exit = exec.run().unwrap();
        assert_eq!(exit.return_value, 9);
        assert_eq!(exec.registers().get(Register::Rt0).unwrap() as i32, -4);
        assert_eq!(exec.registers().rsb(), 0x7FFFE);
    }

    #[test]
    fn test_push_from_memory_and_pop_into_memory() {
        let (mut exec, _) = executor(vec![
            Instruction::store(Opcode::Stri32, rct(31), RegOperand::new(Register::Rgd, 0), false).unwrap(),
            push(RegOperand::new(Register::Rgd, 0)),
            pop(RegOperand::new(Register::Rgd, 8)),
            arith(Opcode::Addi, RegOperand::new(Register::Rgd, 8), rct(0), reg(Register::Rrv)),
            Instruction::ret(0),
        ]);
        assert_eq!(exec.run().unwrap().return_value, 31);
    }

    #[test]
    fn test_pop_into_constant() {
        let (mut exec, _) = executor(vec![push(rct(1)), pop(rct(0))]);
        exec.step().unwrap();
        assert!(matches!(exec.step(), Err(VmError::ConstantWrite)));
    }

    #[test]
    fn test_pop_past_stack_top() {
        let (mut exec, _) = executor(vec![pop(reg(Register::Rt0))]);
        assert!(matches!(exec.step(), Err(VmError::MemoryOutOfBounds(_))));
    }

    #[test]
    fn test_print_in_push_order() {
        let (mut exec, out) = executor(vec![
            push(rct(3)),
            push(rct(4)),
            push(rct(-5)),
            Instruction::io(Opcode::Print, 3).unwrap(),
            Instruction::ret(0),
        ]);
        exec.run().unwrap();
        assert_eq!(out.contents(), "PRINT: 3\nPRINT: 4\nPRINT: -5\n");
        assert_eq!(exec.registers().rsb(), 0x7FFFE);
    }

    #[test]
    fn test_read_into_global() {
        let (mut exec, out) = executor_with(
            vec![
                Instruction::indirect(Opcode::Rcopyd, Register::Rct, IndirectOffset::Constant(DATA_START as i32), Register::Rgd)
                    .unwrap(),
                Instruction::indirect(Opcode::Rcopyd, Register::Rgd, IndirectOffset::Constant(4), Register::Rt0).unwrap(),
                push(reg(Register::Rt0)),
                Instruction::io(Opcode::Read, 1).unwrap(),
                arith(Opcode::Addi, RegOperand::new(Register::Rgd, 4), rct(0), reg(Register::Rrv)),
                Instruction::ret(0),
            ],
            8,
            "12\n",
            ThreadSeed::primary(CODE_START),
            &VmOptions::default(),
        );
        assert_eq!(exec.run().unwrap().return_value, 12);
        assert_eq!(out.contents(), "READ: ");
        assert_eq!(exec.program().global().load(4).unwrap(), 12);
    }

    #[test]
    fn test_read_into_stack_slot() {
        let (mut exec, _) = executor_with(
            vec![
                // Reserve one local at RSB - 4, then read into it
                Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(-4), Register::Rsb).unwrap(),
                Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(0), Register::Rt0).unwrap(),
                push(reg(Register::Rt0)),
                Instruction::io(Opcode::Read, 1).unwrap(),
                arith(Opcode::Addi, RegOperand::new(Register::Rsb, 0), rct(0), reg(Register::Rrv)),
                Instruction::ret(0),
            ],
            0,
            "-8\n",
            ThreadSeed::primary(CODE_START),
            &VmOptions::default(),
        );
        assert_eq!(exec.run().unwrap().return_value, -8);
    }

    #[test]
    fn test_read_bad_input() {
        let (mut exec, _) = executor_with(
            vec![
                Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(-4), Register::Rt0).unwrap(),
                push(reg(Register::Rt0)),
                Instruction::io(Opcode::Read, 1).unwrap(),
            ],
            0,
            "twelve\n",
            ThreadSeed::primary(CODE_START),
            &VmOptions::default(),
        );
        assert!(matches!(exec.run(), Err(VmError::InvalidInput(_))));
    }
}
