//! Arithmetic, indirect-copy and store handlers

use super::Executor;
use crate::compiler::bytecode::{
    ArithOperands, IndirectOffset, IndirectOperands, Opcode, Register, StoreOperands,
};
use crate::vm::{VmError, VmResult};

impl Executor {
    /// `Dt = Lt op Rt` on 32-bit signed integers. Float opcodes share the
    /// integer behavior; comparisons and logical operators yield 0 or 1.
    pub(super) fn exec_arithmetic(&mut self, opcode: Opcode, ops: ArithOperands) -> VmResult<()> {
        let l = self.read(ops.left)? as i32;
        let r = self.read(ops.right)? as i32;
        let value = match opcode {
            Opcode::Addi | Opcode::Addf => l.wrapping_add(r),
            Opcode::Subi | Opcode::Subf => l.wrapping_sub(r),
            Opcode::Muli | Opcode::Mulf => l.wrapping_mul(r),
            Opcode::Divi | Opcode::Divf => {
                if r == 0 {
                    return Err(VmError::DivisionByZero);
                }
                l.wrapping_div(r)
            }
            Opcode::Xor => l ^ r,
            Opcode::Or => l | r,
            Opcode::And => l & r,
            Opcode::Lor => ((l != 0) || (r != 0)) as i32,
            Opcode::Land => ((l != 0) && (r != 0)) as i32,
            Opcode::Eq => (l == r) as i32,
            Opcode::Neq => (l != r) as i32,
            Opcode::Lt => (l < r) as i32,
            Opcode::Gt => (l > r) as i32,
            Opcode::Lte => (l <= r) as i32,
            Opcode::Gte => (l >= r) as i32,
            other => return Err(VmError::NotImplemented(other)),
        };
        self.write(ops.dest, value as u32)
    }

    /// `Dt = Lt + offset`, on register values only. MOVE never reaches the
    /// VM.
    pub(super) fn exec_indirect(&mut self, opcode: Opcode, ops: IndirectOperands) -> VmResult<()> {
        if opcode != Opcode::Rcopyd {
            return Err(VmError::UnsupportedIndirect(opcode));
        }
        if ops.dest == Register::Rct {
            return Err(VmError::ConstantWrite);
        }
        let base = self.registers.get(ops.source)?;
        let offset = match ops.offset {
            IndirectOffset::Constant(value) => value as u32,
            IndirectOffset::Register(register) => self.registers.get(register)?,
        };
        self.registers.set(ops.dest, base.wrapping_add(offset))
    }

    /// Narrow the source to the store width, then write it. The atomic bit
    /// has no effect.
    pub(super) fn exec_store(&mut self, opcode: Opcode, ops: StoreOperands) -> VmResult<()> {
        let value = self.read(ops.source)?;
        let stored = match opcode {
            Opcode::Stri8 => value as u8 as i8 as i32 as u32,
            Opcode::Stru8 => value & 0xFF,
            Opcode::Stri16 => value as u16 as i16 as i32 as u32,
            Opcode::Stru16 => value & 0xFFFF,
            Opcode::Stri32 | Opcode::Stru32 | Opcode::Strf | Opcode::Strth => value,
            other => return Err(VmError::NotImplemented(other)),
        };
        self.write(ops.dest, stored)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{arith, executor, rct, reg};
    use crate::compiler::bytecode::{IndirectOffset, Instruction, Opcode, RegOperand, Register};
    use crate::vm::{VmError, VmResult};

    fn eval(opcode: Opcode, l: i32, r: i32) -> VmResult<i32> {
        let (mut exec, _) = executor(vec![
            arith(opcode, rct(l), rct(r), reg(Register::Rrv)),
            Instruction::ret(0),
        ]);
        exec.run().map(|exit| exit.return_value)
    }

    fn store(opcode: Opcode, value: i32) -> i32 {
        let (mut exec, _) = executor(vec![
            Instruction::store(opcode, rct(value), reg(Register::Rrv), false).unwrap(),
            Instruction::ret(0),
        ]);
        exec.run().unwrap().return_value
    }

    #[test]
    fn test_integer_ops() {
        assert_eq!(eval(Opcode::Addi, 7, -9).unwrap(), -2);
        assert_eq!(eval(Opcode::Subi, 3, 10).unwrap(), -7);
        assert_eq!(eval(Opcode::Muli, -6, 7).unwrap(), -42);
        assert_eq!(eval(Opcode::Divi, -7, 2).unwrap(), -3);
        assert_eq!(eval(Opcode::Xor, 0b1100, 0b1010).unwrap(), 0b0110);
        assert_eq!(eval(Opcode::Or, 0b1100, 0b1010).unwrap(), 0b1110);
        assert_eq!(eval(Opcode::And, 0b1100, 0b1010).unwrap(), 0b1000);
    }

    #[test]
    fn test_float_opcodes_use_integer_arithmetic() {
        assert_eq!(eval(Opcode::Addf, 2, 3).unwrap(), 5);
        assert_eq!(eval(Opcode::Divf, 7, 2).unwrap(), 3);
    }

    #[test]
    fn test_comparisons_are_signed() {
        assert_eq!(eval(Opcode::Lt, -1, 1).unwrap(), 1);
        assert_eq!(eval(Opcode::Gt, -1, 1).unwrap(), 0);
        assert_eq!(eval(Opcode::Lte, 4, 4).unwrap(), 1);
        assert_eq!(eval(Opcode::Gte, 3, 4).unwrap(), 0);
        assert_eq!(eval(Opcode::Eq, 5, 5).unwrap(), 1);
        assert_eq!(eval(Opcode::Neq, 5, 5).unwrap(), 0);
    }

    #[test]
    fn test_logical_ops() {
        assert_eq!(eval(Opcode::Lor, 0, 9).unwrap(), 1);
        assert_eq!(eval(Opcode::Lor, 0, 0).unwrap(), 0);
        assert_eq!(eval(Opcode::Land, 3, 9).unwrap(), 1);
        assert_eq!(eval(Opcode::Land, 3, 0).unwrap(), 0);
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(eval(Opcode::Divi, 1, 0), Err(VmError::DivisionByZero)));
    }

    #[test]
    fn test_not_is_unimplemented() {
        assert!(matches!(eval(Opcode::Not, 1, 0), Err(VmError::NotImplemented(Opcode::Not))));
    }

    #[test]
    fn test_wrapping_overflow() {
        let (mut exec, _) = executor(vec![
            Instruction::store(Opcode::Stri32, rct(0x8_0000), reg(Register::Rt0), false).unwrap(),
            arith(Opcode::Muli, reg(Register::Rt0), rct(4096), reg(Register::Rrv)),
            Instruction::ret(0),
        ]);
        assert_eq!(exec.run().unwrap().return_value, i32::MIN);
    }

    #[test]
    fn test_store_widths() {
        assert_eq!(store(Opcode::Stri8, 200), -56);
        assert_eq!(store(Opcode::Stru8, -1), 255);
        assert_eq!(store(Opcode::Stri16, 0x8000), -32768);
        assert_eq!(store(Opcode::Stru16, -1), 0xFFFF);
        assert_eq!(store(Opcode::Stri32, -5), -5);
        assert_eq!(store(Opcode::Strth, 77), 77);
    }

    #[test]
    fn test_atomic_store_behaves_like_plain_store() {
        let (mut exec, _) = executor(vec![
            Instruction::store(Opcode::Stri8, rct(-1), RegOperand::new(Register::Rgd, 0), true).unwrap(),
            Instruction::ret(0),
        ]);
        exec.run().unwrap();
        assert_eq!(exec.program().global().load(0).unwrap(), u32::MAX);
    }

    #[test]
    fn test_rcopyd_constant_and_register_offsets() {
        let (mut exec, _) = executor(vec![
            Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(-12), Register::Rt0).unwrap(),
            Instruction::store(Opcode::Stri32, rct(20), reg(Register::Rt1), false).unwrap(),
            Instruction::indirect(Opcode::Rcopyd, Register::Rt0, IndirectOffset::Register(Register::Rt1), Register::Rrv)
                .unwrap(),
            Instruction::ret(0),
        ]);
        assert_eq!(exec.run().unwrap().return_value, 0x7FFFE - 12 + 20);
    }

    #[test]
    fn test_rcopyd_never_touches_memory() {
        // RSB is an index register, but RCOPYD reads its value, not [RSB]
        let (mut exec, _) = executor(vec![
            Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(0), Register::Rrv).unwrap(),
            Instruction::ret(0),
        ]);
        assert_eq!(exec.run().unwrap().return_value, 0x7FFFE);
    }

    #[test]
    fn test_move_is_fatal() {
        let (mut exec, _) = executor(vec![
            Instruction::indirect(Opcode::Move, Register::Rt0, IndirectOffset::Constant(0), Register::Rt1).unwrap(),
        ]);
        assert!(matches!(exec.step(), Err(VmError::UnsupportedIndirect(Opcode::Move))));
    }
}
