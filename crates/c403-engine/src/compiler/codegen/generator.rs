//! Instruction generator
//!
//! The parser drives the generator one construct at a time. Expressions are
//! evaluated with an operand stack and an operator stack; function bodies,
//! calls, returns and I/O statements each have an entry point that emits
//! their fixed instruction sequences. Every emitted instruction advances the
//! current scope's code pointer by one instruction.
//!
//! Semantic errors are reported to the [`ErrorSink`] once and then returned,
//! so the caller can abandon the construct and keep going.

use super::allocator::RegisterAllocator;
use super::identifier::{FunctionInfo, Operand, Variable};
use super::patch::{self, CallRef, ForwardRef, ParallelMode, PatchSite};
use super::scope::{MainCheck, Scopes};
use super::types::{generate_opcode, resulting_data_type, DataType, Operator};
use crate::compiler::bytecode::constants::{CODE_ALIGNMENT, DATA_START, STACK_ALIGNMENT, STACK_TOP};
use crate::compiler::bytecode::{
    CodeBuffer, EncodeError, FunctionSymbol, IndirectOffset, Instruction, Opcode, Program,
    RegOperand, Register,
};
use crate::compiler::error::{CollectingSink, CompileError, CompileResult, ErrorSink};

const SLOT: i32 = STACK_ALIGNMENT as i32;

/// An in-progress call to a function
#[derive(Debug, Clone)]
pub struct CallSite {
    function: FunctionInfo,
    pushed: u32,
    excess: bool,
}

impl CallSite {
    /// The callee
    pub fn function(&self) -> &FunctionInfo {
        &self.function
    }

    /// Arguments pushed so far
    pub fn pushed(&self) -> u32 {
        self.pushed
    }
}

/// Generates C403 instructions for one translation unit
pub struct Generator<S: ErrorSink = CollectingSink> {
    code: CodeBuffer,
    registers: RegisterAllocator,
    scopes: Scopes,
    operands: Vec<Operand>,
    operators: Vec<Operator>,
    start: Option<ForwardRef>,
    reserve: Option<ForwardRef>,
    /// Pending return jumps with the queue position they were emitted at
    returns: Vec<(ForwardRef, usize)>,
    io_count: u32,
    symbols: Vec<FunctionSymbol>,
    main_address: Option<u32>,
    sink: S,
}

impl Generator<CollectingSink> {
    /// Generator that collects its diagnostics
    pub fn new() -> Self {
        Self::with_sink(CollectingSink::new())
    }
}

impl Default for Generator<CollectingSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ErrorSink> Generator<S> {
    pub fn with_sink(sink: S) -> Self {
        Self {
            code: CodeBuffer::new(),
            registers: RegisterAllocator::new(),
            scopes: Scopes::new(),
            operands: Vec::new(),
            operators: Vec::new(),
            start: None,
            reserve: None,
            returns: Vec::new(),
            io_count: 0,
            symbols: Vec::new(),
            main_address: None,
            sink,
        }
    }

    // ===== Accessors =====

    /// Instructions emitted so far
    pub fn code(&self) -> &[Instruction] {
        self.code.code()
    }

    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    pub fn registers(&self) -> &RegisterAllocator {
        &self.registers
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Function symbols registered so far, in declaration order
    pub fn symbols(&self) -> &[FunctionSymbol] {
        &self.symbols
    }

    /// Address of a valid `main`, once its prologue has been generated
    pub fn main_address(&self) -> Option<u32> {
        self.main_address
    }

    /// Address the next instruction will have
    pub fn current_address(&self) -> u32 {
        self.scopes.current().code_pointer
    }

    pub fn operand_depth(&self) -> usize {
        self.operands.len()
    }

    pub fn operator_depth(&self) -> usize {
        self.operators.len()
    }

    // ===== Plumbing =====

    fn fail<T>(&mut self, error: CompileError) -> CompileResult<T> {
        self.sink.report(&error);
        Err(error)
    }

    fn check<T>(&mut self, result: CompileResult<T>) -> CompileResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => self.fail(error),
        }
    }

    fn emit(&mut self, instr: Result<Instruction, EncodeError>) -> CompileResult<usize> {
        let instr = match instr {
            Ok(instr) => instr,
            Err(e) => return self.fail(e.into()),
        };
        let pos = self.code.emit(instr);
        let ctx = self.scopes.current_mut();
        let address = ctx.code_pointer;
        ctx.code_pointer += CODE_ALIGNMENT;
        tracing::trace!(address = format_args!("{:#07X}", address), %instr, "emit");
        Ok(pos)
    }

    fn next_working(&mut self) -> CompileResult<Register> {
        match self.registers.next_working() {
            Some(r) => Ok(r),
            None => self.fail(CompileError::OutOfRegisters),
        }
    }

    fn next_index(&mut self) -> CompileResult<Register> {
        match self.registers.next_index() {
            Some(r) => Ok(r),
            None => self.fail(CompileError::OutOfRegisters),
        }
    }

    /// Consume an operand, freeing its register if it holds one
    fn release(&mut self, operand: Operand) {
        if operand.is_allocated() {
            self.registers.dereference(operand.register);
        }
    }

    fn pop_value(&mut self) -> Operand {
        match self.operands.pop() {
            Some(op) => op,
            None => panic!("operand stack underflow"),
        }
    }

    // ===== Declarations =====

    pub fn declare_variable(&mut self, name: &str, data_type: DataType, atomic: bool) -> CompileResult<Variable> {
        let result = self.scopes.declare_variable(name, data_type, atomic);
        self.check(result)
    }

    pub fn declare_array(
        &mut self,
        name: &str,
        data_type: DataType,
        len: u32,
        atomic: bool,
    ) -> CompileResult<Variable> {
        let result = self.scopes.declare_array(name, data_type, len, atomic);
        self.check(result)
    }

    /// Declare a function and enter its body
    pub fn begin_function(&mut self, name: &str, return_type: DataType) -> CompileResult<()> {
        let result = self.scopes.begin_function(name, return_type);
        self.check(result)
    }

    pub fn declare_parameter(&mut self, name: &str, data_type: DataType) -> CompileResult<Variable> {
        let result = self.scopes.declare_parameter(name, data_type);
        self.check(result)
    }

    // ===== Expression stacks =====

    pub fn push_operand(&mut self, operand: Operand) {
        self.operands.push(operand);
    }

    /// Push an integer literal
    pub fn push_constant(&mut self, value: i32) {
        self.operands.push(Operand::constant(value));
    }

    /// Push a named variable or parameter
    pub fn push_variable(&mut self, name: &str) -> CompileResult<()> {
        let result = self.scopes.variable(name);
        let var = self.check(result)?;
        self.operands.push(Operand::from(&var));
        Ok(())
    }

    /// Push an array base followed by the `[` sentinel
    pub fn push_array(&mut self, name: &str) -> CompileResult<()> {
        let result = self.scopes.array(name);
        let var = self.check(result)?;
        self.operands.push(Operand::from(&var));
        self.operators.push(Operator::LBrack);
        Ok(())
    }

    pub fn push_operator(&mut self, operator: Operator) {
        self.operators.push(operator);
    }

    pub fn pop_operand(&mut self) -> Option<Operand> {
        self.operands.pop()
    }

    /// Combine two operands with one operator.
    ///
    /// Consumed scratch and index registers are released first, so the
    /// result can land in the register an operand just gave up. An
    /// assignment yields its destination, which stays live for chaining.
    pub fn expression_instruction(
        &mut self,
        left: Operand,
        right: Operand,
        operator: Operator,
    ) -> CompileResult<Operand> {
        self.release(right);
        if operator != Operator::Store {
            self.release(left);
        }

        let opcode = generate_opcode(left.data_type, right.data_type, operator);
        let data_type = resulting_data_type(left.data_type, right.data_type, operator);
        if opcode == Opcode::Err || data_type == DataType::Err {
            return self.fail(CompileError::InvalidInstruction);
        }

        if operator == Operator::Store {
            if left.register == Register::Rct {
                return self.fail(CompileError::LvalueConstant);
            }
            self.emit(Instruction::store(opcode, right.location(), left.location(), left.atomic))?;
            Ok(left)
        } else {
            let dest = self.next_working()?;
            self.emit(Instruction::arithmetic(opcode, left.location(), right.location(), RegOperand::reg(dest)))?;
            Ok(Operand::temp(dest, data_type))
        }
    }

    fn reduce(&mut self, operator: Operator) -> CompileResult<()> {
        assert!(self.operands.len() >= 2, "{:?} needs two operands", operator);
        let right = self.pop_value();
        let left = self.pop_value();
        let result = self.expression_instruction(left, right, operator)?;
        self.operands.push(result);
        Ok(())
    }

    /// Reduce while the top operator is one of `operators`
    pub fn drain_while(&mut self, operators: &[Operator]) -> CompileResult<()> {
        while let Some(&top) = self.operators.last() {
            if !operators.contains(&top) {
                break;
            }
            self.operators.pop();
            self.reduce(top)?;
        }
        Ok(())
    }

    /// Reduce every pending operator, leaving exactly one operand
    pub fn drain_all(&mut self) -> CompileResult<()> {
        while let Some(op) = self.operators.pop() {
            self.reduce(op)?;
        }
        assert_eq!(self.operands.len(), 1, "expression did not reduce to one value");
        Ok(())
    }

    /// Reduce until `sentinel` is popped
    pub fn drain_until(&mut self, sentinel: Operator) -> CompileResult<()> {
        loop {
            match self.operators.pop() {
                Some(op) if op == sentinel => return Ok(()),
                Some(op) => self.reduce(op)?,
                None => panic!("no {:?} on the operator stack", sentinel),
            }
        }
    }

    /// Finish an expression statement and reset the registers
    pub fn finish_statement(&mut self) -> CompileResult<()> {
        if !self.operands.is_empty() || !self.operators.is_empty() {
            self.drain_all()?;
            let value = self.pop_value();
            self.release(value);
        }
        self.registers.free_all();
        Ok(())
    }

    pub fn free_all_registers(&mut self) {
        self.registers.free_all();
    }

    // ===== Arrays =====

    /// Replace the index and array base on top of the operand stack with the
    /// element's address in an index register.
    ///
    /// Locals are laid out downward from RST and globals upward from RGD, so
    /// the stride sign follows the base register.
    pub fn array_access(&mut self) -> CompileResult<()> {
        let index = self.pop_value();
        let base = self.pop_value();
        assert!(
            (base.register == Register::Rst && base.offset < 0)
                || (base.register == Register::Rgd && base.offset >= 0),
            "array base must be a local or global variable"
        );
        let stride = if base.register == Register::Rst { -SLOT } else { SLOT };

        if index.register.is_index_ix() {
            self.registers.dereference(index.register);
        }
        let offset = if index.register.is_working() {
            index.register
        } else {
            self.next_working()?
        };
        let element = self.next_index()?;

        let offset_reg = RegOperand::reg(offset);
        self.emit(Instruction::arithmetic(Opcode::Muli, index.location(), RegOperand::constant(stride), offset_reg))?;
        self.emit(Instruction::arithmetic(Opcode::Addi, offset_reg, RegOperand::constant(base.offset), offset_reg))?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, base.register, IndirectOffset::Register(offset), element))?;
        self.registers.dereference(offset);

        self.operands.push(Operand {
            register: element,
            offset: 0,
            data_type: base.data_type,
            atomic: base.atomic,
        });
        Ok(())
    }

    /// Close `[index]` after an array pushed with [`Generator::push_array`]
    pub fn close_array(&mut self) -> CompileResult<()> {
        self.drain_until(Operator::LBrack)?;
        self.array_access()
    }

    // ===== Program entry =====

    /// Load the stack and data base registers, then jump to a pending target
    pub fn program_start_stage0(&mut self) -> CompileResult<()> {
        let rct = Register::Rct;
        self.emit(Instruction::indirect(Opcode::Rcopyd, rct, IndirectOffset::Constant(STACK_TOP as i32), Register::Rst))?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, rct, IndirectOffset::Constant(STACK_TOP as i32), Register::Rsb))?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, rct, IndirectOffset::Constant(DATA_START as i32), Register::Rgd))?;
        let pos = self.emit(Instruction::jump(Opcode::Jmp, RegOperand::reg(Register::Inv), None))?;
        self.start = Some(ForwardRef::new(pos, PatchSite::Jump));
        Ok(())
    }

    /// Point the entry jump at `main`
    pub fn program_start_stage1(&mut self) -> CompileResult<()> {
        let Some(address) = self.main_address else {
            return self.fail(CompileError::MainNotDefined);
        };
        let Some(fref) = self.start.take() else {
            panic!("program_start_stage1 without stage 0");
        };
        patch::resolve_absolute(&mut self.code, fref, address);
        Ok(())
    }

    // ===== Functions =====

    /// Emit the prologue with a pending locals reservation:
    ///
    /// ```text
    /// RCOPYD RST + 0 -> RT0
    /// PUSH   RT0
    /// RCOPYD RSB + 0 -> RST
    /// RCOPYD RSB + ? -> RSB
    /// ```
    pub fn function_header_stage0(&mut self) -> CompileResult<()> {
        assert!(self.scopes.in_function(), "function header outside a function");
        self.scopes.reverse_parameter_offsets();

        match self.scopes.check_main() {
            MainCheck::Invalid => return self.fail(CompileError::IllegalMain),
            MainCheck::Ok => self.main_address = self.scopes.current_function().map(|f| f.address),
            MainCheck::NotMain => {}
        }
        if let Some(symbol) = self.scopes.register_function_symbol() {
            self.symbols.push(symbol);
        }

        let rt0 = self.next_working()?;
        assert_eq!(rt0, Register::Rt0, "working registers live across a function boundary");
        self.emit(Instruction::indirect(Opcode::Rcopyd, Register::Rst, IndirectOffset::Constant(0), rt0))?;
        self.emit(Instruction::stack(Opcode::Push, RegOperand::reg(rt0)))?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(0), Register::Rst))?;
        let pos = self.emit(Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(1), Register::Rsb))?;
        self.reserve = Some(ForwardRef::new(pos, PatchSite::ReserveLocals));
        self.registers.dereference(rt0);
        Ok(())
    }

    /// Patch the prologue's reservation with the body's locals size
    pub fn function_header_stage1(&mut self) {
        let Some(fref) = self.reserve.take() else {
            panic!("function_header_stage1 without stage 0");
        };
        let locals = self.scopes.current().data_pointer;
        assert!(locals <= 0, "locals grow down from the frame base");
        patch::resolve_reserve(&mut self.code, fref, locals);
    }

    /// Copy the expression result into RRV and jump to the epilogue
    pub fn return_statement(&mut self) -> CompileResult<()> {
        self.drain_all()?;
        let value = self.pop_value();
        self.emit(Instruction::arithmetic(
            Opcode::Addi,
            value.location(),
            RegOperand::constant(0),
            RegOperand::reg(Register::Rrv),
        ))?;
        self.pending_return()?;
        self.release(value);
        Ok(())
    }

    /// `return;` in a void function
    pub fn return_void(&mut self) -> CompileResult<()> {
        self.pending_return()
    }

    fn pending_return(&mut self) -> CompileResult<()> {
        let marker = self.code.position();
        let pos = self.emit(Instruction::jump(Opcode::Jmp, RegOperand::reg(Register::Inv), None))?;
        self.returns.push((ForwardRef::new(pos, PatchSite::Jump), marker));
        Ok(())
    }

    /// Number of returns waiting for the epilogue
    pub fn pending_returns(&self) -> usize {
        self.returns.len()
    }

    /// Patch every return to the epilogue, emit the epilogue and leave the
    /// function:
    ///
    /// ```text
    /// RCOPYD RSB + locals -> RSB
    /// POP    RT0
    /// RCOPYD RT0 + 0 -> RST
    /// RETURN params * 4
    /// ```
    pub fn function_trailer(&mut self) -> CompileResult<()> {
        assert!(self.reserve.is_none(), "function_header_stage1 must run before the trailer");
        let epilogue = self.code.position();
        for (fref, marker) in std::mem::take(&mut self.returns) {
            let delta = (epilogue - marker) as i32 * CODE_ALIGNMENT as i32;
            patch::resolve_relative(&mut self.code, fref, delta);
        }

        let locals = self.scopes.current().data_pointer;
        let cleanup = match self.scopes.current_function() {
            Some(f) => f.parameter_count() * STACK_ALIGNMENT,
            None => panic!("function trailer outside a function"),
        };
        let rt0 = self.next_working()?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, Register::Rsb, IndirectOffset::Constant(-locals), Register::Rsb))?;
        self.emit(Instruction::stack(Opcode::Pop, RegOperand::reg(rt0)))?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, rt0, IndirectOffset::Constant(0), Register::Rst))?;
        self.emit(Ok(Instruction::ret(cleanup)))?;
        self.registers.dereference(rt0);
        self.scopes.end_function();
        Ok(())
    }

    // ===== Calls =====

    /// Start a call to `name`
    pub fn begin_call(&mut self, name: &str) -> CompileResult<CallSite> {
        let result = self.scopes.function(name).cloned();
        let function = self.check(result)?;
        Ok(CallSite {
            function,
            pushed: 0,
            excess: false,
        })
    }

    /// Accept `f()` against a `(void)` parameter list and pop its `(`
    pub fn void_parameter(&mut self, call: &CallSite) -> CompileResult<()> {
        if !call.function.takes_void() {
            return self.fail(CompileError::ParameterMismatch);
        }
        assert_eq!(self.operators.pop(), Some(Operator::LParen), "void argument list without (");
        Ok(())
    }

    /// Finish one argument expression (opened by `(`) and push its value
    pub fn push_parameter(&mut self, call: &mut CallSite) -> CompileResult<()> {
        self.drain_until(Operator::LParen)?;
        let arg = self.pop_value();
        call.pushed += 1;

        if call.pushed > call.function.parameter_count() {
            self.release(arg);
            if call.excess {
                return Err(CompileError::ExcessParameter);
            }
            call.excess = true;
            return self.fail(CompileError::ExcessParameter);
        }
        let declared = call.function.parameters[call.pushed as usize - 1];
        if generate_opcode(declared, arg.data_type, Operator::Store) == Opcode::Err {
            self.release(arg);
            return self.fail(CompileError::ParameterTypeMismatch);
        }

        self.emit(Instruction::stack(Opcode::Push, arg.location()))?;
        self.release(arg);
        Ok(())
    }

    fn validate_call(&mut self, call: &CallSite) -> CompileResult<()> {
        if call.excess {
            return Err(CompileError::ExcessParameter);
        }
        if call.pushed != call.function.parameter_count() {
            return self.fail(CompileError::ParameterMismatch);
        }
        Ok(())
    }

    fn push_call_result(&mut self, function: &FunctionInfo) -> CompileResult<()> {
        if function.return_type == DataType::Void {
            self.operands.push(Operand::invalid());
        } else {
            let dest = self.next_working()?;
            self.emit(Instruction::indirect(Opcode::Rcopyd, Register::Rrv, IndirectOffset::Constant(0), dest))?;
            self.operands.push(Operand::temp(dest, function.return_type));
        }
        Ok(())
    }

    /// Emit a normal call and push its result.
    ///
    /// The returned handle can turn the call into a parallel one later.
    pub fn make_call(&mut self, call: CallSite) -> CompileResult<CallRef> {
        self.validate_call(&call)?;
        let target = RegOperand::constant(call.function.address as i32);
        let pos = self.emit(Instruction::jump(Opcode::Callnorm, target, None))?;
        self.push_call_result(&call.function)?;
        Ok(CallRef::new(pos))
    }

    /// Emit a parallel call directly
    pub fn make_call_parallel(&mut self, call: CallSite, mode: ParallelMode) -> CompileResult<()> {
        self.validate_call(&call)?;
        let target = RegOperand::constant(call.function.address as i32);
        self.emit(Instruction::jump(mode.opcode(), target, None))?;
        self.push_call_result(&call.function)
    }

    /// Rewrite an emitted normal call into a parallel call
    pub fn patch_parallel(&mut self, call: CallRef, mode: ParallelMode) {
        patch::patch_parallel(&mut self.code, call, mode);
    }

    // ===== Jumps =====

    /// Unconditional jump with a pending target
    pub fn jump(&mut self) -> CompileResult<ForwardRef> {
        let pos = self.emit(Instruction::jump(Opcode::Jmp, RegOperand::reg(Register::Inv), None))?;
        Ok(ForwardRef::new(pos, PatchSite::Jump))
    }

    /// Jump with a pending target, taken when `check` is zero
    pub fn jump_if_zero(&mut self, check: Operand) -> CompileResult<ForwardRef> {
        // The zero test reads a register value, never memory
        let test = if check.register.is_working() {
            check.register
        } else {
            self.release(check);
            let test = self.next_working()?;
            self.emit(Instruction::arithmetic(
                Opcode::Addi,
                check.location(),
                RegOperand::constant(0),
                RegOperand::reg(test),
            ))?;
            test
        };
        let pos = self.emit(Instruction::jump(Opcode::Jmpz, RegOperand::reg(Register::Inv), Some(test)))?;
        self.registers.dereference(test);
        Ok(ForwardRef::new(pos, PatchSite::ConditionalJump))
    }

    /// Patch a jump to land `delta` bytes from itself
    pub fn resolve_relative(&mut self, fref: ForwardRef, delta: i32) {
        patch::resolve_relative(&mut self.code, fref, delta);
    }

    /// Patch a jump to land on the next instruction to be emitted
    pub fn resolve_here(&mut self, fref: ForwardRef) {
        let delta = (self.code.position() as i32 - fref.position() as i32) * CODE_ALIGNMENT as i32;
        patch::resolve_relative(&mut self.code, fref, delta);
    }

    /// Patch a jump to an absolute address
    pub fn resolve_absolute(&mut self, fref: ForwardRef, address: u32) {
        patch::resolve_absolute(&mut self.code, fref, address);
    }

    // ===== I/O =====

    /// Push the address of the lvalue on top of the operand stack for `read`
    pub fn add_read(&mut self) -> CompileResult<()> {
        let target = self.pop_value();
        if !target.register.is_index() {
            self.release(target);
            return self.fail(CompileError::LvalueConstant);
        }
        let rt = self.next_working()?;
        self.emit(Instruction::indirect(Opcode::Rcopyd, target.register, IndirectOffset::Constant(target.offset), rt))?;
        self.emit(Instruction::stack(Opcode::Push, RegOperand::reg(rt)))?;
        self.io_count += 1;
        self.registers.dereference(rt);
        self.release(target);
        Ok(())
    }

    /// Evaluate the pending expression and push it for `print`
    pub fn add_print(&mut self) -> CompileResult<()> {
        self.drain_all()?;
        let value = self.pop_value();
        self.emit(Instruction::stack(Opcode::Push, value.location()))?;
        self.io_count += 1;
        self.release(value);
        Ok(())
    }

    fn finish_io(&mut self, opcode: Opcode) -> CompileResult<()> {
        assert!(self.io_count >= 1, "{} with nothing pushed", opcode);
        let count = std::mem::take(&mut self.io_count);
        self.emit(Instruction::io(opcode, count))?;
        Ok(())
    }

    /// Emit `READ` for every address pushed since the last I/O statement
    pub fn finish_read(&mut self) -> CompileResult<()> {
        self.finish_io(Opcode::Read)
    }

    /// Emit `PRINT` for every value pushed since the last I/O statement
    pub fn finish_print(&mut self) -> CompileResult<()> {
        self.finish_io(Opcode::Print)
    }

    /// Values pushed for the I/O statement in progress
    pub fn io_count(&self) -> u32 {
        self.io_count
    }

    // ===== Output =====

    /// Snapshot the generated program
    pub fn program(&self) -> Program {
        Program::new(
            self.symbols.clone(),
            self.code.code().to_vec(),
            self.scopes.global().data_pointer as u32,
        )
    }

    /// Consume the generator, returning the program and the sink
    pub fn into_program(self) -> (Program, S) {
        let data_pointer = self.scopes.global().data_pointer as u32;
        (Program::new(self.symbols, self.code.finish(), data_pointer), self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::constants::CODE_START;
    use crate::compiler::bytecode::{JumpOperands, Operands};

    fn opcodes(g: &Generator) -> Vec<Opcode> {
        g.code().iter().map(|i| i.opcode().unwrap()).collect()
    }

    fn jump_at(g: &Generator, pos: usize) -> JumpOperands {
        match g.code()[pos].operands().unwrap() {
            Operands::Jump(j) => j,
            other => panic!("expected jump, got {:?}", other),
        }
    }

    fn open_function(g: &mut Generator, name: &str, params: &[(&str, DataType)]) {
        g.begin_function(name, DataType::Int32).unwrap();
        if params.is_empty() {
            g.declare_parameter("", DataType::Void).unwrap();
        }
        for (p, ty) in params {
            g.declare_parameter(p, *ty).unwrap();
        }
        g.function_header_stage0().unwrap();
    }

    fn close_function(g: &mut Generator) {
        g.function_header_stage1();
        g.function_trailer().unwrap();
    }

    #[test]
    fn test_precedence_and_register_reuse() {
        let mut g = Generator::new();
        g.declare_variable("a", DataType::Int32, false).unwrap();

        // a = 3 + 4 * 2
        g.push_variable("a").unwrap();
        g.push_operator(Operator::Store);
        g.push_constant(3);
        g.push_operator(Operator::Plus);
        g.push_constant(4);
        g.push_operator(Operator::Times);
        g.push_constant(2);
        g.finish_statement().unwrap();

        assert_eq!(opcodes(&g), vec![Opcode::Muli, Opcode::Addi, Opcode::Stri32]);
        match g.code()[1].operands().unwrap() {
            Operands::Arithmetic(a) => {
                assert_eq!(a.left, RegOperand::constant(3));
                assert_eq!(a.right, RegOperand::reg(Register::Rt0));
                assert_eq!(a.dest, RegOperand::reg(Register::Rt0));
            }
            other => panic!("unexpected {:?}", other),
        }
        match g.code()[2].operands().unwrap() {
            Operands::Store(s) => {
                assert_eq!(s.source, RegOperand::reg(Register::Rt0));
                assert_eq!(s.dest, RegOperand::new(Register::Rgd, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(g.registers().working_in_use(), 0);
        assert_eq!(g.current_address(), CODE_START + 24);
    }

    #[test]
    fn test_drain_while_stops_at_lower_precedence() {
        let mut g = Generator::new();
        g.push_constant(1);
        g.push_operator(Operator::Plus);
        g.push_constant(2);
        g.push_operator(Operator::Times);
        g.push_constant(3);
        g.drain_while(&[Operator::Times, Operator::Div]).unwrap();
        assert_eq!(opcodes(&g), vec![Opcode::Muli]);
        assert_eq!(g.operator_depth(), 1);
        assert_eq!(g.operand_depth(), 2);
    }

    #[test]
    fn test_store_to_constant_rejected() {
        let mut g = Generator::new();
        g.push_constant(1);
        g.push_operator(Operator::Store);
        g.push_constant(2);
        assert_eq!(g.drain_all(), Err(CompileError::LvalueConstant));
        assert_eq!(g.sink().count(&CompileError::LvalueConstant), 1);
        assert!(g.code().is_empty());
    }

    #[test]
    fn test_invalid_operand_types_reported() {
        let mut g = Generator::new();
        g.declare_variable("t", DataType::Thread, false).unwrap();
        g.push_variable("t").unwrap();
        g.push_operator(Operator::Plus);
        g.push_constant(1);
        assert_eq!(g.drain_all(), Err(CompileError::InvalidInstruction));
        assert_eq!(g.sink().errors(), &[CompileError::InvalidInstruction]);
    }

    #[test]
    fn test_out_of_registers() {
        let mut g = Generator::new();
        // Each pending addition holds its product in a fresh register
        for _ in 0..9 {
            g.push_constant(1);
            g.push_operator(Operator::Plus);
            g.push_constant(1);
            g.push_operator(Operator::Times);
            g.push_constant(1);
            g.drain_while(&[Operator::Times]).unwrap_or(());
        }
        assert_eq!(g.sink().count(&CompileError::OutOfRegisters), 1);
    }

    #[test]
    fn test_local_array_access() {
        let mut g = Generator::new();
        open_function(&mut g, "f", &[]);
        let arr = g.declare_array("arr", DataType::Int16, 4, false).unwrap();
        let start = g.code().len();

        g.push_array("arr").unwrap();
        g.push_constant(2);
        g.close_array().unwrap();
        let element = g.pop_operand().unwrap();
        assert_eq!(element.register, Register::Ix0);
        assert_eq!(element.data_type, DataType::Int16);

        let emitted = &g.code()[start..];
        assert_eq!(
            emitted.iter().map(|i| i.opcode().unwrap()).collect::<Vec<_>>(),
            vec![Opcode::Muli, Opcode::Addi, Opcode::Rcopyd]
        );
        match emitted[0].operands().unwrap() {
            Operands::Arithmetic(a) => assert_eq!(a.right, RegOperand::constant(-4)),
            other => panic!("unexpected {:?}", other),
        }
        match emitted[1].operands().unwrap() {
            Operands::Arithmetic(a) => assert_eq!(a.right, RegOperand::constant(arr.offset)),
            other => panic!("unexpected {:?}", other),
        }
        match emitted[2].operands().unwrap() {
            Operands::Indirect(ind) => {
                assert_eq!(ind.source, Register::Rst);
                assert_eq!(ind.offset, IndirectOffset::Register(Register::Rt0));
                assert_eq!(ind.dest, Register::Ix0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(g.registers().working_in_use(), 0);
        assert_eq!(g.registers().index_in_use(), 1);
    }

    #[test]
    fn test_global_array_uses_positive_stride() {
        let mut g = Generator::new();
        g.declare_variable("pad", DataType::Int32, false).unwrap();
        g.declare_array("arr", DataType::Int32, 3, false).unwrap();
        g.push_array("arr").unwrap();
        g.push_constant(1);
        g.close_array().unwrap();
        match g.code()[2].operands().unwrap() {
            Operands::Indirect(ind) => assert_eq!(ind.source, Register::Rgd),
            other => panic!("unexpected {:?}", other),
        }
        match g.code()[0].operands().unwrap() {
            Operands::Arithmetic(a) => assert_eq!(a.right, RegOperand::constant(4)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_push_array_on_scalar() {
        let mut g = Generator::new();
        g.declare_variable("s", DataType::Int32, false).unwrap();
        assert_eq!(g.push_array("s"), Err(CompileError::NotAnArray { name: "s".into() }));
        assert_eq!(g.sink().errors().len(), 1);
    }

    #[test]
    fn test_program_start_patched_to_main() {
        let mut g = Generator::new();
        g.program_start_stage0().unwrap();
        assert_eq!(jump_at(&g, 3).target.register, Register::Inv);

        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        close_function(&mut g);
        g.program_start_stage1().unwrap();

        let main = g.main_address().unwrap();
        assert_eq!(main, CODE_START + 4 * 8);
        assert_eq!(jump_at(&g, 3).target, RegOperand::constant(main as i32));
        assert_eq!(g.symbols(), &[FunctionSymbol { address: main, parameter_count: 1 }]);
    }

    #[test]
    fn test_main_not_defined() {
        let mut g = Generator::new();
        g.program_start_stage0().unwrap();
        open_function(&mut g, "helper", &[]);
        close_function(&mut g);
        assert_eq!(g.program_start_stage1(), Err(CompileError::MainNotDefined));
        assert_eq!(g.sink().count(&CompileError::MainNotDefined), 1);
    }

    #[test]
    fn test_illegal_main() {
        let mut g = Generator::new();
        g.begin_function("main", DataType::Int32).unwrap();
        g.declare_parameter("", DataType::Void).unwrap();
        assert_eq!(g.function_header_stage0(), Err(CompileError::IllegalMain));
        assert!(g.code().is_empty());
    }

    #[test]
    fn test_prologue_and_epilogue_shape() {
        let mut g = Generator::new();
        open_function(&mut g, "f", &[("a", DataType::Int32), ("b", DataType::Int32)]);
        g.declare_variable("x", DataType::Int32, false).unwrap();
        g.declare_variable("y", DataType::Int32, false).unwrap();
        close_function(&mut g);

        assert_eq!(
            opcodes(&g),
            vec![
                Opcode::Rcopyd,
                Opcode::Push,
                Opcode::Rcopyd,
                Opcode::Rcopyd,
                Opcode::Rcopyd,
                Opcode::Pop,
                Opcode::Rcopyd,
                Opcode::Return,
            ]
        );
        match g.code()[3].operands().unwrap() {
            Operands::Indirect(ind) => assert_eq!(ind.offset, IndirectOffset::Constant(-8)),
            other => panic!("unexpected {:?}", other),
        }
        match g.code()[4].operands().unwrap() {
            Operands::Indirect(ind) => assert_eq!(ind.offset, IndirectOffset::Constant(8)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(g.code()[7].operands().unwrap(), Operands::Return(8));
        assert!(!g.scopes().in_function());
    }

    #[test]
    fn test_void_function_cleans_nothing() {
        let mut g = Generator::new();
        open_function(&mut g, "f", &[]);
        close_function(&mut g);
        assert_eq!(g.code().last().unwrap().operands().unwrap(), Operands::Return(0));
    }

    #[test]
    fn test_returns_patched_to_epilogue() {
        let mut g = Generator::new();
        open_function(&mut g, "f", &[]);
        let mut jumps = Vec::new();
        for value in 1..=3 {
            g.push_constant(value);
            g.return_statement().unwrap();
            jumps.push(g.code().len() - 1);
        }
        assert_eq!(g.pending_returns(), 3);
        g.function_header_stage1();
        let epilogue = g.code().len();
        g.function_trailer().unwrap();

        for pos in jumps {
            let j = jump_at(&g, pos);
            assert_eq!(j.target.register, Register::Rip);
            assert_eq!(pos as i32 * 8 + j.target.offset, epilogue as i32 * 8);
        }
        assert_eq!(g.pending_returns(), 0);
    }

    #[test]
    fn test_call_with_result() {
        let mut g = Generator::new();
        open_function(&mut g, "add", &[("a", DataType::Int32), ("b", DataType::Int32)]);
        close_function(&mut g);
        let add = g.symbols()[0].address;

        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        let mut call = g.begin_call("add").unwrap();
        for v in [1, 2] {
            g.push_operator(Operator::LParen);
            g.push_constant(v);
            g.push_parameter(&mut call).unwrap();
        }
        let call_ref = g.make_call(call).unwrap();
        let result = g.pop_operand().unwrap();
        assert_eq!(result.register, Register::Rt0);
        assert_eq!(result.data_type, DataType::Int32);

        assert_eq!(jump_at(&g, call_ref.position()).target, RegOperand::constant(add as i32));
        assert_eq!(g.code()[call_ref.position() - 1].opcode(), Some(Opcode::Push));
        assert_eq!(g.code()[call_ref.position() + 1].opcode(), Some(Opcode::Rcopyd));

        g.patch_parallel(call_ref, ParallelMode::Sync);
        assert_eq!(g.code()[call_ref.position()].opcode(), Some(Opcode::Callplls));
    }

    #[test]
    fn test_excess_parameter_reported_once() {
        let mut g = Generator::new();
        open_function(&mut g, "one", &[("a", DataType::Int32)]);
        close_function(&mut g);
        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        let before = g.code().len();

        let mut call = g.begin_call("one").unwrap();
        let mut results = Vec::new();
        for v in [1, 2, 3] {
            g.push_operator(Operator::LParen);
            g.push_constant(v);
            results.push(g.push_parameter(&mut call));
        }
        assert_eq!(results[0], Ok(()));
        assert_eq!(results[1], Err(CompileError::ExcessParameter));
        assert_eq!(results[2], Err(CompileError::ExcessParameter));
        assert_eq!(g.make_call(call), Err(CompileError::ExcessParameter));

        assert_eq!(g.sink().count(&CompileError::ExcessParameter), 1);
        let emitted = &g.code()[before..];
        assert_eq!(emitted.len(), 1);
        assert!(emitted.iter().all(|i| !i.opcode().unwrap().is_call()));
    }

    #[test]
    fn test_void_call() {
        let mut g = Generator::new();
        g.begin_function("tick", DataType::Void).unwrap();
        g.declare_parameter("", DataType::Void).unwrap();
        g.function_header_stage0().unwrap();
        close_function(&mut g);

        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        let call = g.begin_call("tick").unwrap();
        g.push_operator(Operator::LParen);
        g.void_parameter(&call).unwrap();
        g.make_call(call).unwrap();
        let result = g.pop_operand().unwrap();
        assert_eq!(result, Operand::invalid());
        assert_eq!(g.operator_depth(), 0);
    }

    #[test]
    fn test_void_parameter_mismatch() {
        let mut g = Generator::new();
        open_function(&mut g, "one", &[("a", DataType::Int32)]);
        close_function(&mut g);
        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        let call = g.begin_call("one").unwrap();
        g.push_operator(Operator::LParen);
        assert_eq!(g.void_parameter(&call), Err(CompileError::ParameterMismatch));
        assert_eq!(g.make_call(call), Err(CompileError::ParameterMismatch));
    }

    #[test]
    fn test_parameter_type_mismatch() {
        let mut g = Generator::new();
        open_function(&mut g, "one", &[("a", DataType::Int32)]);
        close_function(&mut g);
        g.begin_function("main", DataType::Int32).unwrap();
        g.declare_parameter("argc", DataType::Int32).unwrap();
        g.declare_variable("t", DataType::Thread, false).unwrap();
        g.function_header_stage0().unwrap();

        let mut call = g.begin_call("one").unwrap();
        g.push_operator(Operator::LParen);
        g.push_variable("t").unwrap();
        assert_eq!(g.push_parameter(&mut call), Err(CompileError::ParameterTypeMismatch));
    }

    #[test]
    fn test_call_unknown_or_non_function() {
        let mut g = Generator::new();
        g.declare_variable("v", DataType::Int32, false).unwrap();
        assert!(matches!(g.begin_call("nope"), Err(CompileError::Undeclared { .. })));
        assert!(matches!(g.begin_call("v"), Err(CompileError::NotAFunction { .. })));
        assert_eq!(g.sink().errors().len(), 2);
    }

    #[test]
    fn test_print_and_read() {
        let mut g = Generator::new();
        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        g.declare_variable("x", DataType::Int32, false).unwrap();
        let start = g.code().len();

        g.push_variable("x").unwrap();
        g.add_read().unwrap();
        g.finish_read().unwrap();

        g.push_variable("x").unwrap();
        g.add_print().unwrap();
        g.push_constant(7);
        g.add_print().unwrap();
        assert_eq!(g.io_count(), 2);
        g.finish_print().unwrap();
        assert_eq!(g.io_count(), 0);

        let emitted: Vec<_> = g.code()[start..].iter().map(|i| i.opcode().unwrap()).collect();
        assert_eq!(
            emitted,
            vec![Opcode::Rcopyd, Opcode::Push, Opcode::Read, Opcode::Push, Opcode::Push, Opcode::Print]
        );
        assert_eq!(g.code().last().unwrap().operands().unwrap(), Operands::Io(2));
    }

    #[test]
    fn test_read_into_constant_rejected() {
        let mut g = Generator::new();
        g.push_constant(4);
        assert_eq!(g.add_read(), Err(CompileError::LvalueConstant));
    }

    #[test]
    fn test_conditional_jump_resolved_here() {
        let mut g = Generator::new();
        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        g.push_variable("argc").unwrap();
        let check = g.pop_operand().unwrap();
        let skip = g.jump_if_zero(check).unwrap();
        let jmpz = skip.position();
        g.push_constant(1);
        g.add_print().unwrap();
        g.finish_print().unwrap();
        g.resolve_here(skip);

        let j = jump_at(&g, jmpz);
        assert_eq!(j.zero_test, Some(Register::Rt0));
        assert_eq!(j.target, RegOperand::new(Register::Rip, 3 * 8));
        assert_eq!(g.registers().working_in_use(), 0);
    }

    #[test]
    fn test_program_output() {
        let mut g = Generator::new();
        g.declare_variable("a", DataType::Int32, false).unwrap();
        g.declare_variable("b", DataType::Int32, false).unwrap();
        g.program_start_stage0().unwrap();
        open_function(&mut g, "main", &[("argc", DataType::Int32)]);
        close_function(&mut g);
        g.program_start_stage1().unwrap();

        let (program, sink) = g.into_program();
        assert!(sink.is_empty());
        assert_eq!(program.header.data_size, 8 * STACK_ALIGNMENT);
        assert_eq!(program.code.len(), 4 + 8);
        assert_eq!(program.symbols.len(), 1);
    }

    #[test]
    fn test_custom_sink_closure() {
        let mut seen = Vec::new();
        {
            let mut g = Generator::with_sink(|e: &CompileError| seen.push(e.to_string()));
            let _ = g.program_start_stage1();
        }
        assert_eq!(seen, vec![CompileError::MainNotDefined.to_string()]);
    }
}
