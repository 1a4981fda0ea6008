//! Scope contexts and symbol tables
//!
//! There is always a global context, and at most one function context on top
//! of it. Each context owns its symbol table plus the cursors that place new
//! code, data and parameters:
//!
//! - global data grows up from `DATA_START`, addressed from RGD
//! - locals grow down from the frame base, addressed from RST
//! - parameters sit above the saved frame marker and return address

use super::identifier::{FunctionInfo, Symbol, Variable};
use super::types::DataType;
use crate::compiler::bytecode::constants::{CODE_START, DATA_START, STACK_ALIGNMENT};
use crate::compiler::bytecode::{FunctionSymbol, Register};
use crate::compiler::error::{CompileError, CompileResult};
use rustc_hash::FxHashMap;

const SLOT: i32 = STACK_ALIGNMENT as i32;

/// First parameter offset from RST: saved RST at +0, return address at +4
const FIRST_PARAMETER_OFFSET: i32 = 8;

/// Outcome of validating a function against the `int main(int)` prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainCheck {
    /// The function is `main` and its prototype is valid
    Ok,
    /// The function is `main` with a bad prototype
    Invalid,
    /// The function is not `main`
    NotMain,
}

/// Compilation state for the global scope or one function body
#[derive(Debug, Clone)]
pub struct ScopeContext {
    symbols: FxHashMap<String, Symbol>,
    /// Address of the next instruction
    pub code_pointer: u32,
    /// Next data address: absolute for globals, frame-relative for locals
    pub data_pointer: i32,
    /// Offset handed to the next declared parameter
    pub parameter_pointer: i32,
    function: Option<String>,
    parameters: Vec<String>,
}

impl ScopeContext {
    fn global() -> Self {
        Self {
            symbols: FxHashMap::default(),
            code_pointer: CODE_START,
            data_pointer: DATA_START as i32,
            parameter_pointer: 0,
            function: None,
            parameters: Vec::new(),
        }
    }

    fn function(name: &str, code_pointer: u32) -> Self {
        Self {
            symbols: FxHashMap::default(),
            code_pointer,
            data_pointer: 0,
            parameter_pointer: FIRST_PARAMETER_OFFSET,
            function: Some(name.to_string()),
            parameters: Vec::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.function.is_none()
    }

    /// Name of the function this context compiles, if any
    pub fn function_name(&self) -> Option<&str> {
        self.function.as_deref()
    }

    /// Symbol declared directly in this context
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// The global context plus the function context being compiled
#[derive(Debug, Clone)]
pub struct Scopes {
    global: ScopeContext,
    local: Option<ScopeContext>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            global: ScopeContext::global(),
            local: None,
        }
    }

    pub fn global(&self) -> &ScopeContext {
        &self.global
    }

    pub fn local(&self) -> Option<&ScopeContext> {
        self.local.as_ref()
    }

    /// Innermost context
    pub fn current(&self) -> &ScopeContext {
        self.local.as_ref().unwrap_or(&self.global)
    }

    pub fn current_mut(&mut self) -> &mut ScopeContext {
        self.local.as_mut().unwrap_or(&mut self.global)
    }

    pub fn in_function(&self) -> bool {
        self.local.is_some()
    }

    // ===== Lookup =====

    /// Resolve a name, local scope first
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.local
            .as_ref()
            .and_then(|l| l.symbols.get(name))
            .or_else(|| self.global.symbols.get(name))
    }

    /// Whether the name is visible from the current scope
    pub fn exists(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Resolve a name that must be a variable or parameter
    pub fn variable(&self, name: &str) -> CompileResult<Variable> {
        match self.lookup(name) {
            Some(symbol) => symbol.as_variable().copied().ok_or_else(|| CompileError::Undeclared {
                name: name.to_string(),
            }),
            None => Err(CompileError::Undeclared { name: name.to_string() }),
        }
    }

    /// Resolve a name that must be an array variable
    pub fn array(&self, name: &str) -> CompileResult<Variable> {
        let var = self.variable(name)?;
        if var.is_array() {
            Ok(var)
        } else {
            Err(CompileError::NotAnArray { name: name.to_string() })
        }
    }

    /// Resolve a name that must be a function
    pub fn function(&self, name: &str) -> CompileResult<&FunctionInfo> {
        match self.lookup(name) {
            Some(Symbol::Function(f)) => Ok(f),
            Some(_) => Err(CompileError::NotAFunction { name: name.to_string() }),
            None => Err(CompileError::Undeclared { name: name.to_string() }),
        }
    }

    /// The function whose body is being compiled
    pub fn current_function(&self) -> Option<&FunctionInfo> {
        let name = self.local.as_ref()?.function.as_deref()?;
        self.global.symbols.get(name)?.as_function()
    }

    fn current_function_mut(&mut self) -> Option<&mut FunctionInfo> {
        let name = self.local.as_ref()?.function.as_deref()?;
        match self.global.symbols.get_mut(name)? {
            Symbol::Function(f) => Some(f),
            _ => None,
        }
    }

    // ===== Declarations =====

    fn insert(&mut self, name: &str, symbol: Symbol) -> CompileResult<()> {
        if self.exists(name) {
            return Err(CompileError::Redeclared { name: name.to_string() });
        }
        tracing::trace!(name, ?symbol, "declare");
        self.current_mut().symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Claim one slot in the current context for a new variable
    fn place(&mut self, data_type: DataType, atomic: bool) -> Variable {
        let global = !self.in_function();
        let ctx = self.current_mut();
        let (register, offset) = if global {
            let offset = ctx.data_pointer - DATA_START as i32;
            ctx.data_pointer += SLOT;
            (Register::Rgd, offset)
        } else {
            let offset = ctx.data_pointer - SLOT;
            ctx.data_pointer -= SLOT;
            (Register::Rst, offset)
        };
        Variable {
            data_type,
            register,
            offset,
            atomic,
            array_len: None,
        }
    }

    /// Declare a scalar variable in the current scope
    pub fn declare_variable(
        &mut self,
        name: &str,
        data_type: DataType,
        atomic: bool,
    ) -> CompileResult<Variable> {
        if self.exists(name) {
            return Err(CompileError::Redeclared { name: name.to_string() });
        }
        let var = self.place(data_type, atomic);
        self.insert(name, Symbol::Variable(var))?;
        Ok(var)
    }

    /// Declare an array of `len` elements in the current scope
    pub fn declare_array(
        &mut self,
        name: &str,
        data_type: DataType,
        len: u32,
        atomic: bool,
    ) -> CompileResult<Variable> {
        if atomic {
            return Err(CompileError::AtomicArray);
        }
        if len == 0 {
            return Err(CompileError::EmptyArray);
        }
        if self.exists(name) {
            return Err(CompileError::Redeclared { name: name.to_string() });
        }
        let mut var = self.place(data_type, false);
        var.array_len = Some(len);
        let size = len as i32 * SLOT;
        let ctx = self.current_mut();
        if var.register == Register::Rgd {
            ctx.data_pointer += size;
        } else {
            ctx.data_pointer -= size;
        }
        self.insert(name, Symbol::Variable(var))?;
        Ok(var)
    }

    /// Declare a function in the global scope and enter its body.
    ///
    /// The function's address is the global code pointer at this point.
    pub fn begin_function(&mut self, name: &str, return_type: DataType) -> CompileResult<()> {
        if self.in_function() {
            return Err(CompileError::NotGlobalScope);
        }
        let address = self.global.code_pointer;
        self.insert(
            name,
            Symbol::Function(FunctionInfo {
                return_type,
                address,
                parameters: Vec::new(),
            }),
        )?;
        self.local = Some(ScopeContext::function(name, address));
        tracing::debug!(name, address = format_args!("{:#07X}", address), "enter function");
        Ok(())
    }

    /// Declare the next parameter of the current function.
    ///
    /// An empty name declares an anonymous parameter, as in `f(void)`.
    pub fn declare_parameter(&mut self, name: &str, data_type: DataType) -> CompileResult<Variable> {
        if !self.in_function() {
            return Err(CompileError::NotGlobalScope);
        }
        if !name.is_empty() && self.exists(name) {
            return Err(CompileError::Redeclared { name: name.to_string() });
        }
        let var = {
            let ctx = self.current_mut();
            let var = Variable {
                data_type,
                register: Register::Rst,
                offset: ctx.parameter_pointer,
                atomic: false,
                array_len: None,
            };
            ctx.parameter_pointer += SLOT;
            ctx.parameters.push(name.to_string());
            if !name.is_empty() {
                ctx.symbols.insert(name.to_string(), Symbol::Parameter(var));
            }
            var
        };
        if let Some(f) = self.current_function_mut() {
            f.parameters.push(data_type);
        }
        Ok(var)
    }

    /// Re-number parameter offsets to match the caller's push order.
    ///
    /// Arguments are pushed first to last, so the first parameter ends up
    /// deepest: it gets `4 + 4n` and the last one gets 8.
    pub fn reverse_parameter_offsets(&mut self) {
        let Some(ctx) = self.local.as_mut() else {
            return;
        };
        let mut offset = 4 + SLOT * ctx.parameters.len() as i32;
        for name in &ctx.parameters {
            assert!(offset >= FIRST_PARAMETER_OFFSET);
            if let Some(Symbol::Parameter(var)) = ctx.symbols.get_mut(name) {
                var.offset = offset;
            }
            offset -= SLOT;
        }
    }

    /// Leave the current function, carrying its code pointer back to the
    /// global context.
    pub fn end_function(&mut self) {
        if let Some(ctx) = self.local.take() {
            tracing::debug!(
                function = ctx.function.as_deref().unwrap_or_default(),
                locals = -ctx.data_pointer,
                "leave function"
            );
            self.global.code_pointer = ctx.code_pointer;
        }
    }

    /// Validate the current function against `int main(int)`
    pub fn check_main(&self) -> MainCheck {
        let is_main = self.local.as_ref().and_then(|l| l.function.as_deref()) == Some("main");
        let Some(f) = self.current_function().filter(|_| is_main) else {
            return MainCheck::NotMain;
        };
        if !f.return_type.is_integer() {
            return MainCheck::Invalid;
        }
        match f.parameters.as_slice() {
            [only] if only.is_integer() => MainCheck::Ok,
            _ => MainCheck::Invalid,
        }
    }

    /// Symbol table entry for the current function
    pub fn register_function_symbol(&self) -> Option<FunctionSymbol> {
        let f = self.current_function()?;
        assert!(!f.parameters.is_empty(), "function declared without a parameter list");
        Some(FunctionSymbol {
            address: f.address,
            parameter_count: f.parameter_count(),
        })
    }
}
