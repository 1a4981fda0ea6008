//! VM threads
//!
//! Every VM thread runs on its own native thread with a private stack and
//! register-set stack. The spawner prepares the whole [`ThreadSeed`] up
//! front and hands it over; afterwards the only state threads share is the
//! global data segment and the console.

use super::console::Console;
use super::executor::Executor;
use super::loader::LoadedProgram;
use super::memory::GlobalData;
use super::register_set::RegisterSet;
use super::{VmError, VmResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Default cap on checkpointed register sets per thread
const DEFAULT_MAX_CALL_DEPTH: usize = 1024 * 64; // 65536 frames

/// Default native stack size for VM threads
const DEFAULT_NATIVE_STACK_SIZE: usize = 2 * 1024 * 1024;

/// VM configuration
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum nesting of normal calls in one thread
    pub max_call_depth: usize,
    /// Stack size of each native thread
    pub native_stack_size: usize,
    /// Native thread name prefix
    pub thread_name: String,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            native_stack_size: DEFAULT_NATIVE_STACK_SIZE,
            thread_name: "c403-vm".to_string(),
        }
    }
}

/// Everything a new thread starts from
#[derive(Debug, Clone, Default)]
pub struct ThreadSeed {
    /// Initial registers; RIP, RST and RSB are overwritten at start
    pub registers: RegisterSet,
    /// Stack contents copied below the stack top, lowest address first
    pub mini_stack: Option<Vec<u8>>,
    /// Address of the first instruction
    pub jump_address: u32,
}

impl ThreadSeed {
    /// The program's main thread: zeroed registers, empty stack
    pub fn primary(code_start: u32) -> Self {
        Self {
            jump_address: code_start,
            ..Self::default()
        }
    }

    /// A thread entering a function directly, with `arguments` already
    /// pushed in order and an empty return address slot below them, the
    /// way a normal call leaves the stack
    pub fn call(jump_address: u32, arguments: &[i32]) -> Self {
        let mut mini_stack = Vec::with_capacity((arguments.len() + 1) * 4);
        mini_stack.extend_from_slice(&0u32.to_le_bytes());
        for argument in arguments.iter().rev() {
            mini_stack.extend_from_slice(&argument.to_le_bytes());
        }
        Self {
            registers: RegisterSet::default(),
            mini_stack: Some(mini_stack),
            jump_address,
        }
    }
}

/// How a thread finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadExit {
    /// RRV when the outermost activation returned
    pub return_value: i32,
    /// Instructions executed by the thread
    pub instructions: u64,
}

/// A loaded program plus the resources its threads share
#[derive(Debug)]
pub struct Vm {
    program: Arc<LoadedProgram>,
    console: Arc<Console>,
    options: VmOptions,
    next_thread: AtomicUsize,
}

impl Vm {
    /// Create a VM with default options
    pub fn new(program: LoadedProgram, console: Console) -> Self {
        Self::with_options(program, console, VmOptions::default())
    }

    /// Create a VM with custom options
    pub fn with_options(program: LoadedProgram, console: Console, options: VmOptions) -> Self {
        Self {
            program: Arc::new(program),
            console: Arc::new(console),
            options,
            next_thread: AtomicUsize::new(0),
        }
    }

    pub fn program(&self) -> &LoadedProgram {
        &self.program
    }

    /// Global data shared by every thread
    pub fn global(&self) -> &GlobalData {
        self.program.global()
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Start a thread on its own native thread
    pub fn spawn(&self, seed: ThreadSeed) -> VmResult<JoinHandle<VmResult<ThreadExit>>> {
        let id = self.next_thread.fetch_add(1, Ordering::Relaxed);
        let program = Arc::clone(&self.program);
        let console = Arc::clone(&self.console);
        let options = self.options.clone();
        tracing::debug!(thread = id, jump_address = seed.jump_address, "spawning VM thread");

        thread::Builder::new()
            .name(format!("{}-{}", self.options.thread_name, id))
            .stack_size(self.options.native_stack_size)
            .spawn(move || {
                let mut executor = Executor::new(program, console, &options, seed, id)?;
                executor.run()
            })
            .map_err(VmError::ThreadSpawn)
    }

    /// Wait for a thread and return its exit
    pub fn join(handle: JoinHandle<VmResult<ThreadExit>>) -> VmResult<ThreadExit> {
        handle.join().map_err(|_| VmError::ThreadPanicked)?
    }

    /// Run the program's main thread from the start of the code section
    pub fn run(&self) -> VmResult<ThreadExit> {
        let seed = ThreadSeed::primary(self.program.header().code_start);
        let exit = Self::join(self.spawn(seed)?)?;
        tracing::debug!(?exit, "program finished");
        Ok(exit)
    }
}
