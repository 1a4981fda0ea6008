//! Console port for PRINT and READ
//!
//! Every VM thread shares one console. The reader and writer sit behind
//! separate locks, so a thread blocked on input does not hold up output.

use super::{VmError, VmResult};
use parking_lot::Mutex;
use std::io::{BufRead, Write};
use std::sync::Arc;

type Reader = Box<dyn BufRead + Send>;
type Writer = Box<dyn Write + Send>;

/// Line-oriented console used by the I/O instructions
pub struct Console {
    input: Mutex<Reader>,
    output: Mutex<Writer>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    /// Console over arbitrary reader and writer
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Process stdin and stdout
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout())
    }

    /// Console reading from a fixed script and capturing everything written
    pub fn scripted(input: impl Into<String>) -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        let input = std::io::Cursor::new(input.into().into_bytes());
        (Self::new(input, captured.clone()), captured)
    }

    /// Write `PRINT: <value>` on its own line
    pub fn print(&self, value: i32) -> VmResult<()> {
        let mut out = self.output.lock();
        writeln!(out, "PRINT: {}", value)?;
        out.flush()?;
        Ok(())
    }

    /// Prompt with `READ: ` and parse one integer line
    pub fn read_i32(&self) -> VmResult<i32> {
        {
            let mut out = self.output.lock();
            write!(out, "READ: ")?;
            out.flush()?;
        }
        let mut line = String::new();
        if self.input.lock().read_line(&mut line)? == 0 {
            return Err(VmError::EndOfInput);
        }
        let text = line.trim();
        text.parse::<i32>()
            .map_err(|_| VmError::InvalidInput(text.to_string()))
    }
}

/// Shared buffer collecting console output
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Everything written so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Values of the `PRINT:` lines written so far
    pub fn printed(&self) -> Vec<i32> {
        self.contents()
            .lines()
            .filter_map(|line| line.split_once("PRINT: "))
            .filter_map(|(_, value)| value.trim().parse().ok())
            .collect()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
