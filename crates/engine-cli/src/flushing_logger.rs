//! Stderr writer that flushes after every message so logs are not lost when
//! the engine runs as a buffered subprocess under a GUI.

use std::io::{self, Write};

pub struct FlushingStderrWriter {
    stderr: io::Stderr,
}

impl FlushingStderrWriter {
    pub fn new() -> Self {
        Self { stderr: io::stderr() }
    }
}

impl Default for FlushingStderrWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for FlushingStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.stderr.write(buf)?;
        self.stderr.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stderr.flush()
    }
}
