use std::io::{self, Write};
use std::sync::Mutex;

use crate::envelope::Payload;

/// Writes accepted values to a shared sink, one per line. Lines from
/// different partitions never interleave.
pub struct Printer {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Printer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Structured values are pretty-printed with two-space indentation, raw
    /// ones are written byte for byte.
    pub fn print(&self, value: &Payload) -> io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("output lock poisoned"))?;

        match value {
            Payload::Raw(bytes) => out.write_all(bytes)?,
            Payload::Json { value, .. } => serde_json::to_writer_pretty(&mut *out, value)?,
        }
        out.write_all(b"\n")?;
        out.flush()
    }
}
