//! Ordered fan-out of one byte stream to several sinks.
//!
//! One reader, synchronous writes: every chunk is written to each sink in registration order
//! before the next chunk is read. A slow sink therefore stalls the reader, and the stall
//! reaches the producer through its pipe instead of bytes being dropped.

use std::io::{self, Read, Write};
use tracing::warn;

const CHUNK_SIZE: usize = 8 * 1024;

/// A sink failed while it was still required.
#[derive(Debug, thiserror::Error)]
#[error("sink '{sink}' failed: {source}")]
pub struct TeeError {
    pub sink: String,
    #[source]
    pub source: io::Error,
}

struct Sink {
    name: String,
    writer: Box<dyn Write + Send>,
    required: bool,
    active: bool,
}

/// Duplicates a stream into an ordered set of sinks.
#[derive(Default)]
pub struct Tee {
    sinks: Vec<Sink>,
}

impl Tee {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink whose failure aborts the copy.
    pub fn required(mut self, name: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        self.push(name.into(), Box::new(writer), true);
        self
    }

    /// Add a sink that is dropped with a warning if it fails; copying continues without it.
    pub fn best_effort(
        mut self,
        name: impl Into<String>,
        writer: impl Write + Send + 'static,
    ) -> Self {
        self.push(name.into(), Box::new(writer), false);
        self
    }

    fn push(&mut self, name: String, writer: Box<dyn Write + Send>, required: bool) {
        self.sinks.push(Sink {
            name,
            writer,
            required,
            active: true,
        });
    }

    /// Number of sinks still receiving data.
    pub fn active_sinks(&self) -> usize {
        self.sinks.iter().filter(|s| s.active).count()
    }

    /// Copy `reader` to every sink until EOF. Returns the number of bytes read.
    pub fn copy_from(&mut self, mut reader: impl Read) -> Result<u64, TeeError> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TeeError {
                        sink: "<source>".into(),
                        source: e,
                    });
                }
            };
            total += n as u64;
            self.write_chunk(&buf[..n])?;
        }
        Ok(total)
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TeeError> {
        for sink in self.sinks.iter_mut().filter(|s| s.active) {
            let result = sink
                .writer
                .write_all(chunk)
                .and_then(|()| sink.writer.flush());
            if let Err(source) = result {
                if sink.required {
                    return Err(TeeError {
                        sink: sink.name.clone(),
                        source,
                    });
                }
                warn!(sink = %sink.name, error = %source, "Output sink failed, continuing without it");
                sink.active = false;
            }
        }
        Ok(())
    }
}
