//! Chunked, newline-bounded reading.
//!
//! The pipe utilities hand out streams that are consumed in fixed-size
//! chunks, trimmed at the last newline. The scanning and carry logic is
//! platform-neutral and lives here, generic over [`std::io::Read`]; the
//! Windows pipe type plugs in underneath.

use std::io::Read;

/// Size of one read against the underlying stream.
pub const CHUNK_SIZE: usize = 4096;

/// Index one past the last newline in `data`, or `None` if it has none.
pub fn line_span(data: &[u8]) -> Option<usize> {
    data.iter().rposition(|&b| b == b'\n').map(|i| i + 1)
}

/// Reader that yields newline-terminated spans from chunked reads.
///
/// Each call to [`read_line`](Self::read_line) returns the buffered content
/// up to and including the last newline that fits the destination buffer.
/// Content after that newline is retained and served by the next call, so
/// nothing is dropped when several lines (or a partial line) arrive in one
/// chunk.
pub struct LineReader<R> {
    inner: Option<R>,
    carry: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Some(inner),
            carry: Vec::new(),
        }
    }

    /// Whether the underlying stream is still held.
    ///
    /// Becomes false after end-of-stream or a read failure; the stream is
    /// dropped (closed) at that point.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Takes the underlying stream back out, if it is still open.
    pub fn into_inner(self) -> Option<R> {
        self.inner
    }

    /// Fills `buf` with the next newline-bounded span and zero-fills the
    /// rest of `buf`. Returns the span length, or `None` once the stream is
    /// exhausted (end-of-stream and read failure are not distinguished; the
    /// stream is closed either way).
    ///
    /// The span ends at the last newline that fits in `buf`; a full buffer
    /// is handed out only when no newline fits, so a line longer than `buf`
    /// arrives in `buf`-sized pieces. A final span with no trailing newline
    /// is returned once, before `None`.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        loop {
            // A span never runs past the last newline that fits.
            let window = self.carry.len().min(buf.len());
            if let Some(end) = line_span(&self.carry[..window]) {
                return Some(self.emit(end, buf));
            }
            if !self.carry.is_empty() && self.carry.len() >= buf.len() {
                return Some(self.emit(buf.len(), buf));
            }
            let stream = match self.inner.as_mut() {
                Some(stream) => stream,
                None => {
                    if self.carry.is_empty() {
                        return None;
                    }
                    let end = self.carry.len();
                    return Some(self.emit(end, buf));
                }
            };

            let mut chunk = [0u8; CHUNK_SIZE];
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => {
                    // Closes the stream; any carried tail is served above.
                    self.inner = None;
                }
                Ok(n) => self.carry.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn emit(&mut self, len: usize, buf: &mut [u8]) -> usize {
        buf[..len].copy_from_slice(&self.carry[..len]);
        buf[len..].fill(0);
        self.carry.drain(..len);
        len
    }
}
