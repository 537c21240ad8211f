//! Terminator-delimited message framing.
//!
//! [`LineFramer`] turns arbitrarily split byte chunks into complete
//! messages. Unterminated text accumulates in a single buffer and every
//! scan runs over that concatenation, so a terminator split across two
//! chunks is still found. The scan resumes just before the point already
//! examined instead of rescanning the whole buffer; results are identical.
//!
//! UTF-8 sequences cut by a chunk boundary are held back until the next
//! chunk completes them. Bytes that can never be valid UTF-8 make the whole
//! chunk fail with [`AppError::Decode`].

use tracing::warn;

use crate::config::DEFAULT_MAX_BUFFERED_BYTES;
use crate::{AppError, Result};

/// Stateful splitter of a byte stream into terminator-delimited messages.
#[derive(Debug, Clone)]
pub struct LineFramer {
    terminator: String,
    buffer: String,
    /// Bytes of `buffer` already searched without finding a terminator.
    scanned: usize,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    max_buffered_bytes: usize,
}

impl LineFramer {
    /// Create a framer splitting on `terminator`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `terminator` is empty.
    pub fn new(terminator: impl Into<String>) -> Result<Self> {
        let terminator = terminator.into();
        if terminator.is_empty() {
            return Err(AppError::Config("terminator must not be empty".into()));
        }

        Ok(Self {
            terminator,
            buffer: String::new(),
            scanned: 0,
            pending: Vec::new(),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        })
    }

    /// Cap the unterminated text kept between chunks.
    #[must_use]
    pub fn with_max_buffered_bytes(mut self, max_buffered_bytes: usize) -> Self {
        self.max_buffered_bytes = max_buffered_bytes.max(1);
        self
    }

    /// Terminator this framer splits on.
    #[must_use]
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// Unterminated text received so far.
    #[must_use]
    pub fn residual(&self) -> &str {
        &self.buffer
    }

    /// Whether any received data is still waiting for a terminator.
    #[must_use]
    pub fn has_residual(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.is_empty()
    }

    /// Drain everything not yet delivered.
    ///
    /// Incomplete UTF-8 bytes are included lossily. Returns `None` when
    /// nothing is buffered.
    pub fn take_residual(&mut self) -> Option<String> {
        if !self.has_residual() {
            return None;
        }

        let mut residual = std::mem::take(&mut self.buffer);
        residual.push_str(&String::from_utf8_lossy(&self.pending));
        self.pending.clear();
        self.scanned = 0;
        Some(residual)
    }

    /// Feed one raw chunk, calling `on_message` once per completed message
    /// in stream order.
    ///
    /// # Errors
    ///
    /// - `AppError::Decode("invalid utf-8 …")` — the chunk holds bytes that
    ///   are not UTF-8. The chunk is dropped and no message is delivered.
    /// - `AppError::Decode("message too long …")` — the unterminated text
    ///   outgrew the configured cap and was discarded. Messages completed
    ///   earlier in the same chunk have already been delivered.
    pub fn handle_read<F>(&mut self, chunk: &[u8], mut on_message: F) -> Result<()>
    where
        F: FnMut(String),
    {
        let text = self.decode(chunk)?;
        self.buffer.push_str(&text);

        let mut from = self.resume_offset();
        let mut consumed = 0;

        while let Some(rel) = self.buffer[from..].find(self.terminator.as_str()) {
            let index = from + rel;
            on_message(self.buffer[consumed..index].to_owned());
            consumed = index + self.terminator.len();
            from = consumed;
        }

        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_buffered_bytes {
            let discarded = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            warn!(
                discarded,
                limit = self.max_buffered_bytes,
                "framer: unterminated message exceeded limit, discarding"
            );
            return Err(AppError::Decode(format!(
                "message too long: exceeded {} bytes without a terminator",
                self.max_buffered_bytes
            )));
        }

        Ok(())
    }

    /// Start of the next search: a partial terminator may end the scanned
    /// region, so back up by `terminator.len() - 1` bytes.
    fn resume_offset(&self) -> usize {
        let mut from = self.scanned.saturating_sub(self.terminator.len() - 1);
        while !self.buffer.is_char_boundary(from) {
            from -= 1;
        }
        from
    }

    fn decode(&mut self, chunk: &[u8]) -> Result<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(err) => {
                let utf8 = err.utf8_error();
                if utf8.error_len().is_some() {
                    return Err(AppError::Decode(format!(
                        "invalid utf-8 at byte {}",
                        utf8.valid_up_to()
                    )));
                }

                let valid = utf8.valid_up_to();
                let mut bytes = err.into_bytes();
                self.pending = bytes.split_off(valid);
                String::from_utf8(bytes).map_err(|e| AppError::Decode(e.to_string()))
            }
        }
    }
}
