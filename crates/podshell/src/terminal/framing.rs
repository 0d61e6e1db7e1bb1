//! Line framing for shell output.
//!
//! Complete lines go out as soon as they arrive. A trailing partial line is
//! held until the caller's flush timer fires, so prompts without a newline
//! still reach the client.

/// Splits a byte stream into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, each with its `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split_inclusive(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Whether a partial line is waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Emit the partial line.
    ///
    /// An incomplete UTF-8 sequence at the end stays buffered for the next
    /// chunk. Returns `None` when nothing can be emitted.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }

        let keep = incomplete_utf8_suffix(&self.buffer);
        let emit_len = self.buffer.len() - keep;
        if emit_len == 0 {
            return None;
        }

        let rest = self.buffer.split_off(emit_len);
        let partial = std::mem::replace(&mut self.buffer, rest);
        Some(String::from_utf8_lossy(&partial).into_owned())
    }

    /// Emit everything, including an incomplete UTF-8 tail (lossily).
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let partial = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&partial).into_owned())
    }
}

/// Length of a trailing, not-yet-complete UTF-8 sequence.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    // A UTF-8 sequence is at most 4 bytes, so only the last 3 can be a prefix.
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            // continuation byte, keep looking for the lead byte
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return 0,
        };
        return if needed > back { back } else { 0 };
    }
    0
}
