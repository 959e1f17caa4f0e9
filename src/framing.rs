//! Line framing for newline-delimited streaming bodies.
//!
//! Chunk boundaries from the transport are arbitrary: a chunk may end in the
//! middle of a line, contain several lines, or contain none. `LineBuffer`
//! holds the unterminated suffix across chunks so that the rest of the
//! pipeline only ever sees whole lines.

/// Accumulates chunk text and yields complete newline-terminated lines.
///
/// Invariant: after `feed` returns, the buffer holds exactly the content
/// after the last `\n` seen so far (possibly empty) and never contains a
/// `\n` itself.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns all lines completed by it, in order.
    ///
    /// Empty lines are returned too; callers decide whether to skip blanks.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop(); // drop the terminator
            lines.push(line);
        }
        lines
    }

    /// Drains the residual content at end-of-stream.
    ///
    /// A backend may close the body without terminating the last fragment;
    /// that fragment is still one logical line. Blank residue yields `None`.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let trimmed = rest.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    #[cfg(test)]
    fn pending(&self) -> &str {
        &self.pending
    }
}
