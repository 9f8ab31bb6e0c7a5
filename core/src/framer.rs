use bytes::BytesMut;

use crate::line::Line;

const NEWLINE: u8 = b'\n';

/// Splits an arbitrarily chunked byte stream into [`Line`]s.
/// Bytes after the last `\n` are held until a later chunk completes them.
#[derive(Debug, Default)]
pub struct LineFramer {
    partial: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|byte| *byte == NEWLINE) {
            let (head, tail) = rest.split_at(pos + 1);
            self.partial.extend_from_slice(head);
            lines.push(Line::new(self.partial.split().freeze()));
            rest = tail;
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }

    pub fn reset(&mut self) {
        self.partial.clear();
    }
}
