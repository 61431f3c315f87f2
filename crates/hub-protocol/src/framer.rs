//! Byte stream to logical line extraction.
//!
//! A line is an opaque payload plus its terminator: the exact run of CR/LF
//! bytes that followed it on the wire. The terminator is kept with the
//! payload so a relay can reproduce the framing the producer chose.

/// One framed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Payload bytes, free of CR and LF.
    pub payload: Vec<u8>,
    /// The CR/LF run that closed the payload. Never empty.
    pub terminator: Vec<u8>,
}

impl Line {
    /// Payload and terminator re-joined, exactly as they appeared on the wire.
    pub fn raw(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.payload.len() + self.terminator.len());
        raw.extend_from_slice(&self.payload);
        raw.extend_from_slice(&self.terminator);
        raw
    }
}

fn is_terminator(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

/// Accumulates raw bytes and yields complete lines.
///
/// CR, LF, CRLF, LFCR and longer runs all close a line; the whole run folds
/// into a single terminator, so empty payloads between back-to-back
/// terminators are never emitted. An incomplete trailing payload stays
/// buffered until more bytes arrive.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the frame buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete line out of the buffer, if one is present.
    pub fn next_line(&mut self) -> Option<Line> {
        loop {
            let pos = self.buffer.iter().position(|b| is_terminator(*b))?;

            // Absorb the whole terminator run.
            let mut end = pos + 1;
            while end < self.buffer.len() && is_terminator(self.buffer[end]) {
                end += 1;
            }

            // A run with nothing before it carries no payload: fold it away.
            // This covers terminator runs split across two reads.
            if pos == 0 {
                self.buffer.drain(..end);
                continue;
            }

            let rest = self.buffer.split_off(end);
            let mut payload = std::mem::replace(&mut self.buffer, rest);
            let terminator = payload.split_off(pos);
            return Some(Line {
                payload,
                terminator,
            });
        }
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}
