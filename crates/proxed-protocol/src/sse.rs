use bytes::{Bytes, BytesMut};

/// One complete Server-Sent-Events frame: the optional `event:` name and the
/// joined `data:` payload, as delimited by a blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame parser over raw byte chunks.
///
/// Chunk boundaries are irrelevant to correctness: a frame split across any
/// number of chunks, at any byte offset, is reassembled byte-identically
/// before being reported. Line scanning happens on the byte level so a
/// multi-byte character split across chunks never corrupts a payload.
///
/// Tied to a single underlying stream; a partial frame left at end of stream
/// is discarded, never reported as a malformed event.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: BytesMut,
    event: Option<String>,
    data_lines: Vec<String>,
    has_data: bool,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame completed by it.
    pub fn push(&mut self, chunk: &Bytes) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.push_line(&line, &mut frames);
        }

        frames
    }

    fn push_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.flush_frame(frames);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = field_value(line, "event") {
            self.event = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
            return;
        }
        if let Some(value) = field_value(line, "data") {
            self.data_lines.push(value.to_string());
            self.has_data = true;
        }
    }

    fn flush_frame(&mut self, frames: &mut Vec<SseFrame>) {
        if !self.has_data && self.event.is_none() {
            return;
        }
        frames.push(SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
        self.has_data = false;
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    if line == field {
        return Some("");
    }
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
