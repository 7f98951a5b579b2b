use bytes::Bytes;
use tracing::warn;

// ---------------------------------------------------------------------------
// Wire frame
// ---------------------------------------------------------------------------

/// One server-sent event on the wire:
///
/// ```text
/// event: <type>\ndata: <json-or-plain-text>\n\n
/// ```
///
/// Both the server (encode) and the client (decode) speak this framing; the
/// decoder additionally tolerates CRLF line endings, comment lines and
/// fields it does not know (`id:`, `retry:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Serialise into wire bytes, ready to write to a stream body.
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event, self.data))
    }
}

// ---------------------------------------------------------------------------
// Incremental decoder
// ---------------------------------------------------------------------------

/// Streaming SSE parser. Transport reads arrive in arbitrary chunks, so the
/// decoder buffers input and emits a frame only once its terminating blank
/// line has been seen. Any partition of the same byte stream into chunks
/// yields the same frame sequence.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buffer: String,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every frame completed by it.
    ///
    /// Bytes that are not valid UTF-8 are replaced lossily — the wire
    /// carries JSON and ASCII keywords, so this only triggers on a
    /// corrupted stream, and a corrupt frame is then rejected at the JSON
    /// parse boundary rather than here.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(boundary) = find_frame_boundary(&self.buffer) {
            let raw: String = self.buffer.drain(..boundary.end).collect();
            if let Some(frame) = parse_frame(&raw[..boundary.start]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes currently buffered waiting for a frame terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

struct Boundary {
    /// Length of the frame text itself
    start: usize,
    /// Length including the terminating blank line
    end: usize,
}

/// Locate the first `\n\n` / `\r\n\r\n` frame terminator, whichever comes
/// first in the buffer.
fn find_frame_boundary(buf: &str) -> Option<Boundary> {
    let lf = buf.find("\n\n").map(|i| Boundary {
        start: i,
        end: i + 2,
    });
    let crlf = buf.find("\r\n\r\n").map(|i| Boundary {
        start: i,
        end: i + 4,
    });
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        match line.split_once(':') {
            Some(("event", value)) => event = Some(value.trim_start().to_string()),
            Some(("data", value)) => data_lines.push(value.strip_prefix(' ').unwrap_or(value)),
            // id: and retry: are legal SSE fields this pipeline does not use
            Some(_) => {}
            None => warn!("Discarding malformed SSE line: {:?}", line),
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }

    Some(SseFrame {
        // Per the SSE spec an unnamed event is a "message"
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data_lines.join("\n"),
    })
}
