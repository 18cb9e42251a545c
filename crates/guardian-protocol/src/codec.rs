//! Record codec for the chat push-stream.
//!
//! Each frame travels as one server-sent-event record: `data: <json>\n\n`.
//! The decoder accepts the byte stream in arbitrary chunks and only yields a
//! frame once the record's terminating blank line has arrived. Comment lines
//! (`:` keep-alives) and `event:`/`id:`/`retry:` fields are skipped; a bare
//! JSON line is accepted as a record of its own.

use tracing::debug;

use crate::error::ProtocolError;
use crate::frames::Frame;

/// Largest single line the decoder will buffer before giving up on it.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Serialize a frame to one self-contained wire record.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(frame)?;
    Ok(format!("data: {}\n\n", json))
}

/// Incremental decoder: push raw chunks, collect whole frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes after the last newline seen. May be a partial line, possibly
    /// ending mid UTF-8 sequence.
    pending: Vec<u8>,
    /// `data:` payload of the record being assembled.
    data: String,
    has_data: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every record it completed, in order.
    ///
    /// A record whose JSON does not decode comes back as `Err` in its slot;
    /// the records around it are unaffected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            // A newline byte never occurs inside a multi-byte UTF-8 sequence,
            // so a complete line is always a complete string.
            let line = String::from_utf8_lossy(&line);
            self.handle_line(&line, &mut out);
        }

        if self.pending.len() > MAX_RECORD_BYTES {
            self.pending.clear();
            self.data.clear();
            self.has_data = false;
            out.push(Err(ProtocolError::RecordTooLarge {
                max: MAX_RECORD_BYTES,
            }));
        }

        out
    }

    /// Flush whatever is buffered at end of stream.
    ///
    /// A final record that lost its trailing blank line is still decoded.
    pub fn finish(&mut self) -> Vec<Result<Frame, ProtocolError>> {
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            self.handle_line(&line, &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    /// True when a partial record is sitting in the buffer.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || self.has_data
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<Result<Frame, ProtocolError>>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(value);
            self.has_data = true;
            return;
        }
        if line.starts_with('{') {
            // Newline-delimited JSON without the SSE envelope.
            self.dispatch(out);
            out.push(decode_record(line));
            return;
        }
        debug!(line, "ignoring non-data stream line");
    }

    fn dispatch(&mut self, out: &mut Vec<Result<Frame, ProtocolError>>) {
        if !self.has_data {
            return;
        }
        let record = std::mem::take(&mut self.data);
        self.has_data = false;
        out.push(decode_record(&record));
    }
}

fn decode_record(record: &str) -> Result<Frame, ProtocolError> {
    serde_json::from_str(record).map_err(|e| ProtocolError::MalformedFrame {
        reason: e.to_string(),
        record: record.chars().take(200).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(results: Vec<Result<Frame, ProtocolError>>) -> Vec<Frame> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn split_inside_json_yields_one_frame() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(br#"data: {"type":"te"#).is_empty());
        let out = frames(dec.push(b"xt\",\"data\":\"xin\"}\n\n"));
        assert_eq!(out, vec![Frame::text("xin")]);
        assert!(!dec.has_partial());
    }

    #[test]
    fn split_exactly_at_record_boundary() {
        let mut dec = FrameDecoder::new();
        let a = encode(&Frame::text("a")).unwrap();
        let b = encode(&Frame::text("b")).unwrap();
        assert_eq!(frames(dec.push(a.as_bytes())), vec![Frame::text("a")]);
        assert_eq!(frames(dec.push(b.as_bytes())), vec![Frame::text("b")]);
    }

    #[test]
    fn split_between_the_two_newlines() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: {\"type\":\"text\",\"data\":\"x\"}\n").is_empty());
        assert_eq!(frames(dec.push(b"\n")), vec![Frame::text("x")]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let wire = encode(&Frame::text("chào")).unwrap();
        let bytes = wire.as_bytes();
        // "à" is two bytes; cut between them.
        let cut = wire.find('à').unwrap() + 1;
        let mut dec = FrameDecoder::new();
        assert!(dec.push(&bytes[..cut]).is_empty());
        assert_eq!(frames(dec.push(&bytes[cut..])), vec![Frame::text("chào")]);
    }

    #[test]
    fn keep_alive_comments_are_skipped() {
        let mut dec = FrameDecoder::new();
        let out = frames(dec.push(b":\n\ndata: {\"type\":\"text\",\"data\":\"y\"}\n\n"));
        assert_eq!(out, vec![Frame::text("y")]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut dec = FrameDecoder::new();
        let out = frames(dec.push(b"data: {\"type\":\"text\",\"data\":\"z\"}\r\n\r\n"));
        assert_eq!(out, vec![Frame::text("z")]);
    }

    #[test]
    fn bare_json_lines_are_records() {
        let mut dec = FrameDecoder::new();
        let out = frames(dec.push(b"{\"type\":\"text\",\"data\":\"a\"}\n{\"type\":\"error\",\"data\":{\"message\":\"m\"}}\n"));
        assert_eq!(out, vec![Frame::text("a"), Frame::error("m")]);
    }

    #[test]
    fn malformed_record_does_not_poison_neighbours() {
        let mut dec = FrameDecoder::new();
        let out = dec.push(b"data: {nope}\n\ndata: {\"type\":\"text\",\"data\":\"ok\"}\n\n");
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(ProtocolError::MalformedFrame { .. })));
        assert_eq!(out[1].as_ref().unwrap(), &Frame::text("ok"));
    }

    #[test]
    fn finish_flushes_unterminated_record() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: {\"type\":\"text\",\"data\":\"tail\"}").is_empty());
        assert_eq!(frames(dec.finish()), vec![Frame::text("tail")]);
        assert!(dec.finish().is_empty());
    }

    #[test]
    fn oversized_line_is_rejected() {
        let mut dec = FrameDecoder::new();
        let junk = vec![b'a'; MAX_RECORD_BYTES + 1];
        let out = dec.push(&junk);
        assert!(matches!(out.as_slice(), [Err(ProtocolError::RecordTooLarge { .. })]));
        assert!(!dec.has_partial());
    }
}
