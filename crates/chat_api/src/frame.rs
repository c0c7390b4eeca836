use serde_json::{Map, Value};

use crate::events::StreamFrame;

const SSE_DATA_PREFIX: &str = "data: ";
const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Incremental line decoder for reply bodies.
///
/// Bytes are buffered until a newline arrives, so a line (or a multi-byte
/// UTF-8 sequence) split across network chunks decodes the same as if it had
/// arrived whole. Each complete line is classified independently:
///
/// 1. `data: ` prefix: the remainder is parsed as JSON. A `token` or `content`
///    string field, or a bare JSON string, is emitted. Unparseable remainders
///    are emitted raw.
/// 2. `{` prefix: parsed as JSON, emitting a `token` or `content` string field
///    and nothing otherwise.
/// 3. Anything else is emitted verbatim.
///
/// Blank lines never produce a frame. Decoding never fails.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Feed arbitrary bytes and drain the frames for every completed line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(frame) = decode_line(&line[..newline]) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush the carry-over as a final line and close with [`StreamFrame::Terminal`].
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        let rest = std::mem::take(&mut self.buffer);
        let mut frames = Vec::new();
        if let Some(frame) = decode_line(&rest) {
            frames.push(frame);
        }
        frames.push(StreamFrame::Terminal);
        frames
    }

    /// Decode a complete body in one shot, terminal frame included.
    pub fn decode_all(input: &[u8]) -> Vec<StreamFrame> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input);
        frames.extend(decoder.finish());
        frames
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn decode_line(raw: &[u8]) -> Option<StreamFrame> {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.strip_suffix('\r').unwrap_or(&*decoded);
    if line.trim().is_empty() {
        return None;
    }

    if let Some(payload) = line.strip_prefix(SSE_DATA_PREFIX) {
        return decode_sse_payload(payload);
    }
    if line.starts_with('{') {
        return decode_json_line(line);
    }

    Some(StreamFrame::TokenDelta(line.to_owned()))
}

fn decode_sse_payload(payload: &str) -> Option<StreamFrame> {
    if payload.trim() == SSE_DONE_SENTINEL {
        return None;
    }

    let text = match serde_json::from_str::<Value>(payload) {
        Ok(Value::String(text)) => text,
        Ok(Value::Object(fields)) => token_field(&fields)?,
        Ok(_) | Err(_) => payload.to_owned(),
    };
    non_empty_delta(text)
}

fn decode_json_line(line: &str) -> Option<StreamFrame> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => non_empty_delta(token_field(&fields)?),
        _ => None,
    }
}

fn token_field(fields: &Map<String, Value>) -> Option<String> {
    fields
        .get("token")
        .and_then(Value::as_str)
        .or_else(|| fields.get("content").and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn non_empty_delta(text: String) -> Option<StreamFrame> {
    if text.is_empty() {
        None
    } else {
        Some(StreamFrame::TokenDelta(text))
    }
}

#[cfg(test)]
mod tests {
    use super::FrameDecoder;
    use crate::events::StreamFrame;

    fn delta(text: &str) -> StreamFrame {
        StreamFrame::TokenDelta(text.to_owned())
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.feed(b"data: {\"tok").is_empty());
        assert!(decoder.has_pending());
        assert_eq!(decoder.feed(b"en\":\"Hi\"}\n"), vec![delta("Hi")]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn token_field_wins_over_content() {
        let frames = FrameDecoder::decode_all(b"{\"token\":\"a\",\"content\":\"b\"}\n");
        assert_eq!(frames, vec![delta("a"), StreamFrame::Terminal]);
    }

    #[test]
    fn crlf_line_endings_are_stripped() {
        let frames = FrameDecoder::decode_all(b"data: \"x\"\r\n\r\nplain\r\n");
        assert_eq!(frames, vec![delta("x"), delta("plain"), StreamFrame::Terminal]);
    }

    #[test]
    fn done_sentinel_is_skipped() {
        let frames = FrameDecoder::decode_all(b"data: {\"token\":\"a\"}\ndata: [DONE]\n");
        assert_eq!(frames, vec![delta("a"), StreamFrame::Terminal]);
    }

    #[test]
    fn sse_scalar_and_unparseable_payloads_are_emitted_raw() {
        let frames = FrameDecoder::decode_all(b"data: 42\ndata: not json\n");
        assert_eq!(
            frames,
            vec![delta("42"), delta("not json"), StreamFrame::Terminal]
        );
    }

    #[test]
    fn json_lines_without_text_fields_emit_nothing() {
        let frames = FrameDecoder::decode_all(b"{\"type\":\"ping\"}\n{broken\n");
        assert_eq!(frames, vec![StreamFrame::Terminal]);
    }
}
