//! Reassembly of length-prefixed frames from an arbitrary byte stream.
//!
//! A transport delivery may hold several frames, part of a frame, or the
//! tail of a frame begun earlier. [`Framer`] buffers what it cannot decode
//! yet and yields every message as soon as its payload is complete.

use tracing::{debug, trace, warn};

use crate::codec::{Codec, JsonCodec};
use crate::error::Result;
use crate::message::Message;

/// Token that starts every frame header.
pub const HEADER: &[u8] = b"Content-Length:";

/// Separator between the header and the payload.
pub const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Some senders count the trailing separator in `N`; accept payloads that
/// are exactly this much shorter than announced.
const SLACK: usize = SEPARATOR.len();

/// Largest payload a header may announce.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Outcome of one reassembly step over the buffer.
#[derive(Debug)]
enum Step {
    /// Not enough bytes yet.
    Wait,
    /// Drop this many leading bytes and continue.
    Discard(usize),
    /// A frame ended `consumed` bytes into the buffer.
    Frame {
        /// Bytes of header and payload to remove from the buffer.
        consumed: usize,
        /// Decoded payload.
        msg: Result<Message>,
    },
}

/// Per-connection frame reassembler.
#[derive(Debug, Default)]
pub struct Framer<C = JsonCodec> {
    /// Payload codec.
    codec: C,
    /// Bytes received but not yet consumed by a complete frame.
    buf: Vec<u8>,
    /// Payload length announced by the last header still awaiting its body.
    expected: Option<usize>,
    /// Log every completed payload.
    debug: bool,
}

impl<C: Codec> Framer<C> {
    /// Creates an empty reassembler using `codec` for payloads.
    pub const fn new(codec: C) -> Self {
        Self {
            codec,
            buf: Vec::new(),
            expected: None,
            debug: false,
        }
    }

    /// Enables payload logging for every completed frame.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Payload length of the frame currently being reassembled, if its
    /// header has arrived.
    pub const fn expected_len(&self) -> Option<usize> {
        self.expected
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feeds one transport delivery and returns every message it completes.
    pub fn push(&mut self, data: &[u8]) -> Vec<Message> {
        trace!(len = data.len(), buffered = self.buf.len(), "delivery");
        self.buf.extend_from_slice(data);

        let mut out = Vec::new();
        loop {
            match self.step() {
                Step::Wait => break,
                Step::Discard(n) => {
                    self.buf.drain(..n);
                }
                Step::Frame { consumed, msg } => {
                    self.buf.drain(..consumed);
                    self.expected = None;
                    match msg {
                        Ok(m) => out.push(m),
                        Err(e) => warn!(error = %e, "dropping undecodable frame"),
                    }
                }
            }
        }
        out
    }

    /// Examines the buffer head and decides what to do with it.
    fn step(&mut self) -> Step {
        match find(&self.buf, HEADER) {
            Some(0) => {}
            Some(i) => {
                note_skipped(&self.buf[..i]);
                return Step::Discard(i);
            }
            None => {
                let keep = partial_header(&self.buf);
                let drop = self.buf.len() - keep;
                if drop == 0 {
                    return Step::Wait;
                }
                note_skipped(&self.buf[..drop]);
                return Step::Discard(drop);
            }
        }

        let after = &self.buf[HEADER.len()..];
        let spaces = after.iter().take_while(|b| **b == b' ').count();
        let digits = after[spaces..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let sep_at = HEADER.len() + spaces + digits;
        if sep_at == self.buf.len() {
            return Step::Wait;
        }

        let rest = &self.buf[sep_at..];
        let sep_ok = rest.starts_with(SEPARATOR) || SEPARATOR.starts_with(rest);
        let announced = std::str::from_utf8(&after[spaces..spaces + digits])
            .ok()
            .and_then(|d| d.parse::<usize>().ok());
        let Some(n) = announced.filter(|_| sep_ok) else {
            warn!("malformed frame header; resynchronizing");
            return Step::Discard(HEADER.len());
        };
        if n > MAX_FRAME {
            warn!(announced = n, max = MAX_FRAME, "frame too large; resynchronizing");
            return Step::Discard(HEADER.len());
        }
        if rest.len() < SEPARATOR.len() {
            return Step::Wait;
        }

        self.expected = Some(n);
        let start = sep_at + SEPARATOR.len();
        let body = &self.buf[start..];
        let next = find(body, HEADER).filter(|j| *j < n);

        if body.len() >= n {
            let msg = self.decode(&body[..n]);
            if msg.is_ok() {
                return Step::Frame {
                    consumed: start + n,
                    msg,
                };
            }
            return match next {
                Some(j) => self.short_frame(start, j, n),
                None => Step::Frame {
                    consumed: start + n,
                    msg,
                },
            };
        }

        if let Some(j) = next {
            if j + SLACK == n {
                if let Ok(m) = self.decode(&body[..j]) {
                    return Step::Frame {
                        consumed: start + j,
                        msg: Ok(m),
                    };
                }
            }
            return Step::Wait;
        }

        if n >= SLACK && body.len() == n - SLACK {
            if let Ok(m) = self.decode(body) {
                return Step::Frame {
                    consumed: start + body.len(),
                    msg: Ok(m),
                };
            }
        }
        Step::Wait
    }

    /// A header for the next frame appears `j` bytes into a body announced
    /// as `n` bytes long.
    fn short_frame(&self, start: usize, j: usize, n: usize) -> Step {
        let body = &self.buf[start..];
        if j + SLACK == n {
            if let Ok(m) = self.decode(&body[..j]) {
                return Step::Frame {
                    consumed: start + j,
                    msg: Ok(m),
                };
            }
        }
        warn!(announced = n, actual = j, "frame shorter than its header; resynchronizing");
        Step::Discard(start + j)
    }

    /// Decodes one trimmed payload.
    fn decode(&self, payload: &[u8]) -> Result<Message> {
        let payload = payload.trim_ascii();
        if self.debug {
            debug!(payload = %String::from_utf8_lossy(payload), "frame complete");
        }
        self.codec.decode(payload)
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest suffix of `buf` that could still grow into a
/// [`HEADER`].
fn partial_header(buf: &[u8]) -> usize {
    (1..HEADER.len().min(buf.len() + 1))
        .rev()
        .find(|&k| buf.ends_with(&HEADER[..k]))
        .unwrap_or(0)
}

/// Logs bytes skipped while looking for a header, unless they are padding.
fn note_skipped(bytes: &[u8]) {
    if !bytes.trim_ascii().is_empty() {
        warn!(len = bytes.len(), "skipping bytes outside any frame");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::frame;
    use crate::message::{ActionRequest, Verb};

    fn sample() -> Message {
        let req = ActionRequest::at(Some("L42".into()))
            .with_stack(vec!["x".into(), "y".into()])
            .with_value(json!({"note": "naïve ✓", "n": 9_007_199_254_740_993_u64}));
        Message::action("c-1", Verb::SetProxyAttribute, &req).unwrap()
    }

    fn framed(msg: &Message) -> Vec<u8> {
        frame(&JsonCodec, msg).unwrap()
    }

    #[test]
    fn single_delivery() {
        let mut f = Framer::new(JsonCodec);
        assert_eq!(f.push(&framed(&sample())), vec![sample()]);
        assert_eq!(f.buffered(), 0);
        assert_eq!(f.expected_len(), None);
    }

    #[test]
    fn every_two_way_split() {
        let bytes = framed(&sample());
        for cut in 0..=bytes.len() {
            let mut f = Framer::new(JsonCodec);
            let mut got = f.push(&bytes[..cut]);
            got.extend(f.push(&bytes[cut..]));
            assert_eq!(got, vec![sample()], "split at {cut}");
        }
    }

    #[test]
    fn byte_by_byte() {
        let bytes = framed(&sample());
        let mut f = Framer::new(JsonCodec);
        let mut got = Vec::new();
        for b in &bytes {
            got.extend(f.push(std::slice::from_ref(b)));
        }
        assert_eq!(got, vec![sample()]);
    }

    #[test]
    fn merged_frames_in_one_delivery() {
        let a = Message::reply("a", json!(1));
        let b = Message::reply("b", json!("two"));
        let c = Message::event("tick", serde_json::Map::new());
        let mut bytes = framed(&a);
        bytes.extend(framed(&b));
        bytes.extend(framed(&c));

        let mut f = Framer::new(JsonCodec);
        assert_eq!(f.push(&bytes), vec![a, b, c]);
    }

    #[test]
    fn tail_of_one_frame_with_head_of_next() {
        let a = framed(&Message::reply("a", json!([1, 2, 3])));
        let b = framed(&Message::reply("b", json!(null)));
        let mut stream = a.clone();
        stream.extend(&b);

        let cut = a.len() - 5;
        let next_cut = a.len() + 7;
        let mut f = Framer::new(JsonCodec);
        assert!(f.push(&stream[..cut]).is_empty());
        assert_eq!(f.expected_len(), Some(a.len() - a.iter().position(|b| *b == b'{').unwrap()));
        let got = f.push(&stream[cut..next_cut]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].correlation_id.as_deref(), Some("a"));
        let got = f.push(&stream[next_cut..]);
        assert_eq!(got[0].correlation_id.as_deref(), Some("b"));
    }

    #[test]
    fn header_only_fragment_records_expected_length() {
        let mut f = Framer::new(JsonCodec);
        assert!(f.push(b"Content-Length: 31\r\n\r\n").is_empty());
        assert_eq!(f.expected_len(), Some(31));
        let got = f.push(br#"{"correlationId":"z","response":1}"#);
        assert!(got.is_empty(), "31 is too short for this payload");
    }

    #[test]
    fn announced_length_may_include_separator() {
        let payload = br#"{"correlationId":"a","response":1}"#;
        let mut bytes = format!("Content-Length: {}\r\n\r\n", payload.len() + 4).into_bytes();
        bytes.extend_from_slice(payload);
        bytes.extend(framed(&Message::reply("b", json!(2))));

        let mut f = Framer::new(JsonCodec);
        let got = f.push(&bytes);
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].correlation_id.as_deref(), Some("b"));

        let mut f = Framer::new(JsonCodec);
        let mut lone = format!("Content-Length: {}\r\n\r\n", payload.len() + 4).into_bytes();
        lone.extend_from_slice(payload);
        assert_eq!(f.push(&lone).len(), 1);
    }

    #[test]
    fn trailing_separator_after_payload() {
        let mut bytes = framed(&Message::reply("a", json!(1)));
        bytes.extend_from_slice(SEPARATOR);
        bytes.extend(framed(&Message::reply("b", json!(2))));

        let mut f = Framer::new(JsonCodec);
        assert_eq!(f.push(&bytes).len(), 2);
        assert_eq!(f.buffered(), 0);
    }

    #[test]
    fn garbage_does_not_block_later_frames() {
        let mut f = Framer::new(JsonCodec);
        let mut bytes = b"hello there".to_vec();
        bytes.extend(framed(&Message::reply("ok", json!(true))));
        let got = f.push(&bytes);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].correlation_id.as_deref(), Some("ok"));
    }

    #[test]
    fn malformed_payload_is_dropped_not_the_next_one() {
        let mut bytes = b"Content-Length: 9\r\n\r\n{not json".to_vec();
        bytes.extend(framed(&Message::reply("ok", json!(1))));

        let mut f = Framer::new(JsonCodec);
        let got = f.push(&bytes);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].correlation_id.as_deref(), Some("ok"));
    }

    #[test]
    fn oversized_header_is_skipped() {
        let mut bytes = format!("Content-Length: {}\r\n\r\n", MAX_FRAME + 1).into_bytes();
        bytes.extend(framed(&Message::reply("a", json!(1))));
        bytes.extend(b"Content-Length: 99999999999999\r\n\r\n");
        bytes.extend(framed(&Message::reply("b", json!(2))));

        let mut f = Framer::new(JsonCodec);
        let got = f.push(&bytes);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].correlation_id.as_deref(), Some("a"));
        assert_eq!(got[1].correlation_id.as_deref(), Some("b"));
        assert_eq!(f.expected_len(), None);
        assert_eq!(f.buffered(), 0);
    }

    #[test]
    fn short_frame_resyncs_on_next_header() {
        let mut bytes = b"Content-Length: 80\r\n\r\n{\"oops\":".to_vec();
        bytes.extend(framed(&Message::reply("ok", json!(1))));
        bytes.extend(vec![b' '; 80]);

        let mut f = Framer::new(JsonCodec);
        let got = f.push(&bytes);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].correlation_id.as_deref(), Some("ok"));
    }

    #[test]
    fn header_text_inside_payload() {
        let msg = Message::reply("c", json!("Content-Length: 3\r\n\r\nabc"));
        let bytes = framed(&msg);
        for cut in [10, bytes.len() / 2, bytes.len() - 3] {
            let mut f = Framer::new(JsonCodec);
            let mut got = f.push(&bytes[..cut]);
            got.extend(f.push(&bytes[cut..]));
            assert_eq!(got, vec![msg.clone()], "split at {cut}");
        }
    }

    #[test]
    fn partial_header_suffix_is_kept() {
        assert_eq!(partial_header(b"junkCont"), 4);
        assert_eq!(partial_header(b"junk"), 0);
        assert_eq!(partial_header(b"C"), 1);
        assert_eq!(partial_header(b""), 0);
    }
}
