// Stream decoder
// Reassembles position records from arbitrarily split transport reads

use std::fmt;
use std::str::FromStr;

use crate::fix::PositionFix;

/// How records are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON object per line. Blank lines are keep-alives.
    #[default]
    Lines,
    /// JSON objects written back to back with no delimiter.
    JsonStream,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lines" | "ndjson" => Ok(Framing::Lines),
            "json-stream" | "stream" | "concatenated" => Ok(Framing::JsonStream),
            other => Err(format!("unknown framing '{}' (expected 'lines' or 'json-stream')", other)),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Lines => write!(f, "lines"),
            Framing::JsonStream => write!(f, "json-stream"),
        }
    }
}

/// A record that was framed but could not be turned into a fix.
///
/// None of these affect the records that follow.
#[derive(Debug)]
pub enum DecodeError {
    /// Framed record is not a valid fix
    Parse(serde_json::Error),
    /// Record grew past the length limit and was dropped
    Oversized(usize),
    /// Bytes outside any JSON object were skipped (json-stream framing)
    Garbage(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Parse(e) => write!(f, "malformed record: {}", e),
            DecodeError::Oversized(n) => write!(f, "record exceeds length limit ({} bytes buffered), dropped", n),
            DecodeError::Garbage(n) => write!(f, "skipped {} bytes outside of any record", n),
        }
    }
}

impl DecodeError {
    /// Operator hint for errors that usually mean the framing is misconfigured.
    pub fn framing_hint(&self, framing: Framing) -> Option<&'static str> {
        match (self, framing) {
            (DecodeError::Oversized(_), Framing::Lines) => {
                Some("no newline seen, the producer may need --framing json-stream")
            }
            _ => None,
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Accumulates raw bytes and hands out one decoded record at a time.
pub struct StreamDecoder {
    framing: Framing,
    max_record_len: usize,
    buf: Vec<u8>,
    /// Lines framing: drop input until the next newline (tail of an oversized line)
    skipping_line: bool,
}

impl StreamDecoder {
    pub fn new(framing: Framing, max_record_len: usize) -> Self {
        StreamDecoder {
            framing,
            max_record_len: max_record_len.max(1),
            buf: Vec::new(),
            skipping_line: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes held waiting for the rest of a record.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.skipping_line = false;
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete record, or `None` until more bytes arrive.
    pub fn next_record(&mut self) -> Option<Result<PositionFix, DecodeError>> {
        match self.framing {
            Framing::Lines => self.next_line(),
            Framing::JsonStream => self.next_object(),
        }
    }

    /// Push a chunk and drain every record it completes.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<PositionFix, DecodeError>> {
        self.push(chunk);
        let mut out = Vec::new();
        while let Some(record) = self.next_record() {
            out.push(record);
        }
        out
    }

    fn next_line(&mut self) -> Option<Result<PositionFix, DecodeError>> {
        loop {
            if self.skipping_line {
                match self.buf.iter().position(|&b| b == b'\n') {
                    Some(pos) => {
                        self.buf.drain(..=pos);
                        self.skipping_line = false;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }

            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > self.max_record_len {
                    let dropped = self.buf.len();
                    self.buf.clear();
                    self.skipping_line = true;
                    return Some(Err(DecodeError::Oversized(dropped)));
                }
                return None;
            };

            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let record = trim_ascii(&line);
            if record.is_empty() {
                continue;
            }
            if record.len() > self.max_record_len {
                return Some(Err(DecodeError::Oversized(record.len())));
            }
            return Some(PositionFix::from_json(record).map_err(DecodeError::Parse));
        }
    }

    fn next_object(&mut self) -> Option<Result<PositionFix, DecodeError>> {
        let Some(start) = self.buf.iter().position(|&b| b == b'{') else {
            let garbage = self.buf.iter().filter(|b| !b.is_ascii_whitespace()).count();
            self.buf.clear();
            return (garbage > 0).then_some(Err(DecodeError::Garbage(garbage)));
        };
        if start > 0 {
            let garbage = self.buf.drain(..start).filter(|b| !b.is_ascii_whitespace()).count();
            if garbage > 0 {
                return Some(Err(DecodeError::Garbage(garbage)));
            }
        }

        match object_end(&self.buf, false) {
            Some(end) => {
                let record: Vec<u8> = self.buf.drain(..=end).collect();
                if record.len() > self.max_record_len {
                    return Some(Err(DecodeError::Oversized(record.len())));
                }
                Some(PositionFix::from_json(&record).map_err(DecodeError::Parse))
            }
            None => {
                // Truncated object: resume at the next complete record
                if let Some(resume) = self.resync_point() {
                    let fragment: Vec<u8> = self.buf.drain(..resume).collect();
                    return Some(Err(match PositionFix::from_json(&fragment) {
                        Err(e) => DecodeError::Parse(e),
                        Ok(_) => DecodeError::Garbage(fragment.len()),
                    }));
                }
                if self.buf.len() > self.max_record_len {
                    let dropped = self.buf.len();
                    self.buf.clear();
                    return Some(Err(DecodeError::Oversized(dropped)));
                }
                None
            }
        }
    }

    /// Offset of the first `{` after the buffer start that opens a flat,
    /// complete and well-formed fix.
    fn resync_point(&self) -> Option<usize> {
        (1..self.buf.len()).filter(|&i| self.buf[i] == b'{').find(|&i| {
            let candidate = &self.buf[i..];
            object_end(candidate, true)
                .is_some_and(|end| PositionFix::from_json(&candidate[..=end]).is_ok())
        })
    }
}

/// Index of the `}` closing the object that opens at `bytes[0]`, if it has arrived.
///
/// With `flat` set, a nested `{` outside a string ends the scan with `None`.
fn object_end(bytes: &[u8], flat: bool) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' if flat && depth > 0 => return None,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_RECORD_LEN;

    const A: &str = r#"{"latitude": 63.43, "longitude": 10.39, "altitude": 5.0, "timestamp": 1, "valid": true}"#;
    const B: &str = r#"{"latitude": 63.44, "longitude": 10.40, "altitude": 6.0, "timestamp": 2, "valid": true}"#;
    const C: &str = r#"{"latitude": 0.0, "longitude": 0.0, "altitude": 0.0, "timestamp": 3, "valid": false}"#;

    fn fixes(results: Vec<Result<PositionFix, DecodeError>>) -> Vec<i64> {
        results.into_iter().map(|r| r.unwrap().timestamp_ms).collect()
    }

    #[test]
    fn test_framing_from_str() {
        assert_eq!("lines".parse::<Framing>().unwrap(), Framing::Lines);
        assert_eq!("JSON-STREAM".parse::<Framing>().unwrap(), Framing::JsonStream);
        assert!("xml".parse::<Framing>().is_err());
        assert_eq!(Framing::JsonStream.to_string(), "json-stream");
    }

    #[test]
    fn test_lines_split_at_every_offset() {
        let wire = format!("{}\n", A);
        let bytes = wire.as_bytes();
        for split in 1..bytes.len() {
            let mut dec = StreamDecoder::new(Framing::Lines, 1024);
            assert!(dec.decode(&bytes[..split]).is_empty(), "split {}", split);
            let out = dec.decode(&bytes[split..]);
            assert_eq!(fixes(out), vec![1], "split {}", split);
            assert_eq!(dec.buffered(), 0);
        }
    }

    #[test]
    fn test_lines_multiple_records_in_one_chunk() {
        let wire = format!("{}\n{}\r\n\n{}\n{}", A, B, C, &A[..10]);
        let mut dec = StreamDecoder::new(Framing::Lines, 1024);
        let out = dec.decode(wire.as_bytes());
        assert_eq!(fixes(out), vec![1, 2, 3]);
        assert_eq!(dec.buffered(), 10);
    }

    #[test]
    fn test_lines_corrupt_record_isolated() {
        let wire = format!("{}\n{{\"latitude\": 1.0, \"longi\n{}\n", A, B);
        let mut dec = StreamDecoder::new(Framing::Lines, 1024);
        let out = dec.decode(wire.as_bytes());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().timestamp_ms, 1);
        assert!(matches!(out[1], Err(DecodeError::Parse(_))));
        assert_eq!(out[2].as_ref().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn test_lines_oversized_record_skipped() {
        let mut dec = StreamDecoder::new(Framing::Lines, 256);
        let out = dec.decode("z".repeat(300).as_bytes());
        assert!(matches!(out.as_slice(), [Err(DecodeError::Oversized(300))]));
        assert_eq!(dec.buffered(), 0);
        // Tail of the oversized line arrives with the next good record
        let out = dec.decode(format!("zzz\n{}\n", B).as_bytes());
        assert_eq!(fixes(out), vec![2]);

        // A complete line that is too long is reported without a skip phase
        let mut dec = StreamDecoder::new(Framing::Lines, 16);
        let out = dec.decode(format!("{}\n", A).as_bytes());
        assert!(matches!(out.as_slice(), [Err(DecodeError::Oversized(_))]));
    }

    #[test]
    fn test_json_stream_back_to_back_objects() {
        let wire = format!("{}{}{}", A, B, C);
        let mut dec = StreamDecoder::new(Framing::JsonStream, 1024);
        assert_eq!(fixes(dec.decode(wire.as_bytes())), vec![1, 2, 3]);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_json_stream_split_across_chunks() {
        let wire = format!("{}  {}", A, B);
        let bytes = wire.as_bytes();
        for split in 1..bytes.len() {
            let mut dec = StreamDecoder::new(Framing::JsonStream, 1024);
            let mut out = dec.decode(&bytes[..split]);
            out.extend(dec.decode(&bytes[split..]));
            assert_eq!(fixes(out), vec![1, 2], "split {}", split);
        }
    }

    #[test]
    fn test_json_stream_braces_inside_strings() {
        let wire = r#"{"latitude": 1.0, "longitude": 2.0, "note": "a } \" { b", "timestamp": 9, "valid": true}"#;
        let mut dec = StreamDecoder::new(Framing::JsonStream, 1024);
        let out = dec.decode(wire.as_bytes());
        assert_eq!(fixes(out), vec![9]);
    }

    #[test]
    fn test_json_stream_garbage_and_corrupt_records() {
        let wire = format!("junk{}{{\"latitude\": true}}\n{}", A, B);
        let mut dec = StreamDecoder::new(Framing::JsonStream, 1024);
        let out = dec.decode(wire.as_bytes());
        assert_eq!(out.len(), 4);
        assert!(matches!(out[0], Err(DecodeError::Garbage(4))));
        assert_eq!(out[1].as_ref().unwrap().timestamp_ms, 1);
        assert!(matches!(out[2], Err(DecodeError::Parse(_))));
        assert_eq!(out[3].as_ref().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn test_json_stream_oversized_object_dropped() {
        let mut dec = StreamDecoder::new(Framing::JsonStream, 128);
        let open = format!("{{\"latitude\": 1.0, \"pad\": \"{}", "p".repeat(200));
        let out = dec.decode(open.as_bytes());
        assert!(matches!(out.as_slice(), [Err(DecodeError::Oversized(_))]));
        assert_eq!(dec.buffered(), 0);
        let out = dec.decode(A.as_bytes());
        assert_eq!(fixes(out), vec![1]);
    }

    #[test]
    fn test_json_stream_recovers_after_truncated_object() {
        // Cut off inside a key, so the next record's braces land inside a string
        let mut wire = String::from(r#"{"latitude": 1.0, "lon"#);
        for _ in 0..100 {
            wire.push_str(A);
            wire.push_str(B);
        }
        let mut dec = StreamDecoder::new(Framing::JsonStream, MAX_RECORD_LEN);
        let mut out = dec.decode(wire.as_bytes());
        assert!(matches!(out.remove(0), Err(DecodeError::Parse(_))));
        assert_eq!(out.len(), 200);
        assert!(out.iter().all(|r| r.is_ok()));
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_json_stream_recovers_after_stray_brace() {
        let mut dec = StreamDecoder::new(Framing::JsonStream, MAX_RECORD_LEN);
        let out = dec.decode(format!("{{{}", A).as_bytes());
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Parse(_))));
        assert_eq!(out[1].as_ref().unwrap().timestamp_ms, 1);

        // Same, with the good record arriving in a later read
        let mut dec = StreamDecoder::new(Framing::JsonStream, MAX_RECORD_LEN);
        assert!(dec.decode(br#"{"latitude": 2"#).is_empty());
        let mut out = dec.decode(A.as_bytes());
        out.extend(dec.decode(B.as_bytes()));
        assert!(matches!(out[0], Err(DecodeError::Parse(_))));
        assert_eq!(fixes(out.into_iter().skip(1).collect()), vec![1, 2]);
    }

    #[test]
    fn test_partial_object_waits_for_rest() {
        let mut dec = StreamDecoder::new(Framing::JsonStream, MAX_RECORD_LEN);
        let wire = r#"{"latitude": 1.0, "longitude": 2.0, "note": "{\"x\": {}}", "timestamp": 4}"#;
        let (head, tail) = wire.split_at(wire.len() - 10);
        assert!(dec.decode(head.as_bytes()).is_empty());
        assert_eq!(dec.buffered(), head.len());
        assert_eq!(fixes(dec.decode(tail.as_bytes())), vec![4]);
    }

    #[test]
    fn test_framing_hint_only_for_unterminated_lines() {
        assert!(DecodeError::Oversized(70000).framing_hint(Framing::Lines).is_some());
        assert!(DecodeError::Oversized(70000).framing_hint(Framing::JsonStream).is_none());
        assert!(DecodeError::Garbage(3).framing_hint(Framing::Lines).is_none());

        // Back-to-back objects with no newline only ever surface as Oversized in lines mode
        let wire = A.repeat(10);
        let mut dec = StreamDecoder::new(Framing::Lines, 256);
        let out = dec.decode(wire.as_bytes());
        assert!(matches!(out.as_slice(), [Err(e)] if e.framing_hint(Framing::Lines).is_some()));
    }

    #[test]
    fn test_reset_discards_partial_record() {
        let mut dec = StreamDecoder::new(Framing::Lines, 1024);
        dec.push(&A.as_bytes()[..20]);
        dec.reset();
        assert_eq!(dec.buffered(), 0);
        assert_eq!(fixes(dec.decode(format!("{}\n", B).as_bytes())), vec![2]);
    }
}
