//! Server-sent event framing for streamed replies.
//!
//! This module turns the raw byte stream of an HTTP response into a stream of
//! [`EventRecord`]s.  Records are `data: `-prefixed lines carrying a JSON
//! [`StreamPayload`]; everything else on the wire is padding.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::observability::{
    STREAM_BYTES, STREAM_DISCARDED_BYTES, STREAM_MALFORMED, STREAM_PADDING, STREAM_RECORDS,
};
use crate::types::{EventRecord, StreamPayload};
use crate::{Error, Result};

/// The marker that introduces a record line.
pub const DATA_PREFIX: &str = "data: ";

/// Longest line kept while waiting for its newline.
///
/// A longer partial line is dropped as malformed and the bytes up to its
/// eventual newline are skipped.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental parser for `data: `-framed records.
///
/// Bytes are fed in arbitrary chunks with [`push`](Self::push).  Complete
/// lines are decoded as soon as their terminating newline arrives; the
/// trailing partial line is carried over to the next chunk, up to
/// [`MAX_LINE_BYTES`].  One parser serves one response body.
#[derive(Debug, Default)]
pub struct EventFrameParser {
    carry: Vec<u8>,
    overflowed: bool,
}

impl EventFrameParser {
    /// Creates a parser with an empty carry-over buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the records completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<EventRecord> {
        STREAM_BYTES.count(chunk.len() as u64);
        let mut chunk = chunk;
        if self.overflowed {
            let Some(newline) = chunk.iter().position(|b| *b == b'\n') else {
                STREAM_DISCARDED_BYTES.count(chunk.len() as u64);
                return Vec::new();
            };
            STREAM_DISCARDED_BYTES.count(newline as u64 + 1);
            chunk = &chunk[newline + 1..];
            self.overflowed = false;
        }

        // Only the new bytes can hold the newline that ends the carried line.
        let records = match chunk.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => {
                let (complete, rest) = chunk.split_at(last_newline + 1);
                let mut lines = std::mem::take(&mut self.carry);
                lines.extend_from_slice(complete);
                self.carry.extend_from_slice(rest);
                lines
                    .split(|b| *b == b'\n')
                    .filter_map(decode_line)
                    .collect()
            }
            None => {
                self.carry.extend_from_slice(chunk);
                Vec::new()
            }
        };
        if self.carry.len() > MAX_LINE_BYTES {
            self.drop_oversized_line();
        }
        records
    }

    fn drop_oversized_line(&mut self) {
        STREAM_MALFORMED.click();
        STREAM_DISCARDED_BYTES.count(self.carry.len() as u64);
        warn!(
            bytes = self.carry.len(),
            limit = MAX_LINE_BYTES,
            "skipping line longer than the limit"
        );
        self.carry.clear();
        self.overflowed = true;
    }

    /// Returns true if a partial line is waiting for more bytes.
    pub fn has_partial(&self) -> bool {
        !self.carry.is_empty() || self.overflowed
    }

    /// Ends the input, discarding any unterminated line.
    ///
    /// Returns the number of bytes discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.carry.len();
        if discarded > 0 {
            debug!(bytes = discarded, "discarding unterminated trailing line");
            STREAM_DISCARDED_BYTES.count(discarded as u64);
        }
        self.carry.clear();
        self.overflowed = false;
        discarded
    }
}

fn decode_line(line: &[u8]) -> Option<EventRecord> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Some(payload) = line.strip_prefix(DATA_PREFIX.as_bytes()) else {
        if !line.is_empty() {
            STREAM_PADDING.click();
        }
        return None;
    };
    let payload = match std::str::from_utf8(payload) {
        Ok(payload) => payload,
        Err(err) => {
            STREAM_MALFORMED.click();
            warn!(error = %err, "skipping record with invalid UTF-8");
            return None;
        }
    };
    match serde_json::from_str::<StreamPayload>(payload) {
        Ok(parsed) => {
            let record = parsed.into_record();
            if record.is_some() {
                STREAM_RECORDS.click();
            }
            record
        }
        Err(err) => {
            STREAM_MALFORMED.click();
            warn!(error = %err, payload, "skipping malformed record");
            None
        }
    }
}

/// Process a stream of bytes into a stream of event records.
///
/// Transport errors are passed through as `Err` items; malformed records are
/// logged and skipped.  The stream ends when the byte stream ends, after
/// discarding any unterminated trailing line.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<EventRecord>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<Error>,
{
    let stream = byte_stream.map(|result| result.map_err(Into::into));
    let parser = EventFrameParser::new();
    let ready = std::collections::VecDeque::new();

    stream::unfold(
        (stream, parser, ready, false),
        move |(mut stream, mut parser, mut ready, mut finished)| async move {
            loop {
                // Drain records already decoded before reading more.
                if let Some(record) = ready.pop_front() {
                    return Some((Ok(record), (stream, parser, ready, finished)));
                }
                if finished {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => ready.extend(parser.push(&bytes)),
                    Some(Err(e)) => {
                        finished = true;
                        return Some((Err(e), (stream, parser, ready, finished)));
                    }
                    None => {
                        parser.finish();
                        return None;
                    }
                }
            }
        },
    )
}
