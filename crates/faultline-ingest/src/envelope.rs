//! Envelope parser (spec §4.1/§6.1), grounded in
//! `examples/original_source/apps/event_ingest/views.py::event_envelope_view`'s
//! exact control flow: header read, item loop, length-prefixed vs
//! newline-terminated payload, abort-the-envelope on header error, skip-and-
//! continue on payload validation error.

use faultline_types::{EnvelopeHeader, IngestIssueEvent, ItemHeader, TransactionEventSchema};

use crate::error::ApiError;

pub struct ParsedEnvelope {
    pub header: EnvelopeHeader,
    pub events: Vec<IngestIssueEvent>,
    pub transactions: Vec<TransactionEventSchema>,
}

/// A cursor over `\n`-delimited byte slices that never copies.
struct LineCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the next line, excluding its trailing `\n`. `None` at EOF.
    fn next_line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                self.pos += idx + 1;
                Some(&rest[..idx])
            }
            None => {
                self.pos = self.buf.len();
                Some(rest)
            }
        }
    }

    /// Takes exactly `n` bytes regardless of content, then consumes the
    /// single trailing newline the wire format guarantees after a
    /// length-prefixed payload. `None` if fewer than `n` bytes remain.
    fn take_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        if self.buf.get(self.pos) == Some(&b'\n') {
            self.pos += 1;
        }
        Some(out)
    }
}

pub fn parse_envelope(bytes: &[u8]) -> Result<ParsedEnvelope, ApiError> {
    let mut cursor = LineCursor::new(bytes);

    let header_line = cursor
        .next_line()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::EnvelopeMalformed("empty request body".to_string()))?;
    let header: EnvelopeHeader = serde_json::from_slice(header_line)
        .map_err(|e| ApiError::EnvelopeMalformed(format!("invalid envelope header: {e}")))?;

    let mut events = Vec::new();
    let mut transactions = Vec::new();

    loop {
        let Some(item_header_line) = cursor.next_line() else {
            break;
        };
        if item_header_line.is_empty() {
            break;
        }
        let item_header: ItemHeader = match serde_json::from_slice(item_header_line) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "item header validation error, truncating envelope");
                break;
            }
        };

        let payload = match item_header.length {
            Some(len) => match cursor.take_bytes(len as usize) {
                Some(p) => p,
                None => {
                    tracing::warn!(
                        expected = len,
                        "incomplete item payload, truncating envelope"
                    );
                    break;
                }
            },
            None => match cursor.next_line() {
                Some(p) => p,
                None => break,
            },
        };

        match item_header.item_type.as_str() {
            "event" => match serde_json::from_slice::<IngestIssueEvent>(payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(error = %e, "event item validation error, skipping item");
                }
            },
            "transaction" => match serde_json::from_slice::<TransactionEventSchema>(payload) {
                Ok(txn) => transactions.push(txn),
                Err(e) => {
                    tracing::warn!(error = %e, "transaction item validation error, skipping item");
                }
            },
            _ => {
                // Ignored-but-known or genuinely unknown item type; already
                // skipped by byte length above, nothing further to do.
            }
        }
    }

    Ok(ParsedEnvelope {
        header,
        events,
        transactions,
    })
}
