//! Wire-format DTOs shared between the ingest HTTP surface and the batch
//! worker: the envelope/item framing, the lenient event schema, and the
//! interchange message handed from the network tier to the batch tier.

pub mod envelope;
pub mod event;
pub mod headers;
pub mod ingest_message;
pub mod message;

pub use envelope::{EnvelopeHeader, ItemHeader, IGNORED_ITEMS, SUPPORTED_ITEMS};
pub use event::{
    CspReport, DebugImage, DebugMeta, EventError, ExceptionList, ExceptionValue, IngestIssueEvent,
    IssueEventType, Level, SourceMapImage, StackFrame, Stacktrace, TransactionEventSchema,
};
pub use ingest_message::{IngestTaskMessage, MessageKind};
pub use message::{interpolate, truncate_chars, LogMessage, MessageParams};
