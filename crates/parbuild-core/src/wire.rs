//! Framing for the worker message channel.
//!
//! The channel carries newline-delimited JSON in both directions:
//!
//! - worker → parent: one batch per line, always encoded as a JSON array of
//!   [`Event`]s. An array is the only shape workers produce.
//! - parent → worker: one [`Directive`] object per line.
//!
//! [`decode_batch`] still accepts a bare event object and treats it as a
//! batch of one; anything else is a decode error the caller is expected to
//! log and skip.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::Event;

/// Instruction sent from the parent to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    /// Stop compiling and exit.
    Shutdown,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboundBatch {
    Many(Vec<Event>),
    One(Event),
}

/// Encode a batch of events as one line, including the trailing newline.
pub fn encode_batch(events: &[Event]) -> Result<String, CoreError> {
    let mut line = serde_json::to_string(events)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line from the message channel into a batch of events.
pub fn decode_batch(line: &str) -> Result<Vec<Event>, CoreError> {
    let events = match serde_json::from_str::<InboundBatch>(line.trim())? {
        InboundBatch::Many(events) => events,
        InboundBatch::One(event) => vec![event],
    };
    Ok(events)
}

/// Encode a directive as one line, including the trailing newline.
pub fn encode_directive(directive: Directive) -> Result<String, CoreError> {
    let mut line = serde_json::to_string(&directive)?;
    line.push('\n');
    Ok(line)
}

/// Decode one directive line.
pub fn decode_directive(line: &str) -> Result<Directive, CoreError> {
    Ok(serde_json::from_str(line.trim())?)
}
