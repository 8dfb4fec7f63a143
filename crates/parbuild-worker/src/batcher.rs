//! Outbound event batching.
//!
//! Events queued during one tick are written as a single JSON array line at
//! the end of the tick. Ticks with nothing new to say write nothing.

use std::time::Duration;

use parbuild_core::wire::encode_batch;
use parbuild_core::{BuildStats, Event, Progress};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::error::WorkerError;

/// Suppresses values the parent has already been sent.
///
/// Progress is compared on percent, step and message; Watch on the whole
/// payload. Start goes out once. End is never suppressed.
#[derive(Debug, Default)]
pub(crate) struct Deduper {
    started: bool,
    last_progress: Option<Progress>,
    last_watch: Option<BuildStats>,
}

impl Deduper {
    pub(crate) fn admit(&mut self, event: &Event) -> bool {
        match event {
            Event::Start(_) => !std::mem::replace(&mut self.started, true),
            Event::Progress(progress) => {
                if self
                    .last_progress
                    .as_ref()
                    .is_some_and(|last| last.same_report(progress))
                {
                    return false;
                }
                self.last_progress = Some(progress.clone());
                true
            }
            Event::Watch(stats) => {
                if self.last_watch.as_ref() == Some(stats) {
                    return false;
                }
                self.last_watch = Some(stats.clone());
                true
            }
            Event::End(_) => true,
        }
    }
}

/// Drain `events` into `writer`, one batch per `interval`.
///
/// Returns the writer once the event sender is dropped and everything queued
/// has been written.
pub async fn run_batcher<W>(
    mut events: mpsc::UnboundedReceiver<Event>,
    mut writer: W,
    interval: Duration,
) -> Result<W, WorkerError>
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut dedup = Deduper::default();
    let mut pending: Vec<Event> = Vec::new();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Some(event) => {
                    if dedup.admit(&event) {
                        pending.push(event);
                    } else {
                        trace!(kind = ?event.kind(), "Suppressing unchanged event");
                    }
                }
                None => break,
            },
            _ = ticker.tick() => flush(&mut writer, &mut pending).await?,
        }
    }

    flush(&mut writer, &mut pending).await?;
    debug!("Event channel closed, batcher finished");
    Ok(writer)
}

async fn flush<W>(writer: &mut W, pending: &mut Vec<Event>) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
{
    if pending.is_empty() {
        return Ok(());
    }
    let line = encode_batch(pending)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    debug!(events = pending.len(), "Flushed batch");
    pending.clear();
    Ok(())
}
