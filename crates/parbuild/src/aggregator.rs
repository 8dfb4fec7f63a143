//! Cross-worker aggregation of the channel adapters' streams.

use std::pin::Pin;

use parbuild_core::{Annotated, BuildStats, LogLine, Progress, Start, WorkerIdentity};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt, StreamMap};

use crate::adapter::ChannelAdapter;
use crate::combine::CombineLatest;

/// One value per worker, in worker index order.
pub type Frame<T> = Vec<T>;

pub type Frames<T> = CombineLatest<UnboundedReceiverStream<T>>;

/// Every worker's per-kind streams, combined.
///
/// Dropping the aggregate stops the adapters' pump tasks.
pub struct Aggregate {
    pub progress: Frames<Annotated<Progress>>,
    /// Emits once, when every worker has ended, then completes.
    pub ends: Pin<Box<dyn Stream<Item = Frame<Annotated<BuildStats>>> + Send>>,
    pub logs: Frames<LogLine>,
    pub watch: Frames<Annotated<BuildStats>>,
    /// Start events keyed by worker index, as they arrive.
    pub starts: StreamMap<usize, UnboundedReceiverStream<Annotated<Start>>>,
    identities: Vec<WorkerIdentity>,
    pumps: Vec<JoinHandle<()>>,
}

impl Aggregate {
    /// Identities of the combined workers, in index order.
    pub fn identities(&self) -> &[WorkerIdentity] {
        &self.identities
    }
}

impl Drop for Aggregate {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Combine the adapters of every worker of a run.
///
/// `adapters` must be in worker index order.
pub fn combine(adapters: Vec<ChannelAdapter>) -> Aggregate {
    let width = adapters.len();
    let mut identities = Vec::with_capacity(width);
    let mut pumps = Vec::with_capacity(width);
    let mut progress = Vec::with_capacity(width);
    let mut ends = Vec::with_capacity(width);
    let mut logs = Vec::with_capacity(width);
    let mut watch = Vec::with_capacity(width);
    let mut starts = StreamMap::new();

    for adapter in adapters {
        starts.insert(adapter.identity.index, adapter.start);
        identities.push(adapter.identity);
        pumps.push(adapter.pump);
        progress.push(adapter.progress);
        ends.push(adapter.end);
        logs.push(adapter.logs);
        watch.push(adapter.watch);
    }

    Aggregate {
        progress: CombineLatest::new(progress),
        ends: Box::pin(CombineLatest::new(ends).take(1)),
        logs: CombineLatest::new(logs),
        watch: CombineLatest::new(watch),
        starts,
        identities,
        pumps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BoxedReader, BoxedWriter, IpcConnect};
    use parbuild_core::wire::encode_batch;
    use parbuild_core::{Directive, Event};
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    struct Worker {
        events: DuplexStream,
        _directives: mpsc::UnboundedSender<Directive>,
        _inbound: DuplexStream,
    }

    fn worker(index: usize, name: &str) -> (ChannelAdapter, Worker) {
        let (events, parent_events) = tokio::io::duplex(64 * 1024);
        let (parent_directives, inbound) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let connect: IpcConnect = Box::pin(async move {
            Ok((
                Box::new(parent_events) as BoxedReader,
                Box::new(parent_directives) as BoxedWriter,
            ))
        });
        let adapter = ChannelAdapter::spawn(
            WorkerIdentity::new(index, 1000 + index as u32, name),
            connect,
            None,
            None,
            rx,
        );
        (
            adapter,
            Worker {
                events,
                _directives: tx,
                _inbound: inbound,
            },
        )
    }

    async fn send(worker: &mut Worker, event: Event) {
        let line = encode_batch(&[event]).unwrap();
        worker.events.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ends_emit_once_in_index_order() {
        let (a, mut wa) = worker(0, "alpha");
        let (b, mut wb) = worker(1, "beta");
        let mut aggregate = combine(vec![a, b]);

        send(&mut wb, Event::End(BuildStats::failure("beta broke"))).await;
        send(&mut wa, Event::End(BuildStats::default())).await;

        let frame = aggregate.ends.next().await.unwrap();
        let names: Vec<_> = frame.iter().map(|e| e.identity.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(frame[0].payload.is_success());
        assert!(!frame[1].payload.is_success());

        assert!(aggregate.ends.next().await.is_none());
    }

    #[tokio::test]
    async fn test_progress_frames_start_from_seed() {
        let (a, mut wa) = worker(0, "alpha");
        let (b, _wb) = worker(1, "beta");
        let mut aggregate = combine(vec![a, b]);

        // Both seeds are in before any worker reports.
        let mut frame = aggregate.progress.next().await.unwrap();
        while frame.iter().any(|p| p.payload != Progress::ready()) {
            frame = aggregate.progress.next().await.unwrap();
        }
        assert_eq!(frame.len(), 2);

        send(&mut wa, Event::Progress(Progress::new(0.4, "building", "", ""))).await;
        let frame = aggregate.progress.next().await.unwrap();
        assert_eq!(frame[0].payload.percent, 0.4);
        assert_eq!(frame[1].payload, Progress::ready());
        assert_eq!(aggregate.identities().len(), 2);
    }

    #[tokio::test]
    async fn test_worker_lost_without_end_completes_ends() {
        let (a, mut wa) = worker(0, "alpha");
        let (b, wb) = worker(1, "beta");
        let mut aggregate = combine(vec![a, b]);

        send(&mut wa, Event::End(BuildStats::default())).await;
        drop(wb);

        assert!(aggregate.ends.next().await.is_none());
    }

    #[tokio::test]
    async fn test_starts_keyed_by_index() {
        let (a, _wa) = worker(0, "alpha");
        let (b, mut wb) = worker(1, "beta");
        let mut aggregate = combine(vec![a, b]);

        send(
            &mut wb,
            Event::Start(Start {
                name: "beta".into(),
                watch: true,
            }),
        )
        .await;

        let (index, start) = aggregate.starts.next().await.unwrap();
        assert_eq!(index, 1);
        assert!(start.payload.watch);
    }
}
