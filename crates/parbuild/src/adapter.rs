//! Parent-side channel adapter: one per worker.
//!
//! A single pump task owns everything the parent reads from or writes to a
//! worker: the message channel (once the worker has connected), its stdout
//! and stderr, and the directives queued for it. It turns them into five
//! typed streams.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Instant;

use parbuild_core::wire::{decode_batch, encode_directive};
use parbuild_core::{
    Annotated, BuildStats, Directive, Event, LogChannel, LogLine, Progress, Start, WorkerIdentity,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::launcher::WorkerHandle;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resolves once the worker has connected its message channel.
pub type IpcConnect = Pin<Box<dyn Future<Output = io::Result<(BoxedReader, BoxedWriter)>> + Send>>;

/// First log line of every worker, before it has printed anything.
pub const LOG_PLACEHOLDER: &str = "waiting for output";

/// Typed view of one worker's channels.
///
/// `progress` starts with [`Progress::ready`] and `logs` with a placeholder
/// line, so every worker has a value in those streams from the start.
pub struct ChannelAdapter {
    pub identity: WorkerIdentity,
    pub start: UnboundedReceiverStream<Annotated<Start>>,
    pub progress: UnboundedReceiverStream<Annotated<Progress>>,
    pub end: UnboundedReceiverStream<Annotated<BuildStats>>,
    pub watch: UnboundedReceiverStream<Annotated<BuildStats>>,
    pub logs: UnboundedReceiverStream<LogLine>,
    pub pump: JoinHandle<()>,
}

impl ChannelAdapter {
    /// Adapt a freshly launched worker.
    pub fn from_handle(handle: WorkerHandle) -> Self {
        let connect = accept_worker(handle.ipc, handle.identity.index);
        Self::spawn(
            handle.identity,
            Box::pin(connect),
            handle.stdout.map(|s| Box::new(s) as BoxedReader),
            handle.stderr.map(|s| Box::new(s) as BoxedReader),
            handle.directives,
        )
    }

    /// Start the pump over arbitrary transports.
    pub fn spawn(
        identity: WorkerIdentity,
        connect: IpcConnect,
        stdout: Option<BoxedReader>,
        stderr: Option<BoxedReader>,
        directives: mpsc::UnboundedReceiver<Directive>,
    ) -> Self {
        let (start_tx, start_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (end_tx, end_rx) = mpsc::unbounded_channel();
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let (logs_tx, logs_rx) = mpsc::unbounded_channel();

        let mut sinks = Sinks {
            identity: identity.clone(),
            start: Some(start_tx),
            progress: Some(progress_tx),
            end: Some(end_tx),
            watch: Some(watch_tx),
            logs: logs_tx,
            log_seq: 0,
            started_at: Instant::now(),
            ended: false,
        };
        sinks.send_progress(Progress::ready());
        sinks.log(LogChannel::Stdout, LOG_PLACEHOLDER.to_string());

        let pump = tokio::spawn(pump(sinks, connect, stdout, stderr, directives));

        Self {
            identity,
            start: UnboundedReceiverStream::new(start_rx),
            progress: UnboundedReceiverStream::new(progress_rx),
            end: UnboundedReceiverStream::new(end_rx),
            watch: UnboundedReceiverStream::new(watch_rx),
            logs: UnboundedReceiverStream::new(logs_rx),
            pump,
        }
    }
}

async fn accept_worker(
    listener: TcpListener,
    index: usize,
) -> io::Result<(BoxedReader, BoxedWriter)> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    debug!(worker_index = index, %peer, "Worker connected");
    let (reader, writer) = stream.into_split();
    Ok((Box::new(reader), Box::new(writer)))
}

/// Senders for the adapter's streams. Event senders are dropped when the
/// message channel closes; the log sender lives as long as the pump.
struct Sinks {
    identity: WorkerIdentity,
    start: Option<mpsc::UnboundedSender<Annotated<Start>>>,
    progress: Option<mpsc::UnboundedSender<Annotated<Progress>>>,
    end: Option<mpsc::UnboundedSender<Annotated<BuildStats>>>,
    watch: Option<mpsc::UnboundedSender<Annotated<BuildStats>>>,
    logs: mpsc::UnboundedSender<LogLine>,
    log_seq: u64,
    started_at: Instant,
    ended: bool,
}

impl Sinks {
    fn annotate<T>(&self, payload: T) -> Annotated<T> {
        Annotated::new(self.identity.clone(), payload)
    }

    fn send_progress(&self, progress: Progress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(self.annotate(progress));
        }
    }

    fn log(&mut self, channel: LogChannel, text: String) {
        let line = LogLine::new(self.identity.clone(), channel, text, self.log_seq);
        self.log_seq += 1;
        let _ = self.logs.send(line);
    }

    /// Handle one line from the message channel. Within a batch only the
    /// last event of each kind is kept.
    fn on_batch(&mut self, line: &str) {
        let events = match decode_batch(line) {
            Ok(events) => events,
            Err(e) => {
                warn!(worker_index = self.identity.index, error = %e, "Skipping malformed batch");
                return;
            }
        };
        debug!(worker_index = self.identity.index, events = events.len(), "Received batch");

        let (mut start, mut progress, mut watch, mut end) = (None, None, None, None);
        for event in events {
            match event {
                Event::Start(payload) => start = Some(payload),
                Event::Progress(payload) => progress = Some(payload),
                Event::Watch(payload) => watch = Some(payload),
                Event::End(payload) => end = Some(payload),
            }
        }

        if let (Some(payload), Some(tx)) = (start, &self.start) {
            info!(worker_index = self.identity.index, name = %payload.name, "Worker started");
            let _ = tx.send(self.annotate(payload));
        }
        if let Some(payload) = progress {
            self.send_progress(payload);
        }
        if let (Some(payload), Some(tx)) = (watch, &self.watch) {
            let _ = tx.send(self.annotate(payload));
        }
        if let Some(payload) = end {
            if let Some(tx) = &self.end {
                let _ = tx.send(self.annotate(payload));
            }
            self.ended = true;
            let elapsed = self.started_at.elapsed().as_secs_f64();
            self.log(LogChannel::Stdout, format!("finished after {elapsed:.2}s"));
        }
    }

    fn close_events(&mut self) {
        if self.end.is_some() && !self.ended {
            warn!(
                worker_index = self.identity.index,
                pid = self.identity.pid,
                "Message channel closed before the worker reported a result"
            );
        }
        self.start = None;
        self.progress = None;
        self.end = None;
        self.watch = None;
    }
}

async fn pump(
    mut sinks: Sinks,
    connect: IpcConnect,
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    directives: mpsc::UnboundedReceiver<Directive>,
) {
    let index = sinks.identity.index;
    let mut connecting = Some(connect);
    let mut ipc_lines: Option<Lines<BufReader<BoxedReader>>> = None;
    let mut ipc_writer: Option<BoxedWriter> = None;
    let mut stdout_lines = stdout.map(|r| BufReader::new(r).lines());
    let mut stderr_lines = stderr.map(|r| BufReader::new(r).lines());
    let mut directives = Some(directives);

    loop {
        tokio::select! {
            connected = await_connect(&mut connecting), if connecting.is_some() => {
                connecting = None;
                match connected {
                    Ok((reader, writer)) => {
                        ipc_lines = Some(BufReader::new(reader).lines());
                        ipc_writer = Some(writer);
                    }
                    Err(e) => {
                        warn!(worker_index = index, error = %e, "Worker never connected");
                        sinks.close_events();
                    }
                }
            }
            line = next_line(&mut ipc_lines), if ipc_lines.is_some() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => sinks.on_batch(&line),
                Ok(None) | Err(_) => {
                    debug!(worker_index = index, "Message channel closed");
                    ipc_lines = None;
                    ipc_writer = None;
                    sinks.close_events();
                }
            },
            line = next_line(&mut stdout_lines), if stdout_lines.is_some() => match line {
                Ok(Some(text)) => sinks.log(LogChannel::Stdout, text),
                Ok(None) | Err(_) => stdout_lines = None,
            },
            line = next_line(&mut stderr_lines), if stderr_lines.is_some() => match line {
                Ok(Some(text)) => sinks.log(LogChannel::Stderr, text),
                Ok(None) | Err(_) => stderr_lines = None,
            },
            directive = next_directive(&mut directives), if directives.is_some() && ipc_writer.is_some() => {
                match (directive, ipc_writer.as_mut()) {
                    (Some(directive), Some(writer)) => {
                        if let Err(e) = send_directive(writer, directive).await {
                            debug!(worker_index = index, error = %e, "Could not deliver directive");
                        }
                    }
                    _ => directives = None,
                }
            }
            else => break,
        }

        // A worker that closed both output streams without connecting is gone.
        if connecting.is_some() && stdout_lines.is_none() && stderr_lines.is_none() {
            warn!(worker_index = index, "Worker exited before connecting");
            connecting = None;
            sinks.close_events();
        }
    }

    debug!(worker_index = index, "Channel adapter finished");
}

async fn await_connect(
    connecting: &mut Option<IpcConnect>,
) -> io::Result<(BoxedReader, BoxedWriter)> {
    match connecting {
        Some(connect) => connect.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_line(lines: &mut Option<Lines<BufReader<BoxedReader>>>) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn next_directive(
    directives: &mut Option<mpsc::UnboundedReceiver<Directive>>,
) -> Option<Directive> {
    match directives {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_directive(writer: &mut BoxedWriter, directive: Directive) -> io::Result<()> {
    let line = encode_directive(directive).map_err(io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parbuild_core::wire::{decode_directive, encode_batch};
    use tokio::io::{AsyncBufReadExt, DuplexStream};
    use tokio_stream::StreamExt;

    struct FakeWorker {
        events: DuplexStream,
        directives: Lines<BufReader<DuplexStream>>,
        stdout: DuplexStream,
        stderr: DuplexStream,
        directive_tx: mpsc::UnboundedSender<Directive>,
    }

    fn adapter() -> (ChannelAdapter, FakeWorker) {
        let (worker_events, parent_events) = tokio::io::duplex(64 * 1024);
        let (parent_directives, worker_directives) = tokio::io::duplex(1024);
        let (worker_stdout, parent_stdout) = tokio::io::duplex(1024);
        let (worker_stderr, parent_stderr) = tokio::io::duplex(1024);
        let (directive_tx, directive_rx) = mpsc::unbounded_channel();

        let connect: IpcConnect = Box::pin(async move {
            Ok((
                Box::new(parent_events) as BoxedReader,
                Box::new(parent_directives) as BoxedWriter,
            ))
        });
        let adapter = ChannelAdapter::spawn(
            WorkerIdentity::new(0, 100, "alpha"),
            connect,
            Some(Box::new(parent_stdout)),
            Some(Box::new(parent_stderr)),
            directive_rx,
        );
        let worker = FakeWorker {
            events: worker_events,
            directives: BufReader::new(worker_directives).lines(),
            stdout: worker_stdout,
            stderr: worker_stderr,
            directive_tx,
        };
        (adapter, worker)
    }

    async fn send(worker: &mut FakeWorker, events: &[Event]) {
        let line = encode_batch(events).unwrap();
        worker.events.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_seed_values() {
        let (mut adapter, _worker) = adapter();

        let progress = adapter.progress.next().await.unwrap();
        assert_eq!(progress.payload, Progress::ready());
        assert_eq!(progress.identity.name, "alpha");

        let log = adapter.logs.next().await.unwrap();
        assert_eq!(log.text, LOG_PLACEHOLDER);
        assert_eq!(log.seq, 0);
    }

    #[tokio::test]
    async fn test_last_event_of_each_kind_wins() {
        let (mut adapter, mut worker) = adapter();
        adapter.progress.next().await.unwrap();

        send(
            &mut worker,
            &[
                Event::Start(Start {
                    name: "alpha".into(),
                    watch: false,
                }),
                Event::Progress(Progress::new(0.2, "building", "", "")),
                Event::Progress(Progress::new(0.6, "building", "", "")),
            ],
        )
        .await;
        send(&mut worker, &[Event::Progress(Progress::new(0.9, "optimizing", "", ""))]).await;

        assert_eq!(adapter.start.next().await.unwrap().payload.name, "alpha");
        assert_eq!(adapter.progress.next().await.unwrap().payload.percent, 0.6);
        assert_eq!(adapter.progress.next().await.unwrap().payload.percent, 0.9);
    }

    #[tokio::test]
    async fn test_scalar_and_malformed_lines() {
        let (mut adapter, mut worker) = adapter();

        worker.events.write_all(b"garbage\n").await.unwrap();
        worker
            .events
            .write_all(b"{\"action\":\"end\",\"errors\":[\"boom\"]}\n")
            .await
            .unwrap();

        let end = adapter.end.next().await.unwrap();
        assert_eq!(end.payload.errors, vec!["boom".to_string()]);
        assert_eq!(end.identity.index, 0);
    }

    #[tokio::test]
    async fn test_logs_keep_duplicates_and_report_elapsed_time() {
        let (mut adapter, mut worker) = adapter();

        worker.stdout.write_all(b"compiling\ncompiling\n").await.unwrap();
        worker.stderr.write_all(b"warning: slow\n").await.unwrap();
        drop(worker.stdout);
        drop(worker.stderr);

        let mut lines = Vec::new();
        for _ in 0..4 {
            lines.push(adapter.logs.next().await.unwrap());
        }
        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.channel == LogChannel::Stdout && l.text == "compiling")
            .collect();
        assert_eq!(stdout.len(), 2);
        assert_ne!(stdout[0].seq, stdout[1].seq);
        assert!(lines.iter().any(|l| l.is_error() && l.text == "warning: slow"));

        let line = encode_batch(&[Event::End(BuildStats::default())]).unwrap();
        worker.events.write_all(line.as_bytes()).await.unwrap();
        drop(worker.events);

        adapter.end.next().await.unwrap();
        let summary = adapter.logs.next().await.unwrap();
        assert!(summary.text.starts_with("finished after "));
        assert!(summary.text.ends_with('s'));

        // Every source is closed now.
        assert!(adapter.logs.next().await.is_none());
        assert!(adapter.end.next().await.is_none());
    }

    #[tokio::test]
    async fn test_directives_reach_worker() {
        let (_adapter, mut worker) = adapter();

        worker.directive_tx.send(Directive::Shutdown).unwrap();

        let line = worker.directives.next_line().await.unwrap().unwrap();
        assert_eq!(decode_directive(&line).unwrap(), Directive::Shutdown);
    }

    #[tokio::test]
    async fn test_worker_gone_before_connecting() {
        let (stdout_w, stdout_r) = tokio::io::duplex(64);
        let (stderr_w, stderr_r) = tokio::io::duplex(64);
        let (_directive_tx, directive_rx) = mpsc::unbounded_channel();
        drop(stdout_w);
        drop(stderr_w);

        let mut adapter = ChannelAdapter::spawn(
            WorkerIdentity::new(3, 7, "ghost"),
            Box::pin(std::future::pending::<io::Result<(BoxedReader, BoxedWriter)>>()),
            Some(Box::new(stdout_r)),
            Some(Box::new(stderr_r)),
            directive_rx,
        );

        assert!(adapter.end.next().await.is_none());
        assert!(adapter.start.next().await.is_none());
    }
}
