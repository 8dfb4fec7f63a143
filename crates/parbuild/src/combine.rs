//! Combine-latest over an indexed set of streams.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_stream::{Stream, StreamMap};

/// Emits a frame holding the latest item of every input stream whenever any
/// input yields, once every input has yielded at least once.
///
/// Frames are ordered by input position and always as long as the number of
/// inputs. The stream ends when every input has ended, or as soon as one
/// input ends without ever yielding, since no full frame can follow.
pub struct CombineLatest<S: Stream> {
    streams: StreamMap<usize, S>,
    latest: Vec<Option<S::Item>>,
    done: bool,
}

impl<S> CombineLatest<S>
where
    S: Stream + Unpin,
    S::Item: Clone,
{
    pub fn new(inputs: impl IntoIterator<Item = S>) -> Self {
        let mut streams = StreamMap::new();
        for (index, stream) in inputs.into_iter().enumerate() {
            streams.insert(index, stream);
        }
        let width = streams.len();
        Self {
            streams,
            latest: (0..width).map(|_| None).collect(),
            done: width == 0,
        }
    }

    /// Number of columns in every frame.
    pub fn width(&self) -> usize {
        self.latest.len()
    }

    fn frame(&self) -> Option<Vec<S::Item>> {
        self.latest.iter().cloned().collect()
    }

    /// Whether some input ended before yielding anything.
    fn starved(&self) -> bool {
        self.latest
            .iter()
            .enumerate()
            .any(|(index, value)| value.is_none() && !self.streams.contains_key(&index))
    }
}

// Items are only ever moved in and cloned out, never pinned.
impl<S: Stream + Unpin> Unpin for CombineLatest<S> {}

impl<S> Stream for CombineLatest<S>
where
    S: Stream + Unpin,
    S::Item: Clone,
{
    type Item = Vec<S::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.streams).poll_next(cx) {
                Poll::Ready(Some((index, item))) => {
                    this.latest[index] = Some(item);
                    if let Some(frame) = this.frame() {
                        return Poll::Ready(Some(frame));
                    }
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if this.starved() {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tokio_stream::StreamExt;

    type Input = UnboundedReceiverStream<&'static str>;

    fn inputs(n: usize) -> (Vec<mpsc::UnboundedSender<&'static str>>, Vec<Input>) {
        (0..n)
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, UnboundedReceiverStream::new(rx))
            })
            .unzip()
    }

    #[tokio::test]
    async fn test_first_frame_waits_for_every_input() {
        let (txs, streams) = inputs(2);
        let mut combined = CombineLatest::new(streams);

        txs[0].send("a1").unwrap();
        txs[0].send("a2").unwrap();
        let early = tokio::time::timeout(Duration::from_millis(20), combined.next()).await;
        assert!(early.is_err(), "no frame before every input has a value");

        txs[1].send("b1").unwrap();
        assert_eq!(combined.next().await, Some(vec!["a2", "b1"]));

        txs[1].send("b2").unwrap();
        assert_eq!(combined.next().await, Some(vec!["a2", "b2"]));
        assert_eq!(combined.width(), 2);
    }

    /// Items that are not `Unpin` can still be combined.
    #[tokio::test]
    async fn test_items_need_not_be_unpin() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut combined = CombineLatest::new(vec![UnboundedReceiverStream::new(rx)]);

        tx.send(std::marker::PhantomPinned).unwrap();
        drop(tx);

        let frame = combined.next().await.unwrap();
        assert_eq!(frame.len(), 1);
        assert!(combined.next().await.is_none());
    }

    #[tokio::test]
    async fn test_ended_input_keeps_last_value() {
        let (mut txs, streams) = inputs(2);
        let mut combined = CombineLatest::new(streams);

        txs[0].send("a").unwrap();
        drop(txs.remove(0));
        txs[0].send("b1").unwrap();
        assert_eq!(combined.next().await, Some(vec!["a", "b1"]));

        txs[0].send("b2").unwrap();
        assert_eq!(combined.next().await, Some(vec!["a", "b2"]));

        txs.clear();
        assert_eq!(combined.next().await, None);
    }

    #[tokio::test]
    async fn test_input_ending_empty_ends_everything() {
        let (mut txs, streams) = inputs(2);
        let mut combined = CombineLatest::new(streams);

        drop(txs.remove(1));
        txs[0].send("a").unwrap();

        assert_eq!(combined.next().await, None);
        assert_eq!(combined.next().await, None);
    }

    #[tokio::test]
    async fn test_no_inputs() {
        let mut combined = CombineLatest::new(Vec::<Input>::new());
        assert_eq!(combined.next().await, None);
    }
}
