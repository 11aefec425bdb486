use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{errors::AppError, mcp::rpc::Envelope};

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Session(String),
    Message(Envelope),
}

#[derive(Debug, Clone)]
pub struct OutboundChannel {
    owner: Arc<str>,
    tx: mpsc::Sender<OutboundFrame>,
    closed: CancellationToken,
}

impl OutboundChannel {
    pub fn new(owner: impl Into<Arc<str>>, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = Self {
            owner: owner.into(),
            tx,
            closed: CancellationToken::new(),
        };
        (channel, rx)
    }

    pub async fn push(&self, frame: OutboundFrame) -> Result<(), AppError> {
        if self.closed.is_cancelled() {
            return Err(self.write_failure());
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.write_failure()),
            sent = self.tx.send(frame) => sent.map_err(|_| self.write_failure()),
        }
    }

    pub async fn push_envelope(&self, envelope: Envelope) -> Result<(), AppError> {
        self.push(OutboundFrame::Message(envelope)).await
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn write_failure(&self) -> AppError {
        AppError::ChannelWriteFailure {
            session_id: self.owner.to_string(),
        }
    }
}

// Frames queued before close are still yielded.
pub fn drain_frames(
    rx: mpsc::Receiver<OutboundFrame>,
    closed: CancellationToken,
) -> impl Stream<Item = OutboundFrame> + Send + 'static {
    futures::stream::unfold((rx, closed), |(mut rx, closed)| async move {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => frame,
            _ = closed.cancelled() => None,
        };
        frame.map(|frame| (frame, (rx, closed)))
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_enqueue_order() {
        let (channel, rx) = OutboundChannel::new("s-1", 8);
        let stream = drain_frames(rx, channel.closed_token());

        channel
            .push(OutboundFrame::Session("s-1".to_string()))
            .await
            .expect("push session frame");
        for id in 0..3 {
            channel
                .push_envelope(Envelope::result(Some(json!(id)), json!({})))
                .await
                .expect("push message");
        }
        channel.close();

        let frames: Vec<OutboundFrame> = stream.collect().await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], OutboundFrame::Session("s-1".to_string()));
        for (index, frame) in frames[1..].iter().enumerate() {
            match frame {
                OutboundFrame::Message(envelope) => assert_eq!(envelope.id, Some(json!(index))),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn push_after_close_is_a_write_failure() {
        let (channel, _rx) = OutboundChannel::new("s-2", 8);
        channel.close();

        let err = channel
            .push_envelope(Envelope::notification("ping", None))
            .await
            .expect_err("closed channel must reject pushes");
        assert_eq!(err.kind(), "ChannelWriteFailure");
    }

    #[tokio::test]
    async fn push_after_consumer_drop_is_a_write_failure() {
        let (channel, rx) = OutboundChannel::new("s-3", 8);
        drop(rx);

        assert!(channel.is_closed());
        let err = channel
            .push_envelope(Envelope::notification("ping", None))
            .await
            .expect_err("dropped consumer must reject pushes");
        assert!(matches!(err, AppError::ChannelWriteFailure { session_id } if session_id == "s-3"));
    }

    #[tokio::test]
    async fn concurrent_pushers_never_lose_frames() {
        let (channel, rx) = OutboundChannel::new("s-4", 4);
        let stream = drain_frames(rx, channel.closed_token());

        let mut writers = Vec::new();
        for writer in 0..8 {
            let channel = channel.clone();
            writers.push(tokio::spawn(async move {
                for seq in 0..10 {
                    channel
                        .push_envelope(Envelope::notification(
                            "tick",
                            Some(json!({"writer": writer, "seq": seq})),
                        ))
                        .await
                        .expect("push");
                }
            }));
        }

        let collector = tokio::spawn(stream.take(80).collect::<Vec<_>>());
        for writer in writers {
            writer.await.expect("writer task");
        }
        let frames = collector.await.expect("collector task");
        assert_eq!(frames.len(), 80);

        // Per-writer order is preserved even though writers interleave.
        for writer in 0..8 {
            let seqs: Vec<i64> = frames
                .iter()
                .filter_map(|frame| match frame {
                    OutboundFrame::Message(envelope) => envelope.params.clone(),
                    OutboundFrame::Session(_) => None,
                })
                .filter(|params| params["writer"] == writer)
                .filter_map(|params| params["seq"].as_i64())
                .collect();
            assert_eq!(seqs, (0..10).collect::<Vec<_>>());
        }
    }
}
