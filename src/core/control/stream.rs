//! Resumable status stream
//!
//! Frames carry a monotonically increasing sequence number and are
//! buffered for a replay window. A reconnecting consumer supplies its last
//! seen sequence and receives everything since; one that has fallen
//! outside the window gets told to reset instead of silently missing
//! frames.

use super::types::{FrameKind, StatusFrame};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Live frames buffered for subscribers before lagging ones drop
const LIVE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct StreamBuffer {
    frames: VecDeque<StatusFrame>,
    next_seq: u64,
}

/// Replay failed: the consumer is older than the buffer window
#[derive(Debug, PartialEq, Eq)]
pub struct ResetRequired;

/// Sequenced, buffered frame fan-out
#[derive(Clone)]
pub struct StatusStream {
    buffer: Arc<StdMutex<StreamBuffer>>,
    live: broadcast::Sender<StatusFrame>,
    window: Duration,
}

impl StatusStream {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            buffer: Arc::new(StdMutex::new(StreamBuffer {
                frames: VecDeque::new(),
                next_seq: 1,
            })),
            live,
            window,
        }
    }

    /// Publish a frame: assign its sequence, buffer it, fan it out
    pub fn push(&self, kind: FrameKind, payload: serde_json::Value) -> StatusFrame {
        let frame = {
            let mut buffer = self.buffer.lock().expect("stream buffer lock");
            let frame = StatusFrame {
                seq: buffer.next_seq,
                ts: Utc::now(),
                kind,
                payload,
            };
            buffer.next_seq += 1;
            buffer.frames.push_back(frame.clone());
            Self::prune(&mut buffer, self.window, frame.ts);
            frame
        };

        let _ = self.live.send(frame.clone());
        frame
    }

    /// Frames newer than `last_seq`, oldest first
    ///
    /// Errors when `last_seq` predates the buffer window; the consumer
    /// must restart from a fresh subscription.
    pub fn replay_since(&self, last_seq: u64) -> Result<Vec<StatusFrame>, ResetRequired> {
        let buffer = self.buffer.lock().expect("stream buffer lock");

        // everything up to date
        if last_seq + 1 >= buffer.next_seq {
            return Ok(Vec::new());
        }

        match buffer.frames.front() {
            Some(oldest) if oldest.seq > last_seq + 1 => Err(ResetRequired),
            None => Err(ResetRequired),
            Some(_) => Ok(buffer
                .frames
                .iter()
                .filter(|f| f.seq > last_seq)
                .cloned()
                .collect()),
        }
    }

    /// Subscribe to live frames from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusFrame> {
        self.live.subscribe()
    }

    /// Sequence the next frame will carry
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.buffer.lock().expect("stream buffer lock").next_seq
    }

    fn prune(buffer: &mut StreamBuffer, window: Duration, now: DateTime<Utc>) {
        let cutoff = now
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(300));
        while buffer
            .frames
            .front()
            .is_some_and(|frame| frame.ts < cutoff)
        {
            buffer.frames.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream() -> StatusStream {
        StatusStream::new(Duration::from_secs(300))
    }

    #[test]
    fn sequences_are_monotonic_and_gapless() {
        let s = stream();
        let a = s.push(FrameKind::Tick, json!({}));
        let b = s.push(FrameKind::RunStarted, json!({"run_id": "r1"}));
        let c = s.push(FrameKind::Tick, json!({}));
        assert_eq!((a.seq, b.seq, c.seq), (1, 2, 3));
    }

    #[test]
    fn replay_returns_frames_after_cursor() {
        let s = stream();
        for i in 0..5 {
            s.push(FrameKind::Tick, json!({ "i": i }));
        }

        let replayed = s.replay_since(2).unwrap();
        let seqs: Vec<u64> = replayed.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn up_to_date_cursor_replays_nothing() {
        let s = stream();
        s.push(FrameKind::Tick, json!({}));
        assert!(s.replay_since(1).unwrap().is_empty());
        // a cursor from the future is treated as up to date
        assert!(s.replay_since(99).unwrap().is_empty());
    }

    #[test]
    fn cursor_older_than_window_requires_reset() {
        let s = StatusStream::new(Duration::from_millis(1));
        s.push(FrameKind::Tick, json!({}));
        std::thread::sleep(Duration::from_millis(10));
        // pushing prunes the old frame out of the window
        s.push(FrameKind::Tick, json!({}));
        s.push(FrameKind::Tick, json!({}));

        assert_eq!(s.replay_since(0), Err(ResetRequired));
    }

    #[tokio::test]
    async fn live_subscribers_see_pushes() {
        let s = stream();
        let mut rx = s.subscribe();
        s.push(FrameKind::Alert, json!({"message": "hello"}));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Alert);
        assert_eq!(frame.seq, 1);
    }
}
