// src/feed.rs
//! Push-style sensor delivery. A single-slot watch channel sits between the
//! sensor thread and the frame store: a new frame overwrites one that has not
//! been consumed yet, so a slow consumer never builds a backlog.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::skeleton::SkeletonFrame;

pub struct FrameSender {
    tx: watch::Sender<Option<SkeletonFrame>>,
}

impl FrameSender {
    /// Never blocks; replaces any frame still waiting in the slot.
    pub fn deliver(&self, frame: SkeletonFrame) {
        self.tx.send_replace(Some(frame));
    }
}

pub struct FrameReceiver {
    rx: watch::Receiver<Option<SkeletonFrame>>,
}

impl FrameReceiver {
    /// Waits for the next unseen frame. `None` once every sender is gone.
    pub async fn next_frame(&mut self) -> Option<SkeletonFrame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

pub fn frame_feed() -> (FrameSender, FrameReceiver) {
    let (tx, rx) = watch::channel(None);
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Spawns the consumer side: every observed frame goes to `sink`.
pub fn spawn_frame_pump<F>(mut rx: FrameReceiver, mut sink: F) -> JoinHandle<usize>
where
    F: FnMut(SkeletonFrame) + Send + 'static,
{
    tokio::spawn(async move {
        let mut consumed = 0;
        while let Some(frame) = rx.next_frame().await {
            sink(frame);
            consumed += 1;
        }
        debug!(consumed, "frame feed closed");
        consumed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_unconsumed_frame_is_overwritten() {
        let (tx, mut rx) = frame_feed();
        tx.deliver(SkeletonFrame::new(Vec::new(), 1.0));
        tx.deliver(SkeletonFrame::new(Vec::new(), 2.0));
        let frame = rx.next_frame().await.unwrap();
        assert_eq!(frame.timestamp, 2.0);
    }

    #[tokio::test]
    async fn test_pump_stops_when_sender_dropped() {
        let (tx, rx) = frame_feed();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let handle = spawn_frame_pump(rx, move |frame| {
            sink_seen.lock().unwrap().push(frame.timestamp);
        });

        tx.deliver(SkeletonFrame::new(Vec::new(), 5.0));
        drop(tx);

        let consumed = handle.await.unwrap();
        assert!(consumed <= 1);
        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|t| *t == 5.0));
    }
}
