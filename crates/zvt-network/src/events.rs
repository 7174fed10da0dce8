//! Replay-buffered broadcast streams for observers.
//!
//! Publishing never waits on subscribers. A subscriber that falls more than
//! the channel capacity behind loses the oldest events
//! (`RecvError::Lagged`); the protocol itself is unaffected.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;

/// Default number of events kept for late subscribers.
pub const DEFAULT_REPLAY: usize = 64;

/// Live events plus the most recent history.
#[derive(Debug)]
pub struct EventStream<T> {
    sender: broadcast::Sender<T>,
    history: Mutex<VecDeque<T>>,
    replay: usize,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// `replay` bounds both the history and the live channel buffer.
    pub fn new(replay: usize) -> Self {
        let (sender, _) = broadcast::channel(replay.max(1));
        EventStream {
            sender,
            history: Mutex::new(VecDeque::with_capacity(replay)),
            replay,
        }
    }

    pub fn publish(&self, event: T) {
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if self.replay > 0 {
                if history.len() == self.replay {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Recent history, oldest first, followed by a live receiver.
    ///
    /// Both are taken under the history lock, so no event is missed or
    /// delivered twice between them.
    pub fn subscribe(&self) -> (Vec<T>, broadcast::Receiver<T>) {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        (history.iter().cloned().collect(), self.sender.subscribe())
    }

    pub fn history(&self) -> Vec<T> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY)
    }
}
