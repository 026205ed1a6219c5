//! Output queue of one subscription.
//!
//! Unbounded FIFO. The receiver sits behind an async mutex so any number of
//! consumers can `get()` concurrently; each message goes to exactly one of
//! them. Once the producing side closes the queue, `get()` drains what is
//! left and then yields `None`.

use std::sync::Mutex;

use shasta_core::Message;
use tokio::sync::mpsc;

pub struct MessageQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Enqueue `message`. Returns `false` once the queue is closed.
    pub fn put(&self, message: Message) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Next message in FIFO order, waiting for one to arrive. `None` only
    /// after the queue was closed and fully drained.
    pub async fn get(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    /// Next message if one is ready right now.
    pub fn try_get(&self) -> Option<Message> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Stop accepting messages. Already queued messages stay readable.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shasta_core::{Envelope, ObjectIdentifier, SequenceId, Snapshot, Value};

    fn delta(seq: u64) -> Message {
        let value = Value::new(ObjectIdentifier::new("A", "T", "S", "N"), vec![seq as u8]);
        Message::Delta(Envelope::new(value, SequenceId::new(1, seq)))
    }

    #[tokio::test]
    async fn test_fifo() {
        let q = MessageQueue::new();
        q.put(Message::Snapshot(Snapshot::default()));
        q.put(delta(1));
        q.put(delta(2));

        assert!(q.get().await.unwrap().is_snapshot());
        assert_eq!(q.get().await.unwrap(), delta(1));
        assert_eq!(q.try_get(), Some(delta(2)));
        assert_eq!(q.try_get(), None);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let q = MessageQueue::new();
        q.put(delta(1));
        q.close();

        assert!(!q.put(delta(2)));
        assert!(q.is_closed());
        assert_eq!(q.get().await, Some(delta(1)));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_get_waits_for_put() {
        let q = std::sync::Arc::new(MessageQueue::new());
        let reader = q.clone();
        let pending = tokio::spawn(async move { reader.get().await });

        tokio::task::yield_now().await;
        q.put(delta(7));
        assert_eq!(pending.await.unwrap(), Some(delta(7)));
    }
}
