//! Bounded queue between the read loop and `receive`

use asyncws_proto::Message;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Create a queue holding at most `capacity` messages (minimum 1)
pub(crate) fn bounded(capacity: usize) -> (MessageSender, MessageQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let len = Arc::new(AtomicUsize::new(0));
    (
        MessageSender {
            tx,
            len: len.clone(),
        },
        MessageQueue {
            rx: Mutex::new(rx),
            len,
        },
    )
}

/// Producer side, owned by the read loop
#[derive(Debug)]
pub(crate) struct MessageSender {
    tx: mpsc::Sender<Message>,
    len: Arc<AtomicUsize>,
}

impl MessageSender {
    /// Wait for a free slot, then push. Hands the message back if the queue is gone.
    pub(crate) async fn send(&self, message: Message) -> Result<(), Message> {
        match self.tx.reserve().await {
            Ok(permit) => {
                // counted before it becomes visible to `recv`
                self.len.fetch_add(1, Ordering::SeqCst);
                permit.send(message);
                Ok(())
            }
            Err(_) => Err(message),
        }
    }
}

/// Consumer side, shared by every `receive` caller.
///
/// Each message is handed to exactly one caller. `recv` returns `None` once
/// the producer is gone and the buffer is drained.
#[derive(Debug)]
pub(crate) struct MessageQueue {
    rx: Mutex<mpsc::Receiver<Message>>,
    len: Arc<AtomicUsize>,
}

impl MessageQueue {
    pub(crate) async fn recv(&self) -> Option<Message> {
        let message = self.rx.lock().await.recv().await;
        if message.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }

    /// Messages buffered and not yet received
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, queue) = bounded(4);
        tx.send(Message::text("a")).await.unwrap();
        tx.send(Message::text("b")).await.unwrap();
        drop(tx);

        assert_eq!(queue.recv().await, Some(Message::text("a")));
        assert_eq!(queue.recv().await, Some(Message::text("b")));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let (tx, queue) = bounded(1);
        tx.send(Message::text("first")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(Message::text("second"))).await;
        assert!(blocked.is_err());

        assert_eq!(queue.recv().await, Some(Message::text("first")));
        tx.send(Message::text("second")).await.unwrap();
        assert_eq!(queue.recv().await, Some(Message::text("second")));
    }

    #[tokio::test]
    async fn test_len_tracks_buffered_messages() {
        let (tx, queue) = bounded(4);
        assert_eq!(queue.len(), 0);

        tx.send(Message::text("a")).await.unwrap();
        tx.send(Message::text("b")).await.unwrap();
        assert_eq!(queue.len(), 2);

        queue.recv().await.unwrap();
        assert_eq!(queue.len(), 1);

        // the count survives the producer going away
        drop(tx);
        assert_eq!(queue.len(), 1);
        queue.recv().await.unwrap();
        assert_eq!(queue.recv().await, None);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_send_after_consumer_dropped() {
        let (tx, queue) = bounded(1);
        drop(queue);
        assert_eq!(tx.send(Message::text("lost")).await, Err(Message::text("lost")));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (tx, queue) = bounded(0);
        tx.send(Message::binary(vec![1u8])).await.unwrap();
        assert_eq!(queue.recv().await, Some(Message::binary(vec![1u8])));
    }

    #[tokio::test]
    async fn test_concurrent_consumers_each_get_one() {
        let (tx, queue) = bounded(8);
        let queue = Arc::new(queue);

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.recv().await })
            })
            .collect();

        for i in 0..4 {
            tx.send(Message::text(i.to_string())).await.unwrap();
        }

        let mut received = Vec::new();
        for consumer in consumers {
            received.push(consumer.await.unwrap().unwrap());
        }
        received.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        let expected: Vec<Message> = (0..4).map(|i| Message::text(i.to_string())).collect();
        assert_eq!(received, expected);
    }

    proptest! {
        #[test]
        fn test_queue_preserves_order(texts in prop::collection::vec(".{0,16}", 0..16)) {
            tokio_test::block_on(async {
                let (tx, queue) = bounded(texts.len());
                for text in &texts {
                    tx.send(Message::text(text.clone())).await.unwrap();
                }
                drop(tx);

                for text in &texts {
                    assert_eq!(queue.recv().await, Some(Message::text(text.clone())));
                }
                assert_eq!(queue.recv().await, None);
            });
        }
    }
}
