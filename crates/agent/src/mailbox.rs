use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use alcoguard_core::domain::message::Message;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("mailbox is closed")]
pub struct MailboxClosed;

/// Sending half of an agent's FIFO queue. Enqueue never blocks.
#[derive(Clone, Debug)]
pub struct Mailbox {
    sender: mpsc::UnboundedSender<Message>,
    depth: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub struct MailboxReceiver {
    receiver: mpsc::UnboundedReceiver<Message>,
    depth: Arc<AtomicUsize>,
}

pub fn mailbox() -> (Mailbox, MailboxReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (Mailbox { sender, depth: depth.clone() }, MailboxReceiver { receiver, depth })
}

impl Mailbox {
    pub fn deliver(&self, message: Message) -> Result<(), MailboxClosed> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.sender.send(message).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            MailboxClosed
        })
    }

    /// Messages enqueued but not yet taken by the loop.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl MailboxReceiver {
    pub async fn recv(&mut self) -> Option<Message> {
        let message = self.receiver.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use alcoguard_core::domain::message::{EventType, NewMessage};

    use super::{mailbox, MailboxClosed};

    #[tokio::test]
    async fn mailbox_is_fifo_and_tracks_depth() {
        let (sender, mut receiver) = mailbox();
        for event_type in [EventType::SessionStarted, EventType::DrinkAdded] {
            let message = NewMessage::new(event_type, "system").into_message(Utc::now()).expect("valid");
            sender.deliver(message).expect("open mailbox");
        }
        assert_eq!(sender.depth(), 2);

        let first = receiver.recv().await.expect("first message");
        assert_eq!(first.event_type, EventType::SessionStarted);
        assert_eq!(sender.depth(), 1);
    }

    #[tokio::test]
    async fn delivery_to_dropped_receiver_fails() {
        let (sender, receiver) = mailbox();
        drop(receiver);

        let message =
            NewMessage::new(EventType::DrinkAdded, "system").into_message(Utc::now()).expect("valid");
        assert_eq!(sender.deliver(message), Err(MailboxClosed));
        assert_eq!(sender.depth(), 0);
    }
}
