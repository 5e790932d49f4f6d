//! Minimal actor plumbing: a typed mailbox address and the [Actor] trait.

use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug)]
pub struct Addr<Message> {
    sender: mpsc::Sender<Message>,
}

// Derived `Clone` would require `Message: Clone`.
impl<Message> Clone for Addr<Message> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<Message> Addr<Message> {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Delivers `message`, waiting for mailbox room.
    ///
    /// Returns `false` when the actor behind this address is gone.
    pub async fn send_message(&self, message: Message) -> bool {
        self.sender.send(message).await.is_ok()
    }

    /// Delivers `message` only if the mailbox has room right now.
    pub fn try_send_message(&self, message: Message) -> Result<(), TrySendError<Message>> {
        self.sender.try_send(message)
    }
}

/// Creates a mailbox with room for `capacity` messages.
pub fn mailbox<Message>(capacity: usize) -> (Addr<Message>, mpsc::Receiver<Message>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Addr::new(sender), receiver)
}

pub trait Actor<Message>: Send
where
    Message: Send,
{
    fn get_addr(&self) -> Addr<Message>;
}
