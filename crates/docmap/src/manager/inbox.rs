//! Callback inbox: a channel that drains service messages into the manager.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::job_manager::JobManager;
use crate::extraction::{ExtractionError, ServiceMessage};

/// Sending side of the callback inbox. Cheap to clone.
#[derive(Clone)]
pub struct CallbackInbox {
    sender: mpsc::Sender<ServiceMessage>,
}

impl CallbackInbox {
    /// Starts the drain loop. The task ends once every inbox clone is dropped
    /// and yields the number of messages it handled.
    pub fn spawn(manager: JobManager, capacity: usize) -> (Self, JoinHandle<usize>) {
        let (sender, mut receiver) = mpsc::channel::<ServiceMessage>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut handled = 0usize;
            while let Some(message) = receiver.recv().await {
                let outcome = manager.handle_message(message);
                log::trace!("Callback message handled: {:?}", outcome);
                handled += 1;
            }
            log::debug!("Callback inbox closed after {} messages", handled);
            handled
        });

        (Self { sender }, handle)
    }

    /// Queues a decoded message.
    pub async fn deliver(&self, message: ServiceMessage) -> Result<(), ExtractionError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ExtractionError::Unavailable("callback inbox closed".to_string()))
    }

    /// Decodes a raw JSON callback body and queues it.
    pub async fn deliver_json(&self, body: &[u8]) -> Result<(), ExtractionError> {
        let message = ServiceMessage::from_slice(body)?;
        self.deliver(message).await
    }
}
