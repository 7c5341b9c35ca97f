//! Single-slot fan-out to the observer connection.
//!
//! At most one observer is attached at a time; a new attachment replaces
//! the old one. Publishing is fire-and-forget so a slow or absent
//! observer never stalls the call path.

use tokio::sync::mpsc;
use tracing::debug;

use super::protocol::ObserverUpdate;

const OBSERVER_QUEUE_DEPTH: usize = 256;

#[derive(Clone, Default)]
pub struct ObserverHub {
    sender: std::sync::Arc<std::sync::Mutex<Option<mpsc::Sender<ObserverUpdate>>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new observer, displacing any previous one. Dropping
    /// the previous sender closes the old observer's update stream.
    pub fn attach(&self) -> mpsc::Receiver<ObserverUpdate> {
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE_DEPTH);
        let mut slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if slot.replace(tx).is_some() {
            debug!("Replacing previously attached observer");
        }
        rx
    }

    /// Sends an update to the attached observer, if any. Updates to a
    /// full queue are dropped; a closed receiver clears the slot.
    pub fn publish(&self, update: ObserverUpdate) {
        let mut slot = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = slot.as_ref() else {
            return;
        };
        match tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *slot = None;
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Observer queue full, dropping update");
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn update() -> ObserverUpdate {
        ObserverUpdate::Media {
            session_id: Uuid::new_v4(),
            event: "media".to_string(),
            stream_sid: None,
            sequence: None,
        }
    }

    #[tokio::test]
    async fn attached_observer_receives_updates() {
        let hub = ObserverHub::new();
        let mut rx = hub.attach();
        hub.publish(update());
        let received = rx.recv().await.unwrap();
        match received {
            ObserverUpdate::Media { event, .. } => assert_eq!(event, "media"),
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_attachment_displaces_the_old_observer() {
        let hub = ObserverHub::new();
        let mut old_rx = hub.attach();
        let mut new_rx = hub.attach();

        hub.publish(update());
        assert!(new_rx.recv().await.is_some());
        // The old receiver's sender was dropped at attach time.
        assert!(old_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_an_observer_is_a_no_op() {
        let hub = ObserverHub::new();
        hub.publish(update());
        assert!(!hub.is_attached());
    }

    #[tokio::test]
    async fn publish_after_receiver_dropped_clears_the_slot() {
        let hub = ObserverHub::new();
        let rx = hub.attach();
        drop(rx);
        assert!(hub.is_attached());
        hub.publish(update());
        assert!(!hub.is_attached());
    }
}
