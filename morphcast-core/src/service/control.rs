//! Channel-backed virtual-session sink
//!
//! Control events are queued on a bounded channel whose receiving half belongs
//! to whatever drives the virtual session. A full queue drops the event.

use tokio::sync::mpsc;
use tracing::warn;

use super::VirtualSessionSink;
use crate::{models::ControlEvent, Error, Result};

pub struct ChannelControlSink {
    tx: mpsc::Sender<ControlEvent>,
}

impl ChannelControlSink {
    /// Create a sink and the receiver the backend consumes from
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ControlEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl VirtualSessionSink for ChannelControlSink {
    fn submit(&self, event: ControlEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => {
                warn!(
                    session_id = %event.session_id,
                    tag = %event.tag,
                    "Virtual-session queue full, dropping control event"
                );
                Error::Internal("virtual-session queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Internal("virtual-session backend gone".to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionId;

    fn event(tag: &str) -> ControlEvent {
        ControlEvent {
            session_id: SessionId::from("s1"),
            tag: tag.to_string(),
            data: String::new(),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = ChannelControlSink::new(4);
        sink.submit(event("KEYDOWN")).unwrap();
        sink.submit(event("KEYUP")).unwrap();

        assert_eq!(rx.recv().await.unwrap().tag, "KEYDOWN");
        assert_eq!(rx.recv().await.unwrap().tag, "KEYUP");
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (sink, _rx) = ChannelControlSink::new(1);
        sink.submit(event("A")).unwrap();
        assert!(sink.submit(event("B")).is_err());
    }

    #[test]
    fn test_closed_backend_is_reported() {
        let (sink, rx) = ChannelControlSink::new(1);
        drop(rx);
        assert!(matches!(sink.submit(event("A")), Err(Error::Internal(_))));
    }
}
