use crate::form::SubmissionData;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

/// Announces that a notification mail for a submission went out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEvent {
    pub form_name: String,
    pub data: SubmissionData,
}

/// Receives [`SentEvent`]s. Publishing never fails from the caller's point of
/// view.
pub trait SentEventSink: Send + Sync {
    fn publish(&self, event: SentEvent);
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SentEventSink for TracingEventSink {
    fn publish(&self, event: SentEvent) {
        info!(
            "Contact form \"{}\" sent message from {}",
            event.form_name, event.data.email
        );
    }
}

/// Forwards events to whoever holds the receiving end.
#[derive(Debug, Clone)]
pub struct ChannelEventSink(UnboundedSender<SentEvent>);

impl ChannelEventSink {
    pub fn new() -> (Self, UnboundedReceiver<SentEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self(sender), receiver)
    }
}

impl SentEventSink for ChannelEventSink {
    fn publish(&self, event: SentEvent) {
        if self.0.send(event).is_err() {
            debug!("Nobody is listening for sent events");
        }
    }
}
