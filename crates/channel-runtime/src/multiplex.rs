use std::sync::Arc;

use channel_core::{SessionEvent, TopicId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::router::{EventRouter, Subscription};

/// Topic-scoped sub-stream with automatic subscribe/unsubscribe control
/// events.
///
/// Creating the stream sends a topic-subscribe control event through the
/// outbound dispatch queue; dropping it (or calling
/// [`TopicStream::unsubscribe`]) sends the matching topic-unsubscribe.
/// Concurrent streams for the same topic each send their own control events;
/// there is no reference counting.
pub struct TopicStream {
    topic: TopicId,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    subscription: Option<Subscription>,
    emit_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl TopicStream {
    pub(crate) fn attach(
        router: &Arc<EventRouter>,
        emit_tx: mpsc::UnboundedSender<SessionEvent>,
        topic: TopicId,
    ) -> Self {
        let (deliver, events) = mpsc::unbounded_channel();
        let filter_topic = topic.clone();
        let subscription = router.subscribe(
            move |event| event.topic_id.as_ref() == Some(&filter_topic),
            move |event| {
                let _ = deliver.send(event);
            },
        );

        debug!(topic = %topic, "subscribing to topic");
        let _ = emit_tx.send(SessionEvent::topic_subscribe(topic.clone()));

        Self {
            topic,
            events,
            subscription: Some(subscription),
            emit_tx,
        }
    }

    /// Topic this stream is scoped to.
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Next event delivered for this topic.
    ///
    /// `None` once the stream is detached and drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Detach now and send the topic-unsubscribe control event.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!(topic = %self.topic, "unsubscribing from topic");
            let _ = self
                .emit_tx
                .send(SessionEvent::topic_unsubscribe(self.topic.clone()));
        }
    }
}

impl Drop for TopicStream {
    fn drop(&mut self) {
        self.detach();
    }
}
