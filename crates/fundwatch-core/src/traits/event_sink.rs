// # Event Sink Trait
//
// Receives the domain events produced by reconciliation and hands them to
// downstream consumers. Delivery is at-least-once from the consumer's point of
// view: a crash between emitting and persisting a watermark replays the batch.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Error;
use crate::events::CampaignEvent;

/// Trait for event sink implementations
///
/// The reconciler persists a donation, match or milestone as processed only
/// after `emit` returned `Ok`, so an implementation must either hand the
/// event on or fail. Waiting for room is fine; dropping is not.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emit a domain event
    async fn emit(&self, event: CampaignEvent) -> Result<(), Error>;
}

/// Event sink backed by a bounded channel
///
/// A full channel makes `emit` wait for the consumer, which slows the
/// emitting poller down instead of losing events.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<CampaignEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver consumers read from
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CampaignEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: CampaignEvent) -> Result<(), Error> {
        let kind = event.kind();
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::event_sink(format!("event channel closed, {} event not delivered", kind)))
    }
}

/// Sink wrapper that refuses events once its poller has been stopped
///
/// A stopped campaign's in-flight tick fails on its next emit, including one
/// waiting for channel room, so it never goes on to persist what it could
/// not deliver.
pub(crate) struct GatedEventSink {
    inner: Arc<dyn EventSink>,
    token: CancellationToken,
}

impl GatedEventSink {
    pub(crate) fn new(inner: Arc<dyn EventSink>, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

#[async_trait]
impl EventSink for GatedEventSink {
    async fn emit(&self, event: CampaignEvent) -> Result<(), Error> {
        if self.token.is_cancelled() {
            trace!(
                "Poller for {} stopped, refusing {} event",
                event.campaign_id(),
                event.kind()
            );
            return Err(Error::cancelled(event.campaign_id()));
        }

        let campaign_id = event.campaign_id().to_string();
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::cancelled(&campaign_id)),
            result = self.inner.emit(event) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MilestoneReachedEvent;
    use crate::model::Money;

    fn milestone_event() -> CampaignEvent {
        CampaignEvent::MilestoneReached(MilestoneReachedEvent {
            campaign_id: "c1".into(),
            campaign_name: "Campaign".into(),
            milestone_id: "ms1".into(),
            name: "First".into(),
            amount: Money::new("USD", 500.0),
            campaign_amount_raised: Money::new("USD", 520.0),
        })
    }

    #[tokio::test]
    async fn test_full_channel_waits_for_consumer() {
        let (sink, mut rx) = ChannelEventSink::new(1);
        sink.emit(milestone_event()).await.unwrap();

        let pending = tokio::spawn({
            let sink = sink.clone();
            async move { sink.emit(milestone_event()).await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        assert!(rx.recv().await.is_some());
        pending.await.unwrap().unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (sink, rx) = ChannelEventSink::new(1);
        drop(rx);
        assert!(matches!(
            sink.emit(milestone_event()).await,
            Err(Error::EventSink(_))
        ));
    }

    #[tokio::test]
    async fn test_gated_sink_refuses_after_cancel() {
        let (sink, mut rx) = ChannelEventSink::new(8);
        let token = CancellationToken::new();
        let gated = GatedEventSink::new(Arc::new(sink), token.clone());

        gated.emit(milestone_event()).await.unwrap();
        token.cancel();
        assert!(matches!(
            gated.emit(milestone_event()).await,
            Err(Error::Cancelled(_))
        ));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_releases_emit_blocked_on_full_channel() {
        let (sink, _rx) = ChannelEventSink::new(1);
        sink.emit(milestone_event()).await.unwrap();

        let token = CancellationToken::new();
        let gated = Arc::new(GatedEventSink::new(Arc::new(sink), token.clone()));
        let pending = tokio::spawn({
            let gated = gated.clone();
            async move { gated.emit(milestone_event()).await }
        });
        tokio::task::yield_now().await;

        token.cancel();
        assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled(_))));
    }
}
