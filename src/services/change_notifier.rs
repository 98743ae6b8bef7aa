use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::authz::scope::Scope;

/// Per-scope backlog. A subscriber that falls further behind than this
/// sees a lag notice on its receiver and keeps going with newer events.
pub const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Notebook,
    Source,
    Organization,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One committed mutation, addressed to exactly one scope. Carries ids
/// only; subscribers re-fetch through the store, which re-checks access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub scope: Scope,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub op: ChangeOp,
}

/// Fan-out of change events, one broadcast channel per scope. Channels
/// are created on first subscribe and dropped once the last receiver is
/// gone; publishing into a scope nobody watches is a no-op.
#[derive(Default)]
pub struct ChangeNotifier {
    channels: DashMap<Scope, broadcast::Sender<ChangeEvent>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, scope: Scope) -> broadcast::Receiver<ChangeEvent> {
        self.channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Delivery to every live subscriber of the event's scope. The event
    /// is published after the mutation committed, so a subscriber may
    /// see the new state before the event arrives, never the reverse
    /// claim that a delivered event precedes its commit.
    pub fn publish(&self, event: ChangeEvent) {
        let mut dead = false;
        if let Some(tx) = self.channels.get(&event.scope) {
            if tx.receiver_count() == 0 {
                dead = true;
            } else if let Err(err) = tx.send(event) {
                tracing::warn!(?err, "change event dropped, all receivers gone");
                dead = true;
            }
        }
        if dead {
            self.channels
                .remove_if(&event.scope, |_, tx| tx.receiver_count() == 0);
        }
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(scope: Scope) -> ChangeEvent {
        ChangeEvent {
            scope,
            entity: EntityKind::Notebook,
            entity_id: Uuid::new_v4(),
            op: ChangeOp::Insert,
        }
    }

    #[tokio::test]
    async fn events_reach_only_their_scope() {
        let notifier = ChangeNotifier::new();
        let org_scope = Scope::organization(Uuid::new_v4());
        let personal_scope = Scope::personal(Uuid::new_v4());

        let mut org_rx = notifier.subscribe(org_scope);
        let mut personal_rx = notifier.subscribe(personal_scope);

        let ev = event(org_scope);
        notifier.publish(ev);

        assert_eq!(org_rx.recv().await.unwrap(), ev);
        assert!(matches!(
            personal_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_noop() {
        let notifier = ChangeNotifier::new();
        notifier.publish(event(Scope::personal(Uuid::new_v4())));
        assert_eq!(notifier.channel_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_channels_are_pruned_on_publish() {
        let notifier = ChangeNotifier::new();
        let scope = Scope::organization(Uuid::new_v4());
        let rx = notifier.subscribe(scope);
        drop(rx);
        assert_eq!(notifier.channel_count(), 1);

        notifier.publish(event(scope));
        assert_eq!(notifier.channel_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let notifier = ChangeNotifier::new();
        let scope = Scope::personal(Uuid::new_v4());
        let mut rx = notifier.subscribe(scope);

        for _ in 0..(CHANNEL_CAPACITY + 8) {
            notifier.publish(event(scope));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        // The receiver resumes at the oldest retained event.
        assert!(rx.recv().await.is_ok());
    }
}
