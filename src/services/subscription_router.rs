use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_stream::Stream;
use uuid::Uuid;

use crate::authz::guard::{Action, AuthorizationGuard};
use crate::authz::scope::{Scope, ScopeResolver};
use crate::db::organization_repository::OrganizationRepository;
use crate::error::CoreError;
use crate::services::change_notifier::{ChangeEvent, ChangeNotifier};

/// How often a quiet subscription re-checks that the caller still has
/// access to its scope. Event delivery re-checks on every event, so this
/// only bounds how long a revoked but silent subscription can linger.
pub const REVALIDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Identifies one authenticated session. Minted at login and carried in
/// the session token, so two browser tabs of the same login share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionMessage {
    Change(ChangeEvent),
    /// Terminal: the caller lost access to the scope. The stream ends
    /// right after this message.
    ScopeRevoked,
}

struct ActiveSubscription {
    subscription_id: Uuid,
    close: watch::Sender<bool>,
}

/// Hands out change streams, at most one per session. Opening a new
/// subscription closes the session's previous one, and access to the
/// scope is re-validated for the stream's whole lifetime.
pub struct SubscriptionRouter {
    resolver: ScopeResolver,
    guard: AuthorizationGuard,
    notifier: Arc<ChangeNotifier>,
    active: Arc<DashMap<SessionId, ActiveSubscription>>,
}

/// Removes the registry entry when the stream is dropped, but only if the
/// entry still belongs to this subscription; a replacement made by a
/// newer subscribe call must survive the old stream's teardown.
struct Deregister {
    active: Arc<DashMap<SessionId, ActiveSubscription>>,
    session: SessionId,
    subscription_id: Uuid,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.active
            .remove_if(&self.session, |_, sub| {
                sub.subscription_id == self.subscription_id
            });
    }
}

impl SubscriptionRouter {
    pub fn new(
        organizations: Arc<dyn OrganizationRepository>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        Self {
            resolver: ScopeResolver::new(organizations.clone()),
            guard: AuthorizationGuard::new(organizations),
            notifier,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Opens the session's change stream for one scope. The caller must
    /// currently have read access; afterwards the stream re-checks on
    /// every delivered event and on a timer, emits `ScopeRevoked` and
    /// ends the moment access is gone. Events published while a slow
    /// consumer lags beyond the backlog are skipped, never reordered.
    pub async fn subscribe(
        &self,
        session: SessionId,
        caller: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<impl Stream<Item = SubscriptionMessage> + Send + 'static, CoreError> {
        let scope = self.resolver.resolve(caller, organization_id).await?;
        self.guard.can_read(caller, scope).await?;

        let subscription_id = Uuid::new_v4();
        let (close_tx, mut close_rx) = watch::channel(false);
        if let Some(previous) = self.active.insert(
            session,
            ActiveSubscription {
                subscription_id,
                close: close_tx,
            },
        ) {
            let _ = previous.close.send(true);
        }

        let mut events = self.notifier.subscribe(scope);
        let guard = self.guard.clone();
        let deregister = Deregister {
            active: self.active.clone(),
            session,
            subscription_id,
        };

        Ok(stream! {
            let _deregister = deregister;
            let mut revalidate = tokio::time::interval(REVALIDATE_INTERVAL);
            revalidate.tick().await;

            loop {
                tokio::select! {
                    _ = close_rx.changed() => break,
                    _ = revalidate.tick() => {
                        match guard.decide(caller, scope, Action::Read).await {
                            Ok(Ok(())) => {}
                            Ok(Err(reason)) => {
                                tracing::info!(?reason, ?scope, "subscription revoked");
                                yield SubscriptionMessage::ScopeRevoked;
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(?err, "subscription re-validation failed, keeping stream");
                            }
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => {
                            match guard.decide(caller, scope, Action::Read).await {
                                Ok(Ok(())) => yield SubscriptionMessage::Change(event),
                                Ok(Err(reason)) => {
                                    tracing::info!(?reason, ?scope, "subscription revoked");
                                    yield SubscriptionMessage::ScopeRevoked;
                                    break;
                                }
                                Err(err) => {
                                    tracing::warn!(?err, "access re-check failed, dropping event");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, ?scope, "subscriber lagged, resuming at backlog");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Closes the session's subscription, if any.
    pub fn unsubscribe(&self, session: SessionId) {
        if let Some((_, sub)) = self.active.remove(&session) {
            let _ = sub.close.send(true);
        }
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }
}
