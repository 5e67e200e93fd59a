use crate::adapters::{HttpDispatcher, TokioTimeProvider};
use crate::config::PushConfig;
use crate::error::{NotificationError, StartupError, StoreError};
use crate::ports;
use crate::store::SqliteStore;
use crate::types::push::{
    NewNotification, NotificationId, NotificationSummary, Subscriber, Subscription,
};

pub mod crypto;
pub mod dispatch;
pub mod keys;
pub mod scheduler;
pub mod vapid;

use std::path::Path;
use std::sync::Arc;

pub use keys::ServerIdentity;
pub use scheduler::{Created, RunReport, Scheduler};
pub use vapid::{AuthToken, AuthTokenIssuer};

pub type DefaultPushService = PushService<TokioTimeProvider, HttpDispatcher, SqliteStore>;

/// Everything the HTTP layer needs: subscriber bookkeeping, notification
/// administration and the server's public key.
pub struct PushService<T, D, S> {
    identity: Arc<ServerIdentity>,
    store: Arc<S>,
    scheduler: Scheduler<T, D, S>,
}

impl<T, D, S> Clone for PushService<T, D, S> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            store: Arc::clone(&self.store),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, D, S> PushService<T, D, S>
where
    T: ports::TimeProvider,
    D: ports::PushDispatcher,
    S: ports::PushStore,
{
    pub fn new(
        time: T,
        dispatcher: D,
        store: Arc<S>,
        identity: Arc<ServerIdentity>,
        config: PushConfig,
    ) -> Self {
        let issuer = AuthTokenIssuer::new(Arc::clone(&identity), &config.contact_email);
        let scheduler = Scheduler::new(time, dispatcher, Arc::clone(&store), issuer, config);
        Self {
            identity,
            store,
            scheduler,
        }
    }

    pub async fn start(&self) {
        self.scheduler.start().await;
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// Uncompressed application server key, as `PushManager.subscribe` wants it.
    pub fn public_key(&self) -> &[u8] {
        self.identity.public_key_uncompressed()
    }

    pub async fn subscribe(&self, subscription: &Subscription) -> Result<Subscriber, StoreError> {
        self.scheduler.subscribe(subscription).await
    }

    pub async fn unsubscribe(&self, endpoint: &str) -> Result<bool, StoreError> {
        self.scheduler.unsubscribe(endpoint).await
    }

    pub async fn is_subscribed(&self, endpoint: &str) -> Result<bool, StoreError> {
        Ok(self.store.find_subscriber(endpoint).await?.is_some())
    }

    pub async fn subscriber_count(&self) -> Result<usize, StoreError> {
        self.store.subscriber_count().await
    }

    pub async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Created, NotificationError> {
        self.scheduler.create_notification(notification).await
    }

    pub async fn notifications(&self) -> Result<Vec<NotificationSummary>, StoreError> {
        self.store.notifications().await
    }

    pub async fn delete_notification(&self, id: NotificationId) -> Result<(), NotificationError> {
        self.scheduler.delete_notification(id).await
    }
}

/// Loads (or creates) the server key pair under `data_dir` and starts the
/// delivery timer over `store`.
pub async fn start(
    config: &PushConfig,
    data_dir: &Path,
    store: Arc<SqliteStore>,
) -> Result<DefaultPushService, StartupError> {
    let identity = Arc::new(ServerIdentity::load_or_generate(data_dir)?);
    let dispatcher = HttpDispatcher::new(config.send_timeout)?;
    let service = PushService::new(
        TokioTimeProvider,
        dispatcher,
        store,
        identity,
        config.clone(),
    );
    service.start().await;
    tracing::info!(contact = %config.contact_email, "push delivery started");
    Ok(service)
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::ports::NotificationStore;
    use crate::types::push::{DeliveryOutcome, DeliveryRequest, NotificationContent, SubscriptionKeys};
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    #[derive(Clone, Default)]
    struct NullDispatcher;

    impl ports::PushDispatcher for NullDispatcher {
        type Fut<'a>
            = std::future::Ready<DeliveryOutcome>
        where
            Self: 'a;

        fn send<'a>(&'a self, _request: &'a DeliveryRequest) -> Self::Fut<'a> {
            std::future::ready(DeliveryOutcome::Success)
        }
    }

    async fn service() -> (
        tempfile::TempDir,
        Arc<SqliteStore>,
        PushService<TokioTimeProvider, NullDispatcher, SqliteStore>,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = Arc::new(ServerIdentity::load_or_generate(dir.path()).expect("identity"));
        let store = Arc::new(SqliteStore::in_memory().await.expect("store"));
        let service = PushService::new(
            TokioTimeProvider,
            NullDispatcher,
            Arc::clone(&store),
            identity,
            PushConfig::default(),
        );
        (dir, store, service)
    }

    fn subscription(endpoint: &str) -> Subscription {
        Subscription {
            endpoint: endpoint.to_string(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "BPk".to_string(),
                auth: "c2Vj".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn subscribe__should_count_each_endpoint_once() {
        // Given
        let (_dir, _store, service) = service().await;

        // When
        service
            .subscribe(&subscription("https://push.example/a"))
            .await
            .expect("subscribe");
        service
            .subscribe(&subscription("https://push.example/a"))
            .await
            .expect("subscribe again");
        service
            .subscribe(&subscription("https://push.example/b"))
            .await
            .expect("subscribe");

        // Then
        assert_eq!(service.subscriber_count().await.expect("count"), 2);
        assert!(
            service
                .is_subscribed("https://push.example/a")
                .await
                .expect("check")
        );
        assert!(
            !service
                .is_subscribed("https://push.example/c")
                .await
                .expect("check")
        );
    }

    #[tokio::test]
    async fn notifications__should_report_remaining_entries() {
        // Given
        let (_dir, store, service) = service().await;
        let a = service
            .subscribe(&subscription("https://push.example/a"))
            .await
            .expect("subscribe");
        let b = service
            .subscribe(&subscription("https://push.example/b"))
            .await
            .expect("subscribe");
        let at = OffsetDateTime::parse("2025-01-12T09:30:00Z", &Rfc3339).expect("parse at");
        let content = NotificationContent {
            title: "Title".to_string(),
            text: "Body".to_string(),
            url: "https://example.org".to_string(),
            icon: "bell.png".to_string(),
        };
        let queued = store
            .insert_notification(&content, at)
            .await
            .expect("insert");
        store.insert_entry(queued.id, a.id).await.expect("entry");
        store.insert_entry(queued.id, b.id).await.expect("entry");
        store
            .insert_notification(&content, at + time::Duration::hours(1))
            .await
            .expect("insert");

        // When
        let summaries = service.notifications().await.expect("list");

        // Then
        let remaining: Vec<_> = summaries.iter().map(|summary| summary.remaining).collect();
        assert_eq!(remaining, vec![2, 0]);
        let json = serde_json::to_value(&summaries[0]).expect("json");
        assert_eq!(json["remaining"], 2);
        assert_eq!(json["state"], "pending");
        assert_eq!(json["dateTime"], "2025-01-12T09:30:00Z");
    }

    #[tokio::test]
    async fn public_key__should_expose_uncompressed_point() {
        // Given
        let (_dir, _store, service) = service().await;

        // Then
        assert_eq!(service.public_key().len(), 65);
        assert_eq!(service.public_key()[0], 0x04);
    }
}
