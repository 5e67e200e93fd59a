use time::OffsetDateTime;

use crate::error::StoreError;
use crate::types::push::{
    EntryId, Notification, NotificationContent, NotificationId, NotificationSummary,
    PendingDelivery, Subscriber, SubscriberId, SubscriptionKeys,
};

/// A subscriber removed together with its queue entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedSubscriber {
    pub subscriber: Subscriber,
    pub entries: u64,
    /// Notifications deleted because the removed entries were their last.
    pub completed: Vec<NotificationId>,
}

/// A due notification expanded into queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expanded {
    pub notification: NotificationId,
    pub entries: u64,
}

pub trait SubscriberStore: Send + Sync + 'static {
    /// Inserts a subscriber, or replaces the keys of the one already
    /// registered for `endpoint` while keeping its id.
    fn upsert_subscriber(
        &self,
        endpoint: &str,
        keys: &SubscriptionKeys,
    ) -> impl Future<Output = Result<Subscriber, StoreError>> + Send;
    fn find_subscriber(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Option<Subscriber>, StoreError>> + Send;
    fn all_subscribers(&self) -> impl Future<Output = Result<Vec<Subscriber>, StoreError>> + Send;
    fn subscriber_count(&self) -> impl Future<Output = Result<usize, StoreError>> + Send;
    /// Deletes the subscriber and its entries, then every expanded
    /// notification left without entries. One transaction.
    fn prune_subscriber(
        &self,
        id: SubscriberId,
    ) -> impl Future<Output = Result<Option<PrunedSubscriber>, StoreError>> + Send;
}

pub trait NotificationStore: Send + Sync + 'static {
    fn insert_notification(
        &self,
        content: &NotificationContent,
        scheduled_at: OffsetDateTime,
    ) -> impl Future<Output = Result<Notification, StoreError>> + Send;
    /// Deletes a notification with its entries. `None` when it does not
    /// exist, otherwise the number of entries dropped.
    fn delete_notification(
        &self,
        id: NotificationId,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;
    /// Ordered by scheduled time.
    fn notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<NotificationSummary>, StoreError>> + Send;
    /// Earliest scheduled time over every stored notification, expanded or not.
    fn earliest_due(
        &self,
    ) -> impl Future<Output = Result<Option<OffsetDateTime>, StoreError>> + Send;
    /// Queues every `Pending` notification due at `now` for each current
    /// subscriber not already queued for it and marks it `Queued`. One
    /// transaction.
    fn expand_due(
        &self,
        now: OffsetDateTime,
    ) -> impl Future<Output = Result<Vec<Expanded>, StoreError>> + Send;
    /// Deletes every `Queued` notification that has no entries left.
    fn retire_drained(
        &self,
    ) -> impl Future<Output = Result<Vec<NotificationId>, StoreError>> + Send;
}

pub trait QueueStore: Send + Sync + 'static {
    /// Oldest entries first.
    fn next_batch(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<PendingDelivery>, StoreError>> + Send;
    /// Deletes a delivered entry and, when it was the last one, its
    /// notification. Returns the notification if it was retired.
    fn complete_entry(
        &self,
        id: EntryId,
    ) -> impl Future<Output = Result<Option<NotificationId>, StoreError>> + Send;
}

pub trait PushStore: SubscriberStore + NotificationStore + QueueStore {}

impl<T> PushStore for T where T: SubscriberStore + NotificationStore + QueueStore {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

pub trait CredentialVerifier: Send + Sync + 'static {
    fn verify(&self, username: &str, password: &str) -> Option<Principal>;
}
