use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(SubscriberId);
id_type!(NotificationId);
id_type!(EntryId);

/// Key material a browser hands out when it subscribes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Body of the browser's `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub endpoint: String,
    #[serde(default)]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub text: String,
    pub url: String,
    pub icon: String,
}

/// A notification as submitted by an administrator. Without `dateTime` it is
/// sent right away and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    #[serde(flatten)]
    pub content: NotificationContent,
    #[serde(
        rename = "dateTime",
        default,
        with = "time::serde::rfc3339::option"
    )]
    pub scheduled_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    /// Stored, not yet expanded into queue entries.
    Pending,
    /// Expanded; waits for its queue entries to resolve.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(flatten)]
    pub content: NotificationContent,
    #[serde(rename = "dateTime", with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub state: NotificationState,
}

impl Notification {
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.scheduled_at <= now
    }
}

/// A stored notification and the number of deliveries still outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationSummary {
    #[serde(flatten)]
    pub notification: Notification,
    pub remaining: usize,
}

/// A queue entry joined with what it takes to deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub entry: EntryId,
    pub notification: Notification,
    pub subscriber: Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Transient failure; the entry stays queued for the next run.
    Retry,
    /// The endpoint is gone for good; its subscriber gets pruned.
    Fail,
}

/// One encrypted message ready to be POSTed to a push endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub endpoint: String,
    pub body: Vec<u8>,
    pub authorization: String,
    pub ttl_seconds: u32,
}

/// What the service worker receives after decryption.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload<'a> {
    pub id: Option<NotificationId>,
    pub title: &'a str,
    pub text: &'a str,
    pub url: &'a str,
    pub icon: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    pub date_time: OffsetDateTime,
}

impl<'a> PushPayload<'a> {
    pub fn new(
        id: Option<NotificationId>,
        content: &'a NotificationContent,
        date_time: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            title: &content.title,
            text: &content.text,
            url: &content.url,
            icon: &content.icon,
            date_time,
        }
    }

    /// The service worker runs `JSON.parse(event.data.json())`, so the
    /// object travels as a JSON string literal.
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        let object = serde_json::to_string(self)?;
        serde_json::to_string(&object)
    }
}
