use std::path::Path;

use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use time::OffsetDateTime;

use crate::error::StoreError;
use crate::ports::store::{
    Expanded, NotificationStore, PrunedSubscriber, QueueStore, SubscriberStore,
};
use crate::types::push::{
    EntryId, Notification, NotificationContent, NotificationId, NotificationState,
    NotificationSummary, PendingDelivery, Subscriber, SubscriberId, SubscriptionKeys,
};

// ---------------------------------------------------------------------------
// Column lists
// ---------------------------------------------------------------------------

const SUBSCRIBER_COLUMNS: &str = "id, endpoint, p256dh, auth";

const NOTIFICATION_COLUMNS: &str =
    "id, title, text, url, icon, scheduled_at, scheduled_nanos, state";

const DELIVERY_COLUMNS: &str = "\
    queue_entries.id AS entry_id, \
    notifications.id AS id, notifications.title AS title, notifications.text AS text, \
    notifications.url AS url, notifications.icon AS icon, \
    notifications.scheduled_at AS scheduled_at, \
    notifications.scheduled_nanos AS scheduled_nanos, notifications.state AS state, \
    subscribers.id AS subscriber_id, subscribers.endpoint AS endpoint, \
    subscribers.p256dh AS p256dh, subscribers.auth AS auth";

const RETIRE_DRAINED: &str = "\
    DELETE FROM notifications \
    WHERE state = 'queued' \
      AND NOT EXISTS ( \
          SELECT 1 FROM queue_entries \
          WHERE queue_entries.notification_id = notifications.id) \
    RETURNING id";

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    id: i64,
    endpoint: String,
    p256dh: String,
    auth: String,
}

impl From<SubscriberRow> for Subscriber {
    fn from(row: SubscriberRow) -> Self {
        Subscriber {
            id: SubscriberId(row.id as u64),
            endpoint: row.endpoint,
            p256dh: row.p256dh,
            auth: row.auth,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    title: String,
    text: String,
    url: String,
    icon: String,
    scheduled_at: i64,
    scheduled_nanos: i64,
    state: String,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, StoreError> {
        let scheduled_at = OffsetDateTime::from_unix_timestamp(row.scheduled_at)
            .ok()
            .and_then(|at| {
                at.replace_nanosecond(u32::try_from(row.scheduled_nanos).ok()?)
                    .ok()
            })
            .ok_or_else(|| {
                StoreError::Corrupt(format!("notification {} has an invalid time", row.id))
            })?;
        let state = match row.state.as_str() {
            "pending" => NotificationState::Pending,
            "queued" => NotificationState::Queued,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "notification {} has unknown state '{other}'",
                    row.id
                )));
            }
        };
        Ok(Notification {
            id: NotificationId(row.id as u64),
            content: NotificationContent {
                title: row.title,
                text: row.text,
                url: row.url,
                icon: row.icon,
            },
            scheduled_at,
            state,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    #[sqlx(flatten)]
    notification: NotificationRow,
    remaining: i64,
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    entry_id: i64,
    #[sqlx(flatten)]
    notification: NotificationRow,
    subscriber_id: i64,
    endpoint: String,
    p256dh: String,
    auth: String,
}

impl TryFrom<DeliveryRow> for PendingDelivery {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, StoreError> {
        Ok(PendingDelivery {
            entry: EntryId(row.entry_id as u64),
            notification: row.notification.try_into()?,
            subscriber: Subscriber {
                id: SubscriberId(row.subscriber_id as u64),
                endpoint: row.endpoint,
                p256dh: row.p256dh,
                auth: row.auth,
            },
        })
    }
}

fn db_id(id: u64) -> i64 {
    id as i64
}

fn time_columns(at: OffsetDateTime) -> (i64, i64) {
    (at.unix_timestamp(), i64::from(at.nanosecond()))
}

async fn retire_drained_in(conn: &mut SqliteConnection) -> Result<Vec<NotificationId>, StoreError> {
    let mut retired: Vec<NotificationId> = sqlx::query_scalar::<_, i64>(RETIRE_DRAINED)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|id| NotificationId(id as u64))
        .collect();
    retired.sort();
    Ok(retired)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Subscribers, notifications and the delivery queue in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies pending
    /// migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let store = Self::connect(options).await?;
        tracing::info!(path = %path.display(), "opened store");
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) async fn in_memory() -> Result<Self, StoreError> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::connect(options).await
    }

    /// A single long-lived connection: transactions never interleave, and an
    /// in-memory database survives as long as the pool.
    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    /// Waits for open connections to finish and closes them. Every later call
    /// fails.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl SubscriberStore for SqliteStore {
    async fn upsert_subscriber(
        &self,
        endpoint: &str,
        keys: &SubscriptionKeys,
    ) -> Result<Subscriber, StoreError> {
        let query = format!(
            "INSERT INTO subscribers (endpoint, p256dh, auth) VALUES (?, ?, ?) \
             ON CONFLICT (endpoint) DO UPDATE SET \
                 p256dh = excluded.p256dh, \
                 auth = excluded.auth \
             RETURNING {SUBSCRIBER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SubscriberRow>(&query)
            .bind(endpoint)
            .bind(&keys.p256dh)
            .bind(&keys.auth)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn find_subscriber(&self, endpoint: &str) -> Result<Option<Subscriber>, StoreError> {
        let query = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE endpoint = ?");
        let row = sqlx::query_as::<_, SubscriberRow>(&query)
            .bind(endpoint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Subscriber::from))
    }

    async fn all_subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        let query = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers ORDER BY id");
        let rows = sqlx::query_as::<_, SubscriberRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Subscriber::from).collect())
    }

    async fn subscriber_count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn prune_subscriber(
        &self,
        id: SubscriberId,
    ) -> Result<Option<PrunedSubscriber>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let entries: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE subscriber_id = ?")
                .bind(db_id(id.0))
                .fetch_one(&mut *tx)
                .await?;
        // Entries go with the subscriber through the foreign key.
        let query = format!("DELETE FROM subscribers WHERE id = ? RETURNING {SUBSCRIBER_COLUMNS}");
        let Some(row) = sqlx::query_as::<_, SubscriberRow>(&query)
            .bind(db_id(id.0))
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let completed = retire_drained_in(&mut tx).await?;
        tx.commit().await?;
        Ok(Some(PrunedSubscriber {
            subscriber: row.into(),
            entries: entries as u64,
            completed,
        }))
    }
}

impl NotificationStore for SqliteStore {
    async fn insert_notification(
        &self,
        content: &NotificationContent,
        scheduled_at: OffsetDateTime,
    ) -> Result<Notification, StoreError> {
        let (seconds, nanos) = time_columns(scheduled_at);
        let query = format!(
            "INSERT INTO notifications \
                 (title, text, url, icon, scheduled_at, scheduled_nanos, state) \
             VALUES (?, ?, ?, ?, ?, ?, 'pending') \
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(&content.title)
            .bind(&content.text)
            .bind(&content.url)
            .bind(&content.icon)
            .bind(seconds)
            .bind(nanos)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    async fn delete_notification(&self, id: NotificationId) -> Result<Option<u64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let entries: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE notification_id = ?")
                .bind(db_id(id.0))
                .fetch_one(&mut *tx)
                .await?;
        let deleted = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(db_id(id.0))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(entries as u64))
    }

    async fn notifications(&self) -> Result<Vec<NotificationSummary>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS}, \
                 (SELECT COUNT(*) FROM queue_entries \
                  WHERE queue_entries.notification_id = notifications.id) AS remaining \
             FROM notifications \
             ORDER BY scheduled_at, scheduled_nanos, id"
        );
        sqlx::query_as::<_, SummaryRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(NotificationSummary {
                    notification: row.notification.try_into()?,
                    remaining: row.remaining as usize,
                })
            })
            .collect()
    }

    async fn earliest_due(&self) -> Result<Option<OffsetDateTime>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             ORDER BY scheduled_at, scheduled_nanos LIMIT 1"
        );
        let row = sqlx::query_as::<_, NotificationRow>(&query)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Notification::try_from(row).map(|notification| notification.scheduled_at))
            .transpose()
    }

    async fn expand_due(&self, now: OffsetDateTime) -> Result<Vec<Expanded>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE state = 'pending' AND scheduled_at <= ? \
             ORDER BY scheduled_at, scheduled_nanos, id"
        );
        let rows = sqlx::query_as::<_, NotificationRow>(&query)
            .bind(now.unix_timestamp())
            .fetch_all(&mut *tx)
            .await?;

        let mut expanded = Vec::new();
        for row in rows {
            let notification = Notification::try_from(row)?;
            if !notification.is_due(now) {
                continue;
            }
            let entries = sqlx::query(
                "INSERT OR IGNORE INTO queue_entries (notification_id, subscriber_id) \
                 SELECT ?, id FROM subscribers ORDER BY id",
            )
            .bind(db_id(notification.id.0))
            .execute(&mut *tx)
            .await?
            .rows_affected();
            sqlx::query("UPDATE notifications SET state = 'queued' WHERE id = ?")
                .bind(db_id(notification.id.0))
                .execute(&mut *tx)
                .await?;
            expanded.push(Expanded {
                notification: notification.id,
                entries,
            });
        }
        tx.commit().await?;
        Ok(expanded)
    }

    async fn retire_drained(&self) -> Result<Vec<NotificationId>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        retire_drained_in(&mut conn).await
    }
}

impl QueueStore for SqliteStore {
    async fn next_batch(&self, limit: usize) -> Result<Vec<PendingDelivery>, StoreError> {
        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM queue_entries \
             JOIN notifications ON notifications.id = queue_entries.notification_id \
             JOIN subscribers ON subscribers.id = queue_entries.subscriber_id \
             ORDER BY queue_entries.id \
             LIMIT ?"
        );
        sqlx::query_as::<_, DeliveryRow>(&query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PendingDelivery::try_from)
            .collect()
    }

    async fn complete_entry(&self, id: EntryId) -> Result<Option<NotificationId>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let notification: Option<i64> =
            sqlx::query_scalar("DELETE FROM queue_entries WHERE id = ? RETURNING notification_id")
                .bind(db_id(id.0))
                .fetch_optional(&mut *tx)
                .await?;
        let Some(notification) = notification else {
            return Ok(None);
        };
        let retired = sqlx::query(
            "DELETE FROM notifications \
             WHERE id = ? AND state = 'queued' \
               AND NOT EXISTS (SELECT 1 FROM queue_entries WHERE notification_id = ?)",
        )
        .bind(notification)
        .bind(notification)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        tx.commit().await?;
        Ok(retired.then_some(NotificationId(notification as u64)))
    }
}

#[cfg(test)]
impl SqliteStore {
    pub(crate) async fn insert_entry(
        &self,
        notification: NotificationId,
        subscriber: SubscriberId,
    ) -> Result<Option<EntryId>, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT OR IGNORE INTO queue_entries (notification_id, subscriber_id) \
             VALUES (?, ?) RETURNING id",
        )
        .bind(db_id(notification.0))
        .bind(db_id(subscriber.0))
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(|id| EntryId(id as u64)))
    }

    pub(crate) async fn mark_queued(&self, id: NotificationId) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET state = 'queued' WHERE id = ?")
            .bind(db_id(id.0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(crate) async fn entry_count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub(crate) async fn entries_for(&self, id: NotificationId) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE notification_id = ?")
                .bind(db_id(id.0))
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}
