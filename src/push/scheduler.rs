//! Delivery queue and the timer that drives it.
//!
//! A notification starts out `Pending`. Once it is due, a run expands it into
//! one queue entry per current subscriber and marks it `Queued`; it is deleted
//! as soon as its last entry resolves. Runs, notification changes and
//! unsubscribes all go through one async lock, so a run never races the
//! bookkeeping it depends on.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::config::PushConfig;
use crate::error::{DeliveryError, NotificationError, StoreError};
use crate::ports;
use crate::push::crypto;
use crate::push::vapid::AuthTokenIssuer;
use crate::types::push::{
    DeliveryOutcome, DeliveryRequest, NewNotification, Notification, NotificationContent,
    NotificationId, PendingDelivery, PushPayload, Subscriber, SubscriberId, Subscription,
};

/// Tally of a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Queue entries created for notifications that became due.
    pub created: usize,
    pub attempted: usize,
    pub sent: usize,
    pub retried: usize,
    /// Entries left alone because their subscriber already failed this run.
    pub skipped: usize,
    pub pruned: Vec<SubscriberId>,
    /// Notifications deleted because nothing is left to deliver.
    pub completed: Vec<NotificationId>,
}

/// What became of a newly submitted notification.
#[derive(Debug)]
pub enum Created {
    /// Stored for a later run.
    Scheduled(Notification),
    /// Going out to every current subscriber on a background task.
    Sending(JoinHandle<Result<RunReport, StoreError>>),
}

struct Timer {
    fires_at: OffsetDateTime,
    handle: JoinHandle<()>,
}

pub struct Scheduler<T, D, S> {
    inner: Arc<Inner<T, D, S>>,
}

impl<T, D, S> Clone for Scheduler<T, D, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T, D, S> {
    time: T,
    dispatcher: D,
    store: Arc<S>,
    issuer: AuthTokenIssuer,
    config: PushConfig,
    run_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<Timer>>,
    stopped: AtomicBool,
}

impl<T, D, S> Scheduler<T, D, S>
where
    T: ports::TimeProvider,
    D: ports::PushDispatcher,
    S: ports::PushStore,
{
    pub fn new(
        time: T,
        dispatcher: D,
        store: Arc<S>,
        issuer: AuthTokenIssuer,
        config: PushConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                time,
                dispatcher,
                store,
                issuer,
                config,
                run_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Arms the timer for whatever the store already holds.
    pub async fn start(&self) {
        let _running = self.inner.run_lock.lock().await;
        self.inner.rearm().await;
    }

    /// Stops the timer for good. Runs already in progress finish normally.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.disarm();
    }

    /// When the armed timer fires, if it is armed at all.
    pub fn next_run(&self) -> Option<OffsetDateTime> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|timer| timer.fires_at)
    }

    pub async fn run(&self) -> Result<RunReport, StoreError> {
        self.inner.run().await
    }

    /// Without a time the notification goes out right away on its own task
    /// and is never stored. Otherwise it is stored for a later run.
    pub async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Created, NotificationError> {
        let inner = &self.inner;
        let now = inner.time.now();
        match notification.scheduled_at {
            None => {
                let inner = Arc::clone(inner);
                let content = notification.content;
                let handle = tokio::spawn(async move {
                    let _running = inner.run_lock.lock().await;
                    let report = inner.send_now(&content, now).await?;
                    tracing::info!(
                        attempted = report.attempted,
                        sent = report.sent,
                        pruned = report.pruned.len(),
                        "sent immediate notification"
                    );
                    Ok(report)
                });
                Ok(Created::Sending(handle))
            }
            Some(at) if at < now => Err(NotificationError::ScheduledInPast),
            Some(at) => {
                let _running = inner.run_lock.lock().await;
                let stored = inner
                    .store
                    .insert_notification(&notification.content, at)
                    .await?;
                tracing::info!(notification = %stored.id, scheduled_at = %at, "scheduled notification");
                inner.rearm().await;
                Ok(Created::Scheduled(stored))
            }
        }
    }

    /// Drops a stored notification together with its queue entries.
    pub async fn delete_notification(&self, id: NotificationId) -> Result<(), NotificationError> {
        let inner = &self.inner;
        let _running = inner.run_lock.lock().await;
        let Some(entries) = inner.store.delete_notification(id).await? else {
            return Err(NotificationError::NotFound(id));
        };
        tracing::info!(notification = %id, entries, "deleted notification");
        inner.rearm().await;
        Ok(())
    }

    /// Registers a subscription or refreshes the keys of a known endpoint.
    /// Entries already queued for it pick up the new keys.
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<Subscriber, StoreError> {
        let subscriber = self
            .inner
            .store
            .upsert_subscriber(&subscription.endpoint, &subscription.keys)
            .await?;
        tracing::info!(subscriber = %subscriber.id, endpoint = %subscriber.endpoint, "subscribed");
        Ok(subscriber)
    }

    /// Returns whether `endpoint` was subscribed.
    pub async fn unsubscribe(&self, endpoint: &str) -> Result<bool, StoreError> {
        let inner = &self.inner;
        let _running = inner.run_lock.lock().await;
        let Some(subscriber) = inner.store.find_subscriber(endpoint).await? else {
            return Ok(false);
        };
        inner.prune(subscriber.id).await?;
        tracing::info!(subscriber = %subscriber.id, "unsubscribed");
        Ok(true)
    }
}

impl<T, D, S> Inner<T, D, S>
where
    T: ports::TimeProvider,
    D: ports::PushDispatcher,
    S: ports::PushStore,
{
    async fn run(self: &Arc<Self>) -> Result<RunReport, StoreError> {
        let _running = self.run_lock.lock().await;
        let mut rearm = RearmOnDrop::new(self);
        let result = self.run_locked().await;
        self.rearm().await;
        rearm.done();

        let report = result?;
        tracing::info!(
            created = report.created,
            attempted = report.attempted,
            sent = report.sent,
            retried = report.retried,
            skipped = report.skipped,
            pruned = report.pruned.len(),
            completed = report.completed.len(),
            "delivery run finished"
        );
        Ok(report)
    }

    async fn run_locked(&self) -> Result<RunReport, StoreError> {
        let now = self.time.now();
        let mut report = RunReport::default();
        for expanded in self.store.expand_due(now).await? {
            tracing::info!(
                notification = %expanded.notification,
                entries = expanded.entries,
                "notification due"
            );
            report.created += expanded.entries as usize;
        }
        // Covers expansions that found nobody as well as anything an earlier,
        // interrupted run left drained.
        report.completed = self.store.retire_drained().await?;
        for id in &report.completed {
            tracing::info!(notification = %id, "notification completed");
        }

        let mut failed = BTreeSet::new();
        for delivery in self.store.next_batch(self.config.batch_size).await? {
            let PendingDelivery {
                entry,
                notification,
                subscriber,
            } = delivery;
            if failed.contains(&subscriber.id) {
                tracing::debug!(%entry, subscriber = %subscriber.id, "skipping entry of failed subscriber");
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            let outcome = self
                .deliver(
                    Some(notification.id),
                    &notification.content,
                    notification.scheduled_at,
                    &subscriber,
                )
                .await;
            tracing::info!(
                %entry,
                notification = %notification.id,
                subscriber = %subscriber.id,
                ?outcome,
                "delivery attempted"
            );
            match outcome {
                DeliveryOutcome::Success => {
                    report.sent += 1;
                    if let Some(done) = self.store.complete_entry(entry).await? {
                        tracing::info!(notification = %done, "notification completed");
                        report.completed.push(done);
                    }
                }
                DeliveryOutcome::Fail => {
                    failed.insert(subscriber.id);
                }
                DeliveryOutcome::Retry => report.retried += 1,
            }
        }

        for subscriber in failed {
            report.completed.extend(self.prune(subscriber).await?);
            report.pruned.push(subscriber);
        }
        Ok(report)
    }

    /// Sends to every current subscriber without touching the queue. Gone
    /// subscribers are pruned; transient failures are not retried.
    async fn send_now(
        &self,
        content: &NotificationContent,
        now: OffsetDateTime,
    ) -> Result<RunReport, StoreError> {
        let mut report = RunReport::default();
        for subscriber in self.store.all_subscribers().await? {
            report.attempted += 1;
            match self.deliver(None, content, now, &subscriber).await {
                DeliveryOutcome::Success => report.sent += 1,
                DeliveryOutcome::Fail => {
                    report.completed.extend(self.prune(subscriber.id).await?);
                    report.pruned.push(subscriber.id);
                }
                DeliveryOutcome::Retry => {
                    tracing::warn!(subscriber = %subscriber.id, "immediate delivery not accepted, dropping it");
                    report.retried += 1;
                }
            }
        }
        Ok(report)
    }

    async fn deliver(
        &self,
        id: Option<NotificationId>,
        content: &NotificationContent,
        date_time: OffsetDateTime,
        subscriber: &Subscriber,
    ) -> DeliveryOutcome {
        match self.prepare(id, content, date_time, subscriber) {
            Ok(request) => self.dispatcher.send(&request).await,
            Err(err) => {
                tracing::warn!(subscriber = %subscriber.id, error = %err, "could not prepare push message");
                DeliveryOutcome::Retry
            }
        }
    }

    fn prepare(
        &self,
        id: Option<NotificationId>,
        content: &NotificationContent,
        date_time: OffsetDateTime,
        subscriber: &Subscriber,
    ) -> Result<DeliveryRequest, DeliveryError> {
        let message = PushPayload::new(id, content, date_time).to_message()?;
        let body = crypto::encrypt(
            message.as_bytes(),
            &subscriber.p256dh,
            &subscriber.auth,
            self.config.padding_target,
        )?;
        let token = self.issuer.issue(&subscriber.endpoint)?;
        Ok(DeliveryRequest {
            endpoint: subscriber.endpoint.clone(),
            body,
            authorization: token.header_value(),
            ttl_seconds: self.config.ttl_seconds,
        })
    }

    /// Removes a subscriber with its entries. Returns the notifications that
    /// lost their last entry and were deleted.
    async fn prune(&self, subscriber: SubscriberId) -> Result<Vec<NotificationId>, StoreError> {
        let Some(pruned) = self.store.prune_subscriber(subscriber).await? else {
            return Ok(Vec::new());
        };
        tracing::info!(
            subscriber = %pruned.subscriber.id,
            endpoint = %pruned.subscriber.endpoint,
            entries = pruned.entries,
            "pruned subscriber"
        );
        for id in &pruned.completed {
            tracing::info!(notification = %id, "notification completed");
        }
        Ok(pruned.completed)
    }

    /// Points the timer at the earliest stored notification, or at
    /// `run_delay` from now when the store cannot say.
    async fn rearm(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let now = self.time.now();
        let (delay, fires_at) = match self.store.earliest_due().await {
            Ok(Some(due)) => {
                let delay = compute_delay(now, due, self.config.run_delay);
                (delay, fire_time(now, delay).unwrap_or(due))
            }
            Ok(None) => {
                self.disarm();
                tracing::debug!("nothing scheduled, timer disarmed");
                return;
            }
            Err(err) => {
                tracing::error!(error = %err, "could not determine next run");
                let delay = self.config.run_delay;
                (delay, fire_time(now, delay).unwrap_or(now))
            }
        };
        self.arm(delay, fires_at);
    }

    fn arm(self: &Arc<Self>, delay: Duration, fires_at: OffsetDateTime) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.handle.abort();
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let time = self.time.clone();
        let handle = runtime.spawn(async move {
            time.sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                // Separate task, so re-arming from inside the run cannot
                // abort it.
                tokio::spawn(async move {
                    if let Err(err) = inner.run().await {
                        tracing::error!(error = %err, "delivery run aborted");
                    }
                });
            }
        });
        tracing::info!(next_run = %fires_at, delay_secs = delay.as_secs(), "timer armed");
        *timer = Some(Timer { fires_at, handle });
    }

    fn disarm(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.handle.abort();
        }
    }
}

/// Re-arms the timer from a fresh task if a run never reaches its own
/// re-arm, because it panicked or was cancelled.
struct RearmOnDrop<'a, T, D, S>
where
    T: ports::TimeProvider,
    D: ports::PushDispatcher,
    S: ports::PushStore,
{
    inner: &'a Arc<Inner<T, D, S>>,
    pending: bool,
}

impl<'a, T, D, S> RearmOnDrop<'a, T, D, S>
where
    T: ports::TimeProvider,
    D: ports::PushDispatcher,
    S: ports::PushStore,
{
    fn new(inner: &'a Arc<Inner<T, D, S>>) -> Self {
        Self {
            inner,
            pending: true,
        }
    }

    fn done(&mut self) {
        self.pending = false;
    }
}

impl<T, D, S> Drop for RearmOnDrop<'_, T, D, S>
where
    T: ports::TimeProvider,
    D: ports::PushDispatcher,
    S: ports::PushStore,
{
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(self.inner);
        runtime.spawn(async move {
            let _running = inner.run_lock.lock().await;
            inner.rearm().await;
        });
    }
}

/// Time to wait before running for something due at `due`: one second past
/// it, but never less than `min`.
pub(crate) fn compute_delay(now: OffsetDateTime, due: OffsetDateTime, min: Duration) -> Duration {
    let until = due - now;
    if !until.is_positive() {
        return min;
    }
    let mut seconds = until.whole_seconds().unsigned_abs();
    if until.subsec_nanoseconds() > 0 {
        seconds += 1;
    }
    Duration::from_secs(seconds.saturating_add(1)).max(min)
}

fn fire_time(now: OffsetDateTime, delay: Duration) -> Option<OffsetDateTime> {
    now.checked_add(time::Duration::try_from(delay).ok()?)
}
