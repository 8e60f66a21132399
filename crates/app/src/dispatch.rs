//! Background worker that emails due reminders.
//!
//! Each cycle loads every undone reminder past due, sends one email per
//! reminder and marks it done immediately after a successful send. A send
//! failure is logged and skipped so one broken address cannot block the
//! rest; the reminder stays undone and is retried on the next cycle.
//! Delivery is therefore at-least-once.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use jobtrail_mailer::Notifier;
use jobtrail_storage::{Database, ReminderError};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ReminderDispatcher {
    database: Database,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
}

impl ReminderDispatcher {
    /// Creates a dispatcher with the default clock and cadence.
    pub fn new(database: Database, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            database,
            notifier,
            clock: Arc::new(Utc::now),
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Overrides the clock used to decide which reminders are due.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "dispatch", error = %err, "dispatch cycle failed");
            }
        }
    }

    /// Executes one dispatch cycle and returns how many reminders went out.
    pub async fn run_once(&self) -> Result<u64, DispatchError> {
        let now = (self.clock)();
        let due = self
            .database
            .reminders()
            .list_due(now)
            .await
            .map_err(DispatchError::Load)?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut dispatched = 0u64;
        for reminder in due {
            let subject = format!("Reminder: {}", reminder.message);
            let body = format!("Due: {}\n\n{}", reminder.due_at.to_rfc3339(), reminder.message);

            match self.notifier.send(&reminder.email, &subject, &body).await {
                Ok(()) => {
                    // Committed per reminder, so a failure later in the batch
                    // never rolls back an already-sent notification.
                    self.database
                        .reminders()
                        .mark_done(reminder.id)
                        .await
                        .map_err(|source| DispatchError::MarkDone {
                            id: reminder.id,
                            source,
                        })?;
                    counter!("reminders_dispatched_total").increment(1);
                    dispatched += 1;
                }
                Err(err) => {
                    counter!("reminder_dispatch_failures_total").increment(1);
                    warn!(
                        stage = "dispatch",
                        reminder_id = reminder.id,
                        error = %err,
                        "reminder email failed; left undone for the next cycle"
                    );
                }
            }
        }

        info!(
            stage = "dispatch",
            dispatched,
            now = %now.to_rfc3339(),
            "dispatch cycle completed"
        );
        Ok(dispatched)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to load due reminders: {0}")]
    Load(#[source] ReminderError),
    #[error("failed to mark reminder {id} done: {source}")]
    MarkDone {
        id: i64,
        #[source]
        source: ReminderError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    use jobtrail_mailer::NotifyError;
    use jobtrail_storage::{NewReminder, NewUser};

    use crate::telemetry;

    /// Scripted notifier: fails the call indices listed in `fail_on`
    /// (zero-based, counted across the notifier's lifetime).
    struct FakeNotifier {
        fail_on: Vec<usize>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeNotifier {
        fn new(fail_on: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                fail_on,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().expect("calls poisoned").clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
            let mut calls = self.calls.lock().expect("calls poisoned");
            let index = calls.len();
            calls.push((to.to_string(), subject.to_string(), body.to_string()));
            if self.fail_on.contains(&index) {
                return Err(NotifyError::Status {
                    status: StatusCode::BAD_GATEWAY,
                    body: "relay unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    async fn setup_db() -> (Database, i64) {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        let user = db
            .users()
            .create(NewUser {
                username: "ada",
                email: "ada@example.com",
                password_hash: "hash",
                created_at: Utc::now(),
            })
            .await
            .expect("user");
        (db, user.id)
    }

    async fn seed_reminder(db: &Database, user_id: i64, due_at: DateTime<Utc>, message: &str) -> i64 {
        db.reminders()
            .create(NewReminder {
                user_id,
                application_id: None,
                due_at,
                message,
                created_at: due_at,
            })
            .await
            .expect("reminder")
            .id
    }

    #[tokio::test]
    async fn a_failed_send_skips_only_that_reminder() {
        telemetry::init_metrics().expect("metrics");
        let (db, user) = setup_db().await;
        let now = Utc::now();
        let first = seed_reminder(&db, user, now - ChronoDuration::hours(3), "first").await;
        let second = seed_reminder(&db, user, now - ChronoDuration::hours(2), "second").await;
        let third = seed_reminder(&db, user, now - ChronoDuration::hours(1), "third").await;

        let notifier = FakeNotifier::new(vec![1]);
        let clock = Arc::new(move || now);
        let dispatcher = ReminderDispatcher::new(db.clone(), notifier.clone()).with_clock(clock.clone());

        let dispatched = dispatcher.run_once().await.expect("run_once");
        assert_eq!(dispatched, 2);

        for (id, done) in [(first, true), (second, false), (third, true)] {
            let row = db.reminders().fetch(id).await.expect("fetch").expect("present");
            assert_eq!(row.done, done, "reminder {id}");
        }

        // The failed reminder is retried on the next cycle.
        let dispatched = dispatcher.run_once().await.expect("retry");
        assert_eq!(dispatched, 1);
        let row = db
            .reminders()
            .fetch(second)
            .await
            .expect("fetch")
            .expect("present");
        assert!(row.done);

        // Nothing newly due: a further run dispatches nothing.
        let dispatched = dispatcher.run_once().await.expect("idle run");
        assert_eq!(dispatched, 0);
    }

    #[tokio::test]
    async fn emails_carry_the_owner_address_and_due_time() {
        telemetry::init_metrics().expect("metrics");
        let (db, user) = setup_db().await;
        let now = Utc::now();
        let due = now - ChronoDuration::minutes(30);
        seed_reminder(&db, user, due, "follow up with Acme").await;

        let notifier = FakeNotifier::new(Vec::new());
        let dispatcher =
            ReminderDispatcher::new(db, notifier.clone()).with_clock(Arc::new(move || now));
        dispatcher.run_once().await.expect("run_once");

        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        let (to, subject, body) = &calls[0];
        assert_eq!(to, "ada@example.com");
        assert_eq!(subject, "Reminder: follow up with Acme");
        assert!(body.starts_with("Due: "));
        assert!(body.ends_with("follow up with Acme"));
    }

    #[tokio::test]
    async fn nothing_due_dispatches_nothing() {
        telemetry::init_metrics().expect("metrics");
        let (db, user) = setup_db().await;
        let now = Utc::now();
        seed_reminder(&db, user, now + ChronoDuration::hours(1), "later").await;

        let notifier = FakeNotifier::new(Vec::new());
        let dispatcher =
            ReminderDispatcher::new(db, notifier.clone()).with_clock(Arc::new(move || now));

        let dispatched = dispatcher.run_once().await.expect("run_once");
        assert_eq!(dispatched, 0);
        assert!(notifier.calls().is_empty());
    }
}
