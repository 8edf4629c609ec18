//! Reminder pipeline: resolve subscribers, build the payload for the current
//! time bracket, dispatch, then reap endpoints the push service reported gone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::ReminderConfig;
use crate::db::PushSubscriptionRepository;
use crate::error::{AppError, AppResult};
use crate::services::push::{
    DispatchResult, NotificationPayload, PushDispatcher, PushKeys, PushTarget,
};
use crate::AppState;

const ICON: &str = "/icons/icon-192x192.png";
const BADGE: &str = "/icons/badge-72x72.png";
const CLIENT_URL: &str = "/dashboard";

/// What the reminder is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    /// Nudge to log the day's income and expenses.
    #[default]
    DailyLog,
    /// Manual check that notifications reach the device.
    Test,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::DailyLog => "daily_log",
            ReminderKind::Test => "test",
        }
    }
}

/// Time-of-day window that selects the reminder copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderBracket {
    Evening,
    Late,
}

impl ReminderBracket {
    /// [17, 20) is the evening bracket; every other hour, including ones
    /// outside the cron schedule, is treated as late.
    pub fn for_hour(hour: u32) -> Self {
        if (17..20).contains(&hour) {
            ReminderBracket::Evening
        } else {
            ReminderBracket::Late
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderBracket::Evening => "evening",
            ReminderBracket::Late => "late",
        }
    }
}

/// Build the notification for `kind` at local `hour`. Pure: same inputs, same payload.
pub fn build_payload(kind: ReminderKind, hour: u32, lang: &str) -> NotificationPayload {
    let bracket = ReminderBracket::for_hour(hour);
    let prefix = format!("reminder.{}.{}", kind.as_str(), bracket.as_str());
    let app = crate::i18n::tr(Some(lang), "app.name", None);
    let params = [("app", app.as_str())];

    NotificationPayload {
        title: crate::i18n::tr(Some(lang), &format!("{prefix}.title"), Some(&params)),
        body: crate::i18n::tr(Some(lang), &format!("{prefix}.body"), Some(&params)),
        icon: ICON.to_string(),
        badge: BADGE.to_string(),
        url: CLIENT_URL.to_string(),
        tag: format!("enfocar-{}", kind.as_str()),
        require_interaction: true,
        data: serde_json::json!({
            "kind": kind.as_str(),
            "bracket": bracket.as_str(),
            "url": CLIENT_URL,
        }),
    }
}

/// Local hour of day for `now` at a fixed UTC offset.
pub fn local_hour(now: DateTime<Utc>, utc_offset_hours: i32) -> u32 {
    FixedOffset::east_opt(utc_offset_hours * 3600)
        .map(|tz| now.with_timezone(&tz).hour())
        .unwrap_or_else(|| now.hour())
}

/// Time until the next configured local `hours` mark strictly after `now`.
pub fn next_run_delay(now: DateTime<Utc>, utc_offset_hours: i32, hours: &[u32]) -> Option<Duration> {
    let tz = FixedOffset::east_opt(utc_offset_hours * 3600)?;
    let local = now.with_timezone(&tz);
    let today = local.date_naive();

    let mut next: Option<DateTime<FixedOffset>> = None;
    for day in [Some(today), today.succ_opt()].into_iter().flatten() {
        for &hour in hours {
            let Some(candidate) = day
                .and_hms_opt(hour, 0, 0)
                .and_then(|naive| naive.and_local_timezone(tz).single())
            else {
                continue;
            };
            if candidate > local && next.map_or(true, |current| candidate < current) {
                next = Some(candidate);
            }
        }
    }

    next.and_then(|at| (at - local).to_std().ok())
}

// ============================================================================
// Subscriber resolution and reaping
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberFilter {
    User(String),
    /// Every user with at least one subscription.
    All,
}

pub async fn resolve_subscribers(
    pool: &SqlitePool,
    filter: &SubscriberFilter,
) -> AppResult<Vec<PushTarget>> {
    let subscriptions = match filter {
        SubscriberFilter::User(user_id) => {
            PushSubscriptionRepository::find_by_user_id(pool, user_id).await?
        }
        SubscriberFilter::All => PushSubscriptionRepository::find_all(pool).await?,
    };

    Ok(subscriptions
        .into_iter()
        .map(|s| PushTarget {
            endpoint: s.endpoint,
            keys: PushKeys {
                p256dh: s.p256dh,
                auth: s.auth,
            },
            user_id: s.user_id,
        })
        .collect())
}

/// Delete subscriptions whose endpoints the push service reported gone.
pub async fn reap_expired(pool: &SqlitePool, expired: &[String]) -> AppResult<u64> {
    if expired.is_empty() {
        return Ok(0);
    }
    let removed = PushSubscriptionRepository::delete_by_endpoints(pool, expired).await?;
    tracing::info!(
        "Removed {} expired push subscription(s) out of {} reported",
        removed,
        expired.len()
    );
    Ok(removed)
}

// ============================================================================
// Triggers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRun {
    /// Successful deliveries in this run.
    pub users_notified: usize,
    pub bracket: ReminderBracket,
    pub result: DispatchResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnDemandOutcome {
    NotSubscribed,
    Sent(DispatchResult),
}

pub struct ReminderService {
    pool: SqlitePool,
    dispatcher: Option<PushDispatcher>,
    config: ReminderConfig,
}

impl ReminderService {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            dispatcher: state.push.clone().map(PushDispatcher::new),
            config: state.config.reminders.clone(),
        }
    }

    fn dispatcher(&self) -> AppResult<&PushDispatcher> {
        self.dispatcher.as_ref().ok_or_else(|| {
            AppError::Config("push delivery is not configured (VAPID keys)".to_string())
        })
    }

    /// Cron surface: remind every subscribed user.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> AppResult<ScheduledRun> {
        let dispatcher = self.dispatcher()?;
        let hour = local_hour(now, self.config.utc_offset_hours);
        let bracket = ReminderBracket::for_hour(hour);

        let targets = resolve_subscribers(&self.pool, &SubscriberFilter::All).await?;
        tracing::info!(
            hour,
            bracket = bracket.as_str(),
            "Scheduled reminder run for {} subscription(s)",
            targets.len()
        );

        if targets.is_empty() {
            return Ok(ScheduledRun {
                users_notified: 0,
                bracket,
                result: DispatchResult::default(),
            });
        }

        let payload = build_payload(ReminderKind::DailyLog, hour, &self.config.lang);
        let result = self.dispatch_and_reap(dispatcher, &targets, &payload).await?;

        Ok(ScheduledRun {
            users_notified: result.successful,
            bracket,
            result,
        })
    }

    /// On-demand surface: remind only `user_id`, without touching the
    /// dispatcher when they have nothing registered.
    pub async fn run_on_demand(
        &self,
        user_id: &str,
        kind: ReminderKind,
        now: DateTime<Utc>,
    ) -> AppResult<OnDemandOutcome> {
        let dispatcher = self.dispatcher()?;

        let targets =
            resolve_subscribers(&self.pool, &SubscriberFilter::User(user_id.to_string())).await?;
        if targets.is_empty() {
            tracing::debug!(user_id, "On-demand reminder skipped: no subscriptions");
            return Ok(OnDemandOutcome::NotSubscribed);
        }

        let hour = local_hour(now, self.config.utc_offset_hours);
        let payload = build_payload(kind, hour, &self.config.lang);
        let result = self.dispatch_and_reap(dispatcher, &targets, &payload).await?;

        Ok(OnDemandOutcome::Sent(result))
    }

    async fn dispatch_and_reap(
        &self,
        dispatcher: &PushDispatcher,
        targets: &[PushTarget],
        payload: &NotificationPayload,
    ) -> AppResult<DispatchResult> {
        let result = dispatcher.dispatch(targets, payload).await?;

        // Deliveries already happened; a failed cleanup is retried naturally
        // on the next run when the same endpoints report gone again.
        if let Err(e) = reap_expired(&self.pool, &result.expired).await {
            tracing::warn!("Failed to remove expired push subscriptions: {:?}", e);
        }

        Ok(result)
    }
}
