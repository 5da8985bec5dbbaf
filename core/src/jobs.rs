//! Entry points for the external scheduler.
//!
//! Every job is keyed by the calendar day it runs for and may be invoked any
//! number of times for that day; repeated runs converge on the same state.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::SuggestionContext;
use crate::notify::PushNotifier;
use crate::prompts::NotifyReport;
use crate::suggestions::SuggestionSource;

/// Delays that drive the prompt and suggestion jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Days after the meal before the prompt is pushed.
    pub notify_after_days: u32,
    /// Days after the meal before an unanswered prompt expires.
    pub expire_after_days: u32,
    /// Cooldown before a planned recipe is suggested again.
    pub suggestion_recent_days: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            notify_after_days: 1,
            expire_after_days: 7,
            suggestion_recent_days: 3,
        }
    }
}

impl JobSettings {
    /// A prompt must have a window between being due and expiring.
    pub fn validate(&self) -> Result<()> {
        if self.expire_after_days <= self.notify_after_days {
            return Err(Error::invalid(format!(
                "expire_after_days ({}) must be greater than notify_after_days ({})",
                self.expire_after_days, self.notify_after_days
            )));
        }
        Ok(())
    }
}

pub(crate) fn days_before(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
}

/// What one scheduler tick did. Steps that failed outright are listed in
/// `errors`; the remaining steps still ran.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub date: NaiveDate,
    pub prompts_created: usize,
    pub prompts_notified: NotifyReport,
    pub prompts_expired: usize,
    pub suggestions: BackfillReport,
    pub errors: Vec<String>,
}

impl TickReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            prompts_created: 0,
            prompts_notified: NotifyReport::default(),
            prompts_expired: 0,
            suggestions: BackfillReport::default(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn record<T>(errors: &mut Vec<String>, step: &str, outcome: Result<T>) -> Option<T> {
    match outcome {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(step, error = %err, "job step failed");
            errors.push(format!("{step}: {err}"));
            None
        }
    }
}

impl Database {
    /// Make sure every user has a suggestion for `today`. A failure for one
    /// user is logged and counted; the others are still processed.
    pub fn backfill_suggestions(
        &self,
        today: NaiveDate,
        source: &dyn SuggestionSource,
    ) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        for user in self.list_users()? {
            match self.generate_suggestion(user.id, today, SuggestionContext::CronBackfill, source)
            {
                Ok((_, true)) => report.created += 1,
                Ok((_, false)) => report.existing += 1,
                Err(err) => {
                    tracing::warn!(user_id = user.id, error = %err, "suggestion backfill failed");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(
            %today,
            created = report.created,
            existing = report.existing,
            failed = report.failed,
            "backfilled suggestions"
        );
        Ok(report)
    }

    /// Run prompt creation, notification, expiry and suggestion backfill, in
    /// that order.
    pub fn run_tick(
        &self,
        today: NaiveDate,
        notifier: &dyn PushNotifier,
        source: &dyn SuggestionSource,
        settings: &JobSettings,
    ) -> TickReport {
        let mut report = TickReport::new(today);
        let errors = &mut report.errors;

        if let Some(n) = record(errors, "create_prompts", self.create_prompts(today)) {
            report.prompts_created = n;
        }
        if let Some(n) = record(
            errors,
            "notify_prompts",
            self.notify_prompts(today, notifier, settings),
        ) {
            report.prompts_notified = n;
        }
        if let Some(n) = record(
            errors,
            "expire_prompts",
            self.expire_prompts(today, settings),
        ) {
            report.prompts_expired = n;
        }
        if let Some(n) = record(
            errors,
            "backfill_suggestions",
            self.backfill_suggestions(today, source),
        ) {
            report.suggestions = n;
        }

        tracing::info!(%today, errors = report.errors.len(), "scheduler tick finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PromptStatus, SuggestionStatus};
    use crate::prompts::tests::RecordingNotifier;
    use crate::suggestions::tests::Fixed;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_settings_validation() {
        assert!(JobSettings::default().validate().is_ok());
        let bad = JobSettings {
            notify_after_days: 3,
            expire_after_days: 3,
            ..JobSettings::default()
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_days_before() {
        assert_eq!(days_before(day(10), 3), day(7));
        assert_eq!(days_before(day(10), 0), day(10));
        assert_eq!(days_before(NaiveDate::MIN, 1), NaiveDate::MIN);
    }

    #[test]
    fn test_backfill_covers_every_user_once() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_user("alice").unwrap();
        db.ensure_user("bob").unwrap();

        let first = db.backfill_suggestions(day(1), &Fixed(None)).unwrap();
        assert_eq!(first, BackfillReport { created: 2, existing: 0, failed: 0 });
        let second = db.backfill_suggestions(day(1), &Fixed(None)).unwrap();
        assert_eq!(second, BackfillReport { created: 0, existing: 2, failed: 0 });
    }

    #[test]
    fn test_backfill_keeps_user_generated_row() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap().id;
        let recipe = db.create_recipe(user, "Tajine", None).unwrap().id;
        let (today, _) = db
            .generate_suggestion(user, day(2), SuggestionContext::TodayAuto, &Fixed(Some(recipe)))
            .unwrap();

        db.backfill_suggestions(day(2), &Fixed(None)).unwrap();
        let row = db.get_suggestion_for(user, day(2)).unwrap().unwrap();
        assert_eq!(row.id, today.id);
        assert_eq!(row.status, SuggestionStatus::Proposed);
        assert_eq!(row.context, SuggestionContext::TodayAuto);
    }

    #[test]
    fn test_tick_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap().id;
        let recipe = db.create_recipe(user, "Tajine", None).unwrap().id;
        let plan = db.plan_meal(user, recipe, day(9)).unwrap();
        db.validate_meal_plan(plan.id).unwrap();

        let notifier = RecordingNotifier::default();
        let settings = JobSettings::default();
        let report = db.run_tick(day(10), &notifier, &Fixed(None), &settings);
        assert!(report.is_ok());
        assert_eq!(report.prompts_created, 1);
        assert_eq!(report.prompts_notified.sent, 1);
        assert_eq!(report.suggestions.created, 1);

        let report = db.run_tick(day(10), &notifier, &Fixed(None), &settings);
        assert!(report.is_ok());
        assert_eq!(report.prompts_created, 0);
        assert_eq!(report.prompts_notified.sent, 0);
        assert_eq!(report.suggestions.existing, 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);

        let prompts = db.list_prompts(user, None).unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].status, PromptStatus::Sent);
    }

    #[test]
    fn test_tick_survives_delivery_failure() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap().id;
        let recipe = db.create_recipe(user, "Tajine", None).unwrap().id;
        let plan = db.plan_meal(user, recipe, day(9)).unwrap();
        db.validate_meal_plan(plan.id).unwrap();

        let failing = RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        };
        let report = db.run_tick(day(10), &failing, &Fixed(None), &JobSettings::default());
        assert!(report.is_ok());
        assert_eq!(report.prompts_notified.failed, 1);
        assert_eq!(report.suggestions.created, 1);
        assert_eq!(
            db.list_prompts(user, None).unwrap()[0].status,
            PromptStatus::Pending
        );

        // Eight days on, the unsent prompt expires instead of being pushed.
        let report = db.run_tick(day(17), &failing, &Fixed(None), &JobSettings::default());
        assert_eq!(report.prompts_notified.failed, 0);
        assert_eq!(report.prompts_expired, 1);
    }
}
