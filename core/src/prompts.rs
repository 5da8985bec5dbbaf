//! "Did you cook it?" prompts.
//!
//! ```text
//! pending --notify--> sent --answer--> answered
//! pending|sent --timeout--> expired
//! ```
//!
//! Every transition is a guarded `UPDATE ... WHERE status IN (...)`, so
//! re-running a step (or two runners racing) cannot move a row backwards.

use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::db::{Database, now};
use crate::error::{Error, Result};
use crate::jobs::{JobSettings, days_before};
use crate::models::{MealCookedPrompt, PromptAnswer, PromptStatus};
use crate::notify::{Notification, PushNotifier};

const PROMPT_COLUMNS: &str =
    "id, user_id, date, status, answer, sent_at, answered_at, expired_at, created_at";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyReport {
    pub sent: usize,
    /// Deliveries that failed; those prompts stay pending for the next run.
    pub failed: usize,
}

impl Database {
    fn prompt_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealCookedPrompt> {
        Ok(MealCookedPrompt {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date: row.get(2)?,
            status: row.get(3)?,
            answer: row.get(4)?,
            sent_at: row.get(5)?,
            answered_at: row.get(6)?,
            expired_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// One pending prompt per user and past day with a validated meal.
    /// Returns the number of prompts created by this call.
    pub fn create_prompts(&self, today: NaiveDate) -> Result<usize> {
        let created = self.conn().execute(
            "INSERT OR IGNORE INTO meal_cooked_prompts (user_id, date, status, created_at)
             SELECT DISTINCT user_id, date, ?2, ?3 FROM meal_plans
             WHERE validated = 1 AND date < ?1",
            params![today, PromptStatus::Pending, now()],
        )?;
        tracing::info!(%today, created, "created meal-cooked prompts");
        Ok(created)
    }

    /// Send due pending prompts through `notifier`.
    ///
    /// A prompt is due once it is `notify_after_days` old and until it
    /// becomes eligible for expiry. A failed delivery is logged and the
    /// prompt stays pending.
    pub fn notify_prompts(
        &self,
        today: NaiveDate,
        notifier: &dyn PushNotifier,
        settings: &JobSettings,
    ) -> Result<NotifyReport> {
        let due_on_or_before = days_before(today, settings.notify_after_days);
        let expires_on_or_before = days_before(today, settings.expire_after_days);

        let due: Vec<(i64, i64, NaiveDate)> = {
            let mut stmt = self.conn().prepare(
                "SELECT id, user_id, date FROM meal_cooked_prompts
                 WHERE status = ?1 AND date <= ?2 AND date > ?3
                 ORDER BY date, id",
            )?;
            stmt.query_map(
                params![PromptStatus::Pending, due_on_or_before, expires_on_or_before],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut report = NotifyReport::default();
        for (id, user_id, date) in due {
            let notification = self.prompt_notification(id, user_id, date)?;
            match notifier.send(user_id, &notification) {
                Ok(()) => {
                    let rows = self.conn().execute(
                        "UPDATE meal_cooked_prompts SET status = ?1, sent_at = ?2
                         WHERE id = ?3 AND status = ?4",
                        params![PromptStatus::Sent, now(), id, PromptStatus::Pending],
                    )?;
                    report.sent += rows;
                }
                Err(err) => {
                    tracing::warn!(prompt_id = id, user_id, error = %err, "prompt delivery failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(%today, sent = report.sent, failed = report.failed, "notified prompts");
        Ok(report)
    }

    fn prompt_notification(&self, id: i64, user_id: i64, date: NaiveDate) -> Result<Notification> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT r.name FROM meal_plans mp JOIN recipes r ON r.id = mp.recipe_id
             WHERE mp.user_id = ?1 AND mp.date = ?2 AND mp.validated = 1
             ORDER BY r.name",
        )?;
        let names = stmt
            .query_map(params![user_id, date], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let meals = if names.is_empty() {
            "your meal".to_string()
        } else {
            names.join(", ")
        };
        Ok(Notification {
            title: "Did you cook it?".to_string(),
            body: format!("On {date} you planned {meals}. Did you cook it?"),
            url: format!("/prompts/{id}"),
        })
    }

    /// Record the user's answer. Answering a prompt that is already
    /// answered or expired leaves it unchanged and returns it.
    pub fn answer_prompt(&self, id: i64, answer: PromptAnswer) -> Result<MealCookedPrompt> {
        let rows = self.conn().execute(
            "UPDATE meal_cooked_prompts SET status = ?1, answer = ?2, answered_at = ?3
             WHERE id = ?4 AND status IN (?5, ?6)",
            params![
                PromptStatus::Answered,
                answer,
                now(),
                id,
                PromptStatus::Pending,
                PromptStatus::Sent
            ],
        )?;
        let prompt = self.get_prompt(id)?;
        if rows > 0 {
            tracing::info!(prompt_id = id, %answer, "answered prompt");
        } else {
            tracing::debug!(prompt_id = id, status = %prompt.status, "prompt already closed");
        }
        Ok(prompt)
    }

    /// Close prompts left unanswered for `expire_after_days`.
    pub fn expire_prompts(&self, today: NaiveDate, settings: &JobSettings) -> Result<usize> {
        let cutoff = days_before(today, settings.expire_after_days);
        let expired = self.conn().execute(
            "UPDATE meal_cooked_prompts SET status = ?1, expired_at = ?2
             WHERE status IN (?3, ?4) AND date <= ?5",
            params![
                PromptStatus::Expired,
                now(),
                PromptStatus::Pending,
                PromptStatus::Sent,
                cutoff
            ],
        )?;
        tracing::info!(%today, expired, "expired prompts");
        Ok(expired)
    }

    pub fn get_prompt(&self, id: i64) -> Result<MealCookedPrompt> {
        self.conn()
            .query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM meal_cooked_prompts WHERE id = ?1"),
                params![id],
                Self::prompt_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("Prompt {id}")))
    }

    pub fn list_prompts(
        &self,
        user_id: i64,
        status: Option<PromptStatus>,
    ) -> Result<Vec<MealCookedPrompt>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM meal_cooked_prompts
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY date DESC, id DESC"
        ))?;
        let prompts = stmt
            .query_map(params![user_id, status], Self::prompt_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prompts)
    }
}
