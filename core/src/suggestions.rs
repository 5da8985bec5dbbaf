//! Daily "what to cook" suggestions.
//!
//! At most one row per user and day. Generation is an upsert: whoever asks
//! first (the user opening the app, or the nightly backfill) creates the row
//! and everyone after gets it back unchanged.

use chrono::{Days, NaiveDate};
use rusqlite::{OptionalExtension, params};
use serde_json::json;

use crate::db::{Database, now};
use crate::error::{Error, Result};
use crate::models::{DailyMealSuggestion, SuggestionContext, SuggestionStatus};

const SUGGESTION_COLUMNS: &str =
    "id, user_id, date, status, recipe_id, meal_plan_id, context, meta, created_at, decided_at";

/// A recipe worth proposing, with whatever the source wants to record
/// about why.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub recipe_id: i64,
    pub meta: serde_json::Value,
}

/// Picks the recipe to propose for a user on a date.
pub trait SuggestionSource {
    fn propose(&self, db: &Database, user_id: i64, date: NaiveDate) -> Result<Option<Candidate>>;
}

/// Proposes a recipe the pantry can already cover.
///
/// Candidates are the user's recipes with at least one ingredient line,
/// every line covered by pantry stock in the ingredient's unit, and no plan
/// in the `recent_days` before the date (or on it). The least recently
/// planned wins; ties go to the oldest recipe.
#[derive(Debug, Clone, Copy)]
pub struct PantryMatcher {
    pub recent_days: u32,
}

impl SuggestionSource for PantryMatcher {
    fn propose(&self, db: &Database, user_id: i64, date: NaiveDate) -> Result<Option<Candidate>> {
        let window_start = date
            .checked_sub_days(Days::new(u64::from(self.recent_days)))
            .unwrap_or(NaiveDate::MIN);

        let found: Option<(i64, i64, Option<NaiveDate>)> = db
            .conn()
            .query_row(
                "SELECT r.id, COUNT(ri.id),
                        (SELECT MAX(mp.date) FROM meal_plans mp
                         WHERE mp.recipe_id = r.id AND mp.date < ?3) AS last_planned
                 FROM recipes r
                 JOIN recipe_ingredients ri ON ri.recipe_id = r.id
                 JOIN ingredients i ON i.id = ri.ingredient_id
                 LEFT JOIN pantry p ON p.user_id = r.user_id
                                   AND p.ingredient_id = ri.ingredient_id
                                   AND p.unit = i.unit
                 WHERE r.user_id = ?1
                   AND NOT EXISTS (
                        SELECT 1 FROM meal_plans mp
                        WHERE mp.recipe_id = r.id AND mp.date >= ?2 AND mp.date <= ?3)
                 GROUP BY r.id
                 HAVING SUM(COALESCE(p.quantity_hundredths, 0) < ri.quantity_hundredths) = 0
                 ORDER BY last_planned IS NOT NULL, last_planned, r.id
                 LIMIT 1",
                params![user_id, window_start, date],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(found.map(|(recipe_id, ingredient_count, last_planned)| Candidate {
            recipe_id,
            meta: json!({
                "source": "pantry_match",
                "ingredient_count": ingredient_count,
                "recent_days": self.recent_days,
                "last_planned": last_planned,
            }),
        }))
    }
}

impl Database {
    fn suggestion_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyMealSuggestion> {
        Ok(DailyMealSuggestion {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date: row.get(2)?,
            status: row.get(3)?,
            recipe_id: row.get(4)?,
            meal_plan_id: row.get(5)?,
            context: row.get(6)?,
            meta: row.get(7)?,
            created_at: row.get(8)?,
            decided_at: row.get(9)?,
        })
    }

    /// Return the user's suggestion for `date`, creating it if needed.
    ///
    /// The flag is `true` only for the call that inserted the row. When
    /// `source` has nothing to offer the row is stored as `none_possible`,
    /// so the decision is not recomputed later in the day.
    pub fn generate_suggestion(
        &self,
        user_id: i64,
        date: NaiveDate,
        context: SuggestionContext,
        source: &dyn SuggestionSource,
    ) -> Result<(DailyMealSuggestion, bool)> {
        if let Some(existing) = self.get_suggestion_for(user_id, date)? {
            return Ok((existing, false));
        }
        self.require_user(user_id)?;

        let (status, recipe_id, meta) = match source.propose(self, user_id, date)? {
            Some(candidate) => (
                SuggestionStatus::Proposed,
                Some(candidate.recipe_id),
                candidate.meta,
            ),
            None => (SuggestionStatus::NonePossible, None, json!({})),
        };

        let inserted = self.conn().execute(
            "INSERT INTO daily_meal_suggestions
                (user_id, date, status, recipe_id, context, meta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, date) DO NOTHING",
            params![user_id, date, status, recipe_id, context, meta, now()],
        )?;
        let created = inserted > 0;
        if created {
            tracing::info!(user_id, %date, %status, %context, "generated suggestion");
        } else {
            tracing::debug!(user_id, %date, "suggestion generated concurrently, re-selecting");
        }

        let row = self
            .get_suggestion_for(user_id, date)?
            .ok_or_else(|| Error::not_found(format!("Suggestion for {date}")))?;
        Ok((row, created))
    }

    /// Accept a proposed suggestion, planning its recipe for the day.
    ///
    /// The plan (new or already existing) and the status change commit
    /// together. Accepting twice returns the accepted row.
    pub fn accept_suggestion(&self, id: i64) -> Result<DailyMealSuggestion> {
        let suggestion = self.get_suggestion(id)?;
        match suggestion.status {
            SuggestionStatus::Accepted => return Ok(suggestion),
            SuggestionStatus::Proposed => {}
            other => {
                return Err(Error::invalid(format!(
                    "Cannot accept a suggestion that is {other}"
                )));
            }
        }
        let recipe_id = suggestion.recipe_id.ok_or_else(|| {
            Error::invalid("Cannot accept a suggestion whose recipe was deleted")
        })?;

        let tx = self.write_transaction()?;
        let plan = self.plan_meal(suggestion.user_id, recipe_id, suggestion.date)?;
        let rows = tx.execute(
            "UPDATE daily_meal_suggestions
             SET status = ?1, meal_plan_id = ?2, decided_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                SuggestionStatus::Accepted,
                plan.id,
                now(),
                id,
                SuggestionStatus::Proposed
            ],
        )?;
        if rows == 0 {
            drop(tx);
            let current = self.get_suggestion(id)?;
            if current.status == SuggestionStatus::Accepted {
                return Ok(current);
            }
            return Err(Error::invalid(format!(
                "Cannot accept a suggestion that is {}",
                current.status
            )));
        }
        tx.commit()?;

        tracing::info!(suggestion_id = id, meal_plan_id = plan.id, "accepted suggestion");
        self.get_suggestion(id)
    }

    /// Dismiss a proposed suggestion. Dismissing twice is a no-op.
    pub fn dismiss_suggestion(&self, id: i64) -> Result<DailyMealSuggestion> {
        let rows = self.conn().execute(
            "UPDATE daily_meal_suggestions SET status = ?1, decided_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                SuggestionStatus::Dismissed,
                now(),
                id,
                SuggestionStatus::Proposed
            ],
        )?;
        let suggestion = self.get_suggestion(id)?;
        if rows > 0 {
            tracing::info!(suggestion_id = id, "dismissed suggestion");
        } else if suggestion.status != SuggestionStatus::Dismissed {
            return Err(Error::invalid(format!(
                "Cannot dismiss a suggestion that is {}",
                suggestion.status
            )));
        }
        Ok(suggestion)
    }

    pub fn get_suggestion(&self, id: i64) -> Result<DailyMealSuggestion> {
        self.conn()
            .query_row(
                &format!("SELECT {SUGGESTION_COLUMNS} FROM daily_meal_suggestions WHERE id = ?1"),
                params![id],
                Self::suggestion_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("Suggestion {id}")))
    }

    pub fn get_suggestion_for(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailyMealSuggestion>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {SUGGESTION_COLUMNS} FROM daily_meal_suggestions
                     WHERE user_id = ?1 AND date = ?2"
                ),
                params![user_id, date],
                Self::suggestion_from_row,
            )
            .optional()?)
    }
}
