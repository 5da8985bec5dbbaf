use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};

use crate::db::{Database, now};
use crate::error::{Error, Result};
use crate::models::MealPlan;

const MEAL_PLAN_SELECT: &str = "SELECT mp.id, mp.user_id, mp.recipe_id, mp.date, mp.validated,
            mp.validated_at, mp.created_at, r.name
     FROM meal_plans mp JOIN recipes r ON r.id = mp.recipe_id";

impl Database {
    fn meal_plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlan> {
        Ok(MealPlan {
            id: row.get(0)?,
            user_id: row.get(1)?,
            recipe_id: row.get(2)?,
            date: row.get(3)?,
            validated: row.get(4)?,
            validated_at: row.get(5)?,
            created_at: row.get(6)?,
            recipe_name: row.get(7)?,
        })
    }

    /// Schedule `recipe_id` on `date`. Planning the same recipe twice on one
    /// day returns the existing plan.
    pub fn plan_meal(&self, user_id: i64, recipe_id: i64, date: NaiveDate) -> Result<MealPlan> {
        let recipe = self.get_recipe(recipe_id)?;
        if recipe.user_id != user_id {
            return Err(Error::invalid(format!(
                "Recipe '{}' belongs to another user",
                recipe.name
            )));
        }

        let inserted = self.conn().execute(
            "INSERT INTO meal_plans (user_id, recipe_id, date, validated, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(user_id, recipe_id, date) DO NOTHING",
            params![user_id, recipe_id, date, now()],
        )?;
        if inserted > 0 {
            tracing::info!(user_id, recipe_id, %date, "planned meal");
        }

        self.conn()
            .query_row(
                &format!(
                    "{MEAL_PLAN_SELECT}
                     WHERE mp.user_id = ?1 AND mp.recipe_id = ?2 AND mp.date = ?3"
                ),
                params![user_id, recipe_id, date],
                Self::meal_plan_from_row,
            )
            .map_err(Error::from)
    }

    pub fn get_meal_plan(&self, id: i64) -> Result<MealPlan> {
        self.conn()
            .query_row(
                &format!("{MEAL_PLAN_SELECT} WHERE mp.id = ?1"),
                params![id],
                Self::meal_plan_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("Meal plan {id}")))
    }

    pub fn list_meal_plans(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MealPlan>> {
        let mut stmt = self.conn().prepare(&format!(
            "{MEAL_PLAN_SELECT}
             WHERE mp.user_id = ?1 AND mp.date >= ?2 AND mp.date <= ?3
             ORDER BY mp.date, mp.id"
        ))?;
        let plans = stmt
            .query_map(params![user_id, from, to], Self::meal_plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// Mark a plan as cooked and take its ingredients out of the pantry.
    ///
    /// Only pantry lines held in the ingredient's own unit are reduced, and
    /// never below zero. Validating an already validated plan changes
    /// nothing.
    pub fn validate_meal_plan(&self, id: i64) -> Result<MealPlan> {
        let tx = self.write_transaction()?;
        let stamp = now();
        let rows = tx.execute(
            "UPDATE meal_plans SET validated = 1, validated_at = ?1
             WHERE id = ?2 AND validated = 0",
            params![stamp, id],
        )?;
        if rows == 0 {
            drop(tx);
            return self.get_meal_plan(id);
        }

        let (user_id, recipe_id): (i64, i64) = tx.query_row(
            "SELECT user_id, recipe_id FROM meal_plans WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let deducted = tx.execute(
            "UPDATE pantry SET
                quantity_hundredths = MAX(0, quantity_hundredths - (
                    SELECT ri.quantity_hundredths FROM recipe_ingredients ri
                    WHERE ri.recipe_id = ?2 AND ri.ingredient_id = pantry.ingredient_id)),
                updated_at = ?3
             WHERE user_id = ?1
               AND ingredient_id IN (
                    SELECT ri.ingredient_id FROM recipe_ingredients ri
                    JOIN ingredients i ON i.id = ri.ingredient_id
                    WHERE ri.recipe_id = ?2 AND i.unit = pantry.unit)",
            params![user_id, recipe_id, stamp],
        )?;
        tx.commit()?;

        tracing::info!(meal_plan_id = id, user_id, recipe_id, deducted, "validated meal plan");
        self.get_meal_plan(id)
    }

    /// Delete a plan. A suggestion linked to it keeps its row, unlinked.
    pub fn delete_meal_plan(&self, id: i64) -> Result<()> {
        let rows = self
            .conn()
            .execute("DELETE FROM meal_plans WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::not_found(format!("Meal plan {id}")));
        }
        tracing::info!(meal_plan_id = id, "deleted meal plan");
        Ok(())
    }
}
