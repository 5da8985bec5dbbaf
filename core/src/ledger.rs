//! Pantry stock and shopping list balances.
//!
//! One line per `(user, ingredient)` in each table. Every quantity change is
//! a single `INSERT ... ON CONFLICT DO UPDATE`, so concurrent additions merge
//! instead of racing. Stored quantities are integer hundredths clamped at zero.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::{Database, now};
use crate::error::{Error, Result};
use crate::models::{
    PantryLine, ShoppingLine, ShoppingRegeneration, ShoppingSource, from_hundredths,
    to_hundredths, validate_unit,
};

const PANTRY_SELECT: &str = "SELECT p.id, p.user_id, p.ingredient_id, p.quantity_hundredths, p.unit,
            p.updated_at, i.name
     FROM pantry p JOIN ingredients i ON i.id = p.ingredient_id";

const SHOPPING_SELECT: &str = "SELECT s.id, s.user_id, s.ingredient_id, s.quantity_hundredths, s.unit,
            s.source, s.checked, s.checked_at, s.updated_at, i.name
     FROM shopping s JOIN ingredients i ON i.id = s.ingredient_id";

/// Outcome of moving checked shopping lines into the pantry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestockSummary {
    pub restocked: usize,
    /// Checked lines left on the list because the pantry holds the
    /// ingredient in another unit.
    pub skipped: usize,
}

fn non_negative(quantity: Decimal) -> Result<i64> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(Error::invalid(format!(
            "Quantity must not be negative, got {quantity}"
        )));
    }
    to_hundredths(quantity)
}

fn unit_mismatch(ingredient_id: i64, unit: &str, stored: Option<String>) -> Error {
    match stored {
        Some(stored) => Error::invalid(format!(
            "Ingredient {ingredient_id} is stored in '{stored}', cannot apply a quantity in '{unit}'"
        )),
        None => Error::invalid(format!("Cannot apply a quantity in '{unit}'")),
    }
}

impl Database {
    fn pantry_line_from_row(row: &rusqlite::Row) -> rusqlite::Result<PantryLine> {
        Ok(PantryLine {
            id: row.get(0)?,
            user_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: from_hundredths(row.get(3)?),
            unit: row.get(4)?,
            updated_at: row.get(5)?,
            ingredient_name: row.get(6)?,
        })
    }

    fn shopping_line_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingLine> {
        Ok(ShoppingLine {
            id: row.get(0)?,
            user_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: from_hundredths(row.get(3)?),
            unit: row.get(4)?,
            source: row.get(5)?,
            checked: row.get(6)?,
            checked_at: row.get(7)?,
            updated_at: row.get(8)?,
            ingredient_name: row.get(9)?,
        })
    }

    fn require_user_and_ingredient(&self, user_id: i64, ingredient_id: i64) -> Result<()> {
        self.require_user(user_id)?;
        self.get_ingredient(ingredient_id).map(|_| ())
    }

    // --- Pantry ---

    /// Add `delta` (possibly negative) to the user's stock, clamping at zero.
    pub fn add_pantry_quantity(
        &self,
        user_id: i64,
        ingredient_id: i64,
        delta: Decimal,
        unit: &str,
    ) -> Result<PantryLine> {
        let unit = validate_unit(unit)?;
        let delta = to_hundredths(delta)?;
        self.require_user_and_ingredient(user_id, ingredient_id)?;

        let rows = self.conn().execute(
            "INSERT INTO pantry (user_id, ingredient_id, quantity_hundredths, unit, updated_at)
             VALUES (?1, ?2, MAX(0, ?3), ?4, ?5)
             ON CONFLICT(user_id, ingredient_id) DO UPDATE SET
                quantity_hundredths = MAX(0, pantry.quantity_hundredths + ?3),
                updated_at = excluded.updated_at
             WHERE pantry.unit = excluded.unit",
            params![user_id, ingredient_id, delta, unit, now()],
        )?;
        if rows == 0 {
            let stored = self.get_pantry_line(user_id, ingredient_id)?.map(|l| l.unit);
            return Err(unit_mismatch(ingredient_id, &unit, stored));
        }
        self.pantry_line(user_id, ingredient_id)
    }

    /// Overwrite the stock, including its unit.
    pub fn set_pantry_quantity(
        &self,
        user_id: i64,
        ingredient_id: i64,
        quantity: Decimal,
        unit: &str,
    ) -> Result<PantryLine> {
        let unit = validate_unit(unit)?;
        let quantity = non_negative(quantity)?;
        self.require_user_and_ingredient(user_id, ingredient_id)?;

        self.conn().execute(
            "INSERT INTO pantry (user_id, ingredient_id, quantity_hundredths, unit, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, ingredient_id) DO UPDATE SET
                quantity_hundredths = excluded.quantity_hundredths,
                unit = excluded.unit,
                updated_at = excluded.updated_at",
            params![user_id, ingredient_id, quantity, unit, now()],
        )?;
        self.pantry_line(user_id, ingredient_id)
    }

    pub fn get_pantry_line(&self, user_id: i64, ingredient_id: i64) -> Result<Option<PantryLine>> {
        Ok(self
            .conn()
            .query_row(
                &format!("{PANTRY_SELECT} WHERE p.user_id = ?1 AND p.ingredient_id = ?2"),
                params![user_id, ingredient_id],
                Self::pantry_line_from_row,
            )
            .optional()?)
    }

    fn pantry_line(&self, user_id: i64, ingredient_id: i64) -> Result<PantryLine> {
        self.get_pantry_line(user_id, ingredient_id)?.ok_or_else(|| {
            Error::not_found(format!("Pantry line for ingredient {ingredient_id}"))
        })
    }

    pub fn list_pantry(&self, user_id: i64) -> Result<Vec<PantryLine>> {
        let mut stmt = self.conn().prepare(&format!(
            "{PANTRY_SELECT} WHERE p.user_id = ?1 ORDER BY i.name_key"
        ))?;
        let lines = stmt
            .query_map(params![user_id], Self::pantry_line_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    pub fn remove_pantry_line(&self, user_id: i64, ingredient_id: i64) -> Result<()> {
        let rows = self.conn().execute(
            "DELETE FROM pantry WHERE user_id = ?1 AND ingredient_id = ?2",
            params![user_id, ingredient_id],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!(
                "Pantry line for ingredient {ingredient_id}"
            )));
        }
        Ok(())
    }

    // --- Shopping list ---

    /// Manual addition. An auto-generated line touched this way becomes manual.
    pub fn add_shopping_quantity(
        &self,
        user_id: i64,
        ingredient_id: i64,
        delta: Decimal,
        unit: &str,
    ) -> Result<ShoppingLine> {
        let unit = validate_unit(unit)?;
        let delta = to_hundredths(delta)?;
        self.require_user_and_ingredient(user_id, ingredient_id)?;

        let rows = self.conn().execute(
            "INSERT INTO shopping
                (user_id, ingredient_id, quantity_hundredths, unit, source, checked, updated_at)
             VALUES (?1, ?2, MAX(0, ?3), ?4, ?5, 0, ?6)
             ON CONFLICT(user_id, ingredient_id) DO UPDATE SET
                quantity_hundredths = MAX(0, shopping.quantity_hundredths + ?3),
                source = excluded.source,
                updated_at = excluded.updated_at
             WHERE shopping.unit = excluded.unit",
            params![
                user_id,
                ingredient_id,
                delta,
                unit,
                ShoppingSource::Manual,
                now()
            ],
        )?;
        if rows == 0 {
            let stored = self
                .get_shopping_line(user_id, ingredient_id)?
                .map(|l| l.unit);
            return Err(unit_mismatch(ingredient_id, &unit, stored));
        }
        self.shopping_line(user_id, ingredient_id)
    }

    pub fn set_shopping_quantity(
        &self,
        user_id: i64,
        ingredient_id: i64,
        quantity: Decimal,
        unit: &str,
    ) -> Result<ShoppingLine> {
        let unit = validate_unit(unit)?;
        let quantity = non_negative(quantity)?;
        self.require_user_and_ingredient(user_id, ingredient_id)?;

        self.conn().execute(
            "INSERT INTO shopping
                (user_id, ingredient_id, quantity_hundredths, unit, source, checked, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
             ON CONFLICT(user_id, ingredient_id) DO UPDATE SET
                quantity_hundredths = excluded.quantity_hundredths,
                unit = excluded.unit,
                source = excluded.source,
                updated_at = excluded.updated_at",
            params![
                user_id,
                ingredient_id,
                quantity,
                unit,
                ShoppingSource::Manual,
                now()
            ],
        )?;
        self.shopping_line(user_id, ingredient_id)
    }

    /// Toggle the checked flag. `checked_at` is stamped only on the
    /// unchecked to checked edge and cleared when unchecking.
    pub fn set_shopping_checked(
        &self,
        user_id: i64,
        ingredient_id: i64,
        checked: bool,
    ) -> Result<ShoppingLine> {
        let rows = self.conn().execute(
            "UPDATE shopping SET
                checked_at = CASE
                    WHEN ?3 = 0 THEN NULL
                    WHEN checked = 0 THEN ?4
                    ELSE checked_at
                END,
                checked = ?3,
                updated_at = ?4
             WHERE user_id = ?1 AND ingredient_id = ?2",
            params![user_id, ingredient_id, checked, now()],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!(
                "Shopping line for ingredient {ingredient_id}"
            )));
        }
        self.shopping_line(user_id, ingredient_id)
    }

    pub fn get_shopping_line(
        &self,
        user_id: i64,
        ingredient_id: i64,
    ) -> Result<Option<ShoppingLine>> {
        Ok(self
            .conn()
            .query_row(
                &format!("{SHOPPING_SELECT} WHERE s.user_id = ?1 AND s.ingredient_id = ?2"),
                params![user_id, ingredient_id],
                Self::shopping_line_from_row,
            )
            .optional()?)
    }

    fn shopping_line(&self, user_id: i64, ingredient_id: i64) -> Result<ShoppingLine> {
        self.get_shopping_line(user_id, ingredient_id)?.ok_or_else(|| {
            Error::not_found(format!("Shopping line for ingredient {ingredient_id}"))
        })
    }

    pub fn list_shopping(&self, user_id: i64) -> Result<Vec<ShoppingLine>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SHOPPING_SELECT} WHERE s.user_id = ?1 ORDER BY s.checked, i.name_key"
        ))?;
        let lines = stmt
            .query_map(params![user_id], Self::shopping_line_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    pub fn remove_shopping_line(&self, user_id: i64, ingredient_id: i64) -> Result<()> {
        let rows = self.conn().execute(
            "DELETE FROM shopping WHERE user_id = ?1 AND ingredient_id = ?2",
            params![user_id, ingredient_id],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!(
                "Shopping line for ingredient {ingredient_id}"
            )));
        }
        Ok(())
    }

    /// Recompute the auto lines from the unvalidated meal plans in
    /// `[from, to]`, net of pantry stock held in the ingredient's unit.
    ///
    /// Manual lines are never modified. Auto lines keep their checked state
    /// when their quantity changes and are deleted once nothing is needed.
    pub fn generate_shopping_list(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ShoppingRegeneration> {
        if from > to {
            return Err(Error::invalid(format!(
                "Range start {from} is after its end {to}"
            )));
        }
        self.require_user(user_id)?;

        let tx = self.write_transaction()?;

        let needs: Vec<(i64, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT ri.ingredient_id, i.unit,
                        SUM(ri.quantity_hundredths) - COALESCE((
                            SELECT p.quantity_hundredths FROM pantry p
                            WHERE p.user_id = ?1
                              AND p.ingredient_id = ri.ingredient_id
                              AND p.unit = i.unit), 0) AS need
                 FROM meal_plans mp
                 JOIN recipe_ingredients ri ON ri.recipe_id = mp.recipe_id
                 JOIN ingredients i ON i.id = ri.ingredient_id
                 WHERE mp.user_id = ?1 AND mp.validated = 0
                   AND mp.date >= ?2 AND mp.date <= ?3
                 GROUP BY ri.ingredient_id, i.unit",
            )?;
            stmt.query_map(params![user_id, from, to], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let existing: HashMap<i64, (ShoppingSource, i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT ingredient_id, source, quantity_hundredths, unit
                 FROM shopping WHERE user_id = ?1",
            )?;
            stmt.query_map(params![user_id], |row| {
                Ok((row.get(0)?, (row.get(1)?, row.get(2)?, row.get(3)?)))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?
        };

        let mut report = ShoppingRegeneration::default();
        let mut still_needed = Vec::new();
        let stamp = now();

        for (ingredient_id, unit, need) in needs {
            if need <= 0 {
                continue;
            }
            still_needed.push(ingredient_id);
            match existing.get(&ingredient_id) {
                Some((ShoppingSource::Manual, _, _)) => {
                    report.kept_manual += 1;
                    continue;
                }
                Some((ShoppingSource::Auto, quantity, stored_unit))
                    if *quantity == need && *stored_unit == unit =>
                {
                    report.unchanged += 1;
                    continue;
                }
                _ => {}
            }

            // A manual line created since the snapshot wins over this write.
            let rows = tx.execute(
                "INSERT INTO shopping
                    (user_id, ingredient_id, quantity_hundredths, unit, source, checked, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                 ON CONFLICT(user_id, ingredient_id) DO UPDATE SET
                    quantity_hundredths = excluded.quantity_hundredths,
                    unit = excluded.unit,
                    updated_at = excluded.updated_at
                 WHERE shopping.source = excluded.source",
                params![
                    user_id,
                    ingredient_id,
                    need,
                    unit,
                    ShoppingSource::Auto,
                    stamp
                ],
            )?;
            match (rows, existing.contains_key(&ingredient_id)) {
                (0, _) => report.kept_manual += 1,
                (_, true) => report.updated += 1,
                (_, false) => report.added += 1,
            }
        }

        for (ingredient_id, (source, _, _)) in &existing {
            if *source == ShoppingSource::Auto && !still_needed.contains(ingredient_id) {
                report.removed += tx.execute(
                    "DELETE FROM shopping
                     WHERE user_id = ?1 AND ingredient_id = ?2 AND source = ?3",
                    params![user_id, ingredient_id, ShoppingSource::Auto],
                )?;
            }
        }

        tx.commit()?;
        tracing::info!(
            user_id,
            %from,
            %to,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            kept_manual = report.kept_manual,
            "regenerated shopping list"
        );
        Ok(report)
    }

    /// Move every checked shopping line into the pantry and drop it from
    /// the list, in one transaction.
    pub fn restock_from_shopping(&self, user_id: i64) -> Result<RestockSummary> {
        self.require_user(user_id)?;
        let tx = self.write_transaction()?;

        let checked: Vec<(i64, i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT ingredient_id, quantity_hundredths, unit
                 FROM shopping WHERE user_id = ?1 AND checked = 1",
            )?;
            stmt.query_map(params![user_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut summary = RestockSummary::default();
        let stamp = now();
        for (ingredient_id, quantity, unit) in checked {
            let rows = tx.execute(
                "INSERT INTO pantry (user_id, ingredient_id, quantity_hundredths, unit, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, ingredient_id) DO UPDATE SET
                    quantity_hundredths = pantry.quantity_hundredths + excluded.quantity_hundredths,
                    updated_at = excluded.updated_at
                 WHERE pantry.unit = excluded.unit",
                params![user_id, ingredient_id, quantity, unit, stamp],
            )?;
            if rows == 0 {
                tracing::warn!(
                    user_id,
                    ingredient_id,
                    %unit,
                    "pantry holds this ingredient in another unit, leaving it on the list"
                );
                summary.skipped += 1;
                continue;
            }
            tx.execute(
                "DELETE FROM shopping WHERE user_id = ?1 AND ingredient_id = ?2",
                params![user_id, ingredient_id],
            )?;
            summary.restocked += 1;
        }

        tx.commit()?;
        tracing::info!(
            user_id,
            restocked = summary.restocked,
            skipped = summary.skipped,
            "restocked pantry"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateAs, NewIngredient};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();
        (db, user.id)
    }

    fn ingredient(db: &Database, user_id: i64, name: &str, unit: &str) -> i64 {
        db.resolve_or_create_ingredient(user_id, &NewIngredient::new(name, unit), CreateAs::Private)
            .unwrap()
            .id
    }

    /// Recipe needing `quantity` of `ingredient_id`, planned on `date`.
    fn plan_with(
        db: &Database,
        user_id: i64,
        name: &str,
        ingredient_id: i64,
        quantity: &str,
        date: NaiveDate,
    ) -> i64 {
        let recipe = db.create_recipe(user_id, name, None).unwrap();
        db.set_recipe_ingredient(recipe.id, ingredient_id, dec(quantity)).unwrap();
        db.plan_meal(user_id, recipe.id, date).unwrap().id
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_add_pantry_quantity_merges() {
        let (db, user) = setup();
        let rice = ingredient(&db, user, "Riz", "g");

        let line = db.add_pantry_quantity(user, rice, dec("250"), "g").unwrap();
        assert_eq!(line.quantity, dec("250"));
        let line = db.add_pantry_quantity(user, rice, dec("0.5"), "G").unwrap();
        assert_eq!(line.quantity, dec("250.50"));
        assert_eq!(line.ingredient_name.as_deref(), Some("Riz"));
        assert_eq!(db.list_pantry(user).unwrap().len(), 1);
    }

    #[test]
    fn test_negative_delta_clamps_at_zero() {
        let (db, user) = setup();
        let milk = ingredient(&db, user, "Lait", "l");
        db.add_pantry_quantity(user, milk, dec("3.50"), "l").unwrap();
        let line = db.add_pantry_quantity(user, milk, dec("-100"), "l").unwrap();
        assert_eq!(line.quantity, Decimal::ZERO);
        assert_eq!(line.quantity.to_string(), "0.00");

        // First write of a negative delta also lands at zero.
        let eggs = ingredient(&db, user, "Oeufs", "piece");
        let line = db.add_pantry_quantity(user, eggs, dec("-2"), "piece").unwrap();
        assert_eq!(line.quantity, Decimal::ZERO);
    }

    #[test]
    fn test_decimal_additions_are_exact() {
        let (db, user) = setup();
        let salt = ingredient(&db, user, "Sel", "g");
        for _ in 0..10 {
            db.add_pantry_quantity(user, salt, dec("0.1"), "g").unwrap();
        }
        let line = db.get_pantry_line(user, salt).unwrap().unwrap();
        assert_eq!(line.quantity, dec("1.00"));
    }

    #[test]
    fn test_unit_mismatch_rejected() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        db.add_pantry_quantity(user, flour, dec("500"), "g").unwrap();
        let err = db.add_pantry_quantity(user, flour, dec("1"), "kg").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let line = db.get_pantry_line(user, flour).unwrap().unwrap();
        assert_eq!(line.quantity, dec("500"));
        assert_eq!(line.unit, "g");
    }

    #[test]
    fn test_set_pantry_quantity() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        db.add_pantry_quantity(user, flour, dec("500"), "g").unwrap();
        let line = db.set_pantry_quantity(user, flour, dec("1.5"), "kg").unwrap();
        assert_eq!(line.quantity, dec("1.5"));
        assert_eq!(line.unit, "kg");

        let err = db.set_pantry_quantity(user, flour, dec("-1"), "kg").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let line = db.set_pantry_quantity(user, flour, Decimal::ZERO, "kg").unwrap();
        assert_eq!(line.quantity, Decimal::ZERO);
    }

    #[test]
    fn test_unknown_ingredient_or_user() {
        let (db, user) = setup();
        assert!(matches!(
            db.add_pantry_quantity(user, 999, dec("1"), "g"),
            Err(Error::NotFound(_))
        ));
        let rice = ingredient(&db, user, "Riz", "g");
        assert!(matches!(
            db.add_shopping_quantity(999, rice, dec("1"), "g"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_lines() {
        let (db, user) = setup();
        let rice = ingredient(&db, user, "Riz", "g");
        db.add_pantry_quantity(user, rice, dec("1"), "g").unwrap();
        db.remove_pantry_line(user, rice).unwrap();
        assert!(db.get_pantry_line(user, rice).unwrap().is_none());
        assert!(matches!(
            db.remove_pantry_line(user, rice),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            db.remove_shopping_line(user, rice),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_checked_at_follows_transitions() {
        let (db, user) = setup();
        let bread = ingredient(&db, user, "Pain", "piece");
        db.add_shopping_quantity(user, bread, dec("1"), "piece").unwrap();

        let line = db.set_shopping_checked(user, bread, true).unwrap();
        assert!(line.checked);
        let first_checked_at = line.checked_at.unwrap();

        // Re-checking keeps the original timestamp.
        let line = db.set_shopping_checked(user, bread, true).unwrap();
        assert_eq!(line.checked_at, Some(first_checked_at));

        let line = db.set_shopping_checked(user, bread, false).unwrap();
        assert!(!line.checked);
        assert!(line.checked_at.is_none());

        assert!(matches!(
            db.set_shopping_checked(user, 999, true),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_generate_nets_pantry_and_keeps_checked_state() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        db.add_pantry_quantity(user, flour, dec("200"), "g").unwrap();
        plan_with(&db, user, "Pain", flour, "500", day(10));

        let report = db.generate_shopping_list(user, day(9), day(15)).unwrap();
        assert_eq!(report.added, 1);
        let line = db.get_shopping_line(user, flour).unwrap().unwrap();
        assert_eq!(line.quantity, dec("300"));
        assert_eq!(line.source, ShoppingSource::Auto);

        let checked = db.set_shopping_checked(user, flour, true).unwrap();
        assert!(checked.checked_at.is_some());

        let report = db.generate_shopping_list(user, day(9), day(15)).unwrap();
        assert_eq!(report.unchanged, 1);
        let line = db.get_shopping_line(user, flour).unwrap().unwrap();
        assert!(line.checked);
        assert_eq!(line.checked_at, checked.checked_at);

        // Quantity change preserves the checked flag too.
        db.add_pantry_quantity(user, flour, dec("100"), "g").unwrap();
        let report = db.generate_shopping_list(user, day(9), day(15)).unwrap();
        assert_eq!(report.updated, 1);
        let line = db.get_shopping_line(user, flour).unwrap().unwrap();
        assert_eq!(line.quantity, dec("200"));
        assert!(line.checked);
        assert_eq!(line.checked_at, checked.checked_at);
    }

    #[test]
    fn test_generate_sums_across_plans_and_respects_range() {
        let (db, user) = setup();
        let tomato = ingredient(&db, user, "Tomate", "piece");
        plan_with(&db, user, "Salade", tomato, "2", day(10));
        plan_with(&db, user, "Sauce", tomato, "3", day(11));
        plan_with(&db, user, "Gaspacho", tomato, "10", day(20));

        db.generate_shopping_list(user, day(10), day(11)).unwrap();
        let line = db.get_shopping_line(user, tomato).unwrap().unwrap();
        assert_eq!(line.quantity, dec("5"));
        assert_eq!(line.unit, "piece");
    }

    #[test]
    fn test_generate_ignores_validated_plans() {
        let (db, user) = setup();
        let tomato = ingredient(&db, user, "Tomate", "piece");
        let plan = plan_with(&db, user, "Salade", tomato, "2", day(10));
        db.validate_meal_plan(plan).unwrap();

        let report = db.generate_shopping_list(user, day(10), day(10)).unwrap();
        assert_eq!(report, ShoppingRegeneration::default());
        assert!(db.list_shopping(user).unwrap().is_empty());
    }

    #[test]
    fn test_generate_never_touches_manual_lines() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        db.add_shopping_quantity(user, flour, dec("1000"), "g").unwrap();
        plan_with(&db, user, "Pain", flour, "500", day(10));

        let report = db.generate_shopping_list(user, day(10), day(10)).unwrap();
        assert_eq!(report.kept_manual, 1);
        let line = db.get_shopping_line(user, flour).unwrap().unwrap();
        assert_eq!(line.quantity, dec("1000"));
        assert_eq!(line.source, ShoppingSource::Manual);
    }

    #[test]
    fn test_generate_removes_auto_lines_no_longer_needed() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        let milk = ingredient(&db, user, "Lait", "l");
        plan_with(&db, user, "Pain", flour, "500", day(10));
        db.add_shopping_quantity(user, milk, dec("1"), "l").unwrap();

        db.generate_shopping_list(user, day(10), day(10)).unwrap();
        db.set_shopping_checked(user, flour, true).unwrap();

        // Stock now covers the need: the checked auto line goes too.
        db.add_pantry_quantity(user, flour, dec("600"), "g").unwrap();
        let report = db.generate_shopping_list(user, day(10), day(10)).unwrap();
        assert_eq!(report.removed, 1);
        assert!(db.get_shopping_line(user, flour).unwrap().is_none());
        assert!(db.get_shopping_line(user, milk).unwrap().is_some());
    }

    #[test]
    fn test_manual_addition_converts_auto_line() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        plan_with(&db, user, "Pain", flour, "500", day(10));
        db.generate_shopping_list(user, day(10), day(10)).unwrap();

        let line = db.add_shopping_quantity(user, flour, dec("100"), "g").unwrap();
        assert_eq!(line.source, ShoppingSource::Manual);
        assert_eq!(line.quantity, dec("600"));

        db.add_pantry_quantity(user, flour, dec("1000"), "g").unwrap();
        db.generate_shopping_list(user, day(10), day(10)).unwrap();
        assert!(db.get_shopping_line(user, flour).unwrap().is_some());
    }

    #[test]
    fn test_generate_rejects_inverted_range() {
        let (db, user) = setup();
        assert!(matches!(
            db.generate_shopping_list(user, day(11), day(10)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_restock_moves_checked_lines() {
        let (db, user) = setup();
        let flour = ingredient(&db, user, "Farine", "g");
        let milk = ingredient(&db, user, "Lait", "l");
        let eggs = ingredient(&db, user, "Oeufs", "piece");
        db.add_pantry_quantity(user, flour, dec("200"), "g").unwrap();
        db.add_pantry_quantity(user, eggs, dec("1"), "box").unwrap();

        db.add_shopping_quantity(user, flour, dec("300"), "g").unwrap();
        db.add_shopping_quantity(user, milk, dec("1"), "l").unwrap();
        db.add_shopping_quantity(user, eggs, dec("6"), "piece").unwrap();
        db.set_shopping_checked(user, flour, true).unwrap();
        db.set_shopping_checked(user, eggs, true).unwrap();

        let summary = db.restock_from_shopping(user).unwrap();
        assert_eq!(summary, RestockSummary { restocked: 1, skipped: 1 });

        let flour_line = db.get_pantry_line(user, flour).unwrap().unwrap();
        assert_eq!(flour_line.quantity, dec("500"));
        assert!(db.get_shopping_line(user, flour).unwrap().is_none());
        assert!(db.get_shopping_line(user, milk).unwrap().is_some());
        assert!(db.get_shopping_line(user, eggs).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_adds_merge_into_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.db");
        let (user, rice) = {
            let db = Database::open(&path).unwrap();
            let user = db.ensure_user("alice").unwrap().id;
            (user, ingredient(&db, user, "Riz", "g"))
        };

        let connections: Vec<Database> = (0..4).map(|_| Database::open(&path).unwrap()).collect();
        std::thread::scope(|s| {
            for db in connections {
                s.spawn(move || {
                    for _ in 0..50 {
                        db.add_pantry_quantity(user, rice, dec("1.25"), "g").unwrap();
                        db.add_shopping_quantity(user, rice, dec("0.5"), "g").unwrap();
                    }
                });
            }
        });

        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_pantry(user).unwrap().len(), 1);
        assert_eq!(db.get_pantry_line(user, rice).unwrap().unwrap().quantity, dec("250"));
        assert_eq!(db.list_shopping(user).unwrap().len(), 1);
        assert_eq!(db.get_shopping_line(user, rice).unwrap().unwrap().quantity, dec("100"));
    }

    #[test]
    fn test_pantry_writes_racing_regeneration_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.db");
        let (user, flour) = {
            let db = Database::open(&path).unwrap();
            let user = db.ensure_user("alice").unwrap().id;
            let flour = ingredient(&db, user, "Farine", "g");
            db.add_pantry_quantity(user, flour, dec("100"), "g").unwrap();
            plan_with(&db, user, "Pain", flour, "500", day(10));
            (user, flour)
        };

        let planner = Database::open(&path).unwrap();
        let writer = Database::open(&path).unwrap();
        std::thread::scope(|s| {
            s.spawn(move || {
                for _ in 0..200 {
                    planner.generate_shopping_list(user, day(9), day(15)).unwrap();
                }
            });
            s.spawn(move || {
                for i in 0..200 {
                    let delta = if i % 2 == 0 { dec("1") } else { dec("-1") };
                    writer.add_pantry_quantity(user, flour, delta, "g").unwrap();
                }
            });
        });

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_pantry_line(user, flour).unwrap().unwrap().quantity, dec("100"));
        db.generate_shopping_list(user, day(9), day(15)).unwrap();
        assert_eq!(db.get_shopping_line(user, flour).unwrap().unwrap().quantity, dec("400"));
    }
}
