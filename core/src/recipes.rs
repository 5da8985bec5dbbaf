use rusqlite::{OptionalExtension, params};
use rust_decimal::Decimal;

use crate::db::{Database, is_unique_violation, now};
use crate::error::{Error, Result};
use crate::models::{
    Recipe, RecipeDetail, RecipeIngredient, RecipeStep, from_hundredths, to_hundredths,
};
use crate::normalize::slugify;

const RECIPE_COLUMNS: &str = "id, user_id, name, slug, servings, image_path, created_at, updated_at";

/// Upper bound on `-N` suffixes tried when a slug is taken.
const MAX_SLUG_SUFFIX: u32 = 1000;

impl Database {
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            slug: row.get(3)?,
            servings: row.get(4)?,
            image_path: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn recipe_ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeIngredient> {
        Ok(RecipeIngredient {
            id: row.get(0)?,
            recipe_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: from_hundredths(row.get(3)?),
            ingredient_name: row.get(4)?,
            unit: row.get(5)?,
        })
    }

    fn recipe_step_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeStep> {
        Ok(RecipeStep {
            id: row.get(0)?,
            recipe_id: row.get(1)?,
            position: row.get(2)?,
            instruction: row.get(3)?,
        })
    }

    /// Create a recipe. Its slug is unique per owner; collisions get `-2`,
    /// `-3`, ... appended.
    pub fn create_recipe(&self, user_id: i64, name: &str, servings: Option<i64>) -> Result<Recipe> {
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let base = slugify(&name);
        if base.is_empty() {
            return Err(Error::invalid("Recipe name must not be blank"));
        }
        if let Some(s) = servings.filter(|s| *s <= 0) {
            return Err(Error::invalid(format!("Servings must be positive, got {s}")));
        }
        self.require_user(user_id)?;

        let stamp = now();
        for n in 1..=MAX_SLUG_SUFFIX {
            let slug = if n == 1 { base.clone() } else { format!("{base}-{n}") };
            let inserted = self.conn().execute(
                "INSERT INTO recipes (user_id, name, slug, servings, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![user_id, name, slug, servings, stamp],
            );
            match inserted {
                Ok(_) => {
                    let id = self.conn().last_insert_rowid();
                    tracing::info!(recipe_id = id, user_id, %slug, "created recipe");
                    return self.get_recipe(id);
                }
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Err(Error::invalid(format!("Too many recipes named '{name}'")))
    }

    pub fn get_recipe(&self, id: i64) -> Result<Recipe> {
        self.conn()
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("Recipe {id}")))
    }

    /// Look a recipe up by display name or slug.
    pub fn find_recipe(&self, user_id: i64, name_or_slug: &str) -> Result<Option<Recipe>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE user_id = ?1 AND slug = ?2"),
                params![user_id, slugify(name_or_slug)],
                Self::recipe_from_row,
            )
            .optional()?)
    }

    pub fn list_recipes(&self, user_id: i64) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE user_id = ?1 ORDER BY slug"
        ))?;
        let recipes = stmt
            .query_map(params![user_id], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn get_recipe_detail(&self, id: i64) -> Result<RecipeDetail> {
        let recipe = self.get_recipe(id)?;
        Ok(RecipeDetail {
            steps: self.recipe_steps(id)?,
            ingredients: self.recipe_ingredients(id)?,
            recipe,
        })
    }

    /// Delete a recipe with its steps, lines and meal plans. Suggestions
    /// that pointed at it keep their row with the recipe cleared.
    pub fn delete_recipe(&self, id: i64) -> Result<()> {
        let rows = self
            .conn()
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::not_found(format!("Recipe {id}")));
        }
        tracing::info!(recipe_id = id, "deleted recipe");
        Ok(())
    }

    pub fn set_recipe_image(&self, id: i64, image_path: Option<&str>) -> Result<Recipe> {
        let rows = self.conn().execute(
            "UPDATE recipes SET image_path = ?1, updated_at = ?2 WHERE id = ?3",
            params![image_path, now(), id],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!("Recipe {id}")));
        }
        self.get_recipe(id)
    }

    fn touch_recipe(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE recipes SET updated_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }

    // --- Ingredient lines ---

    /// Set the quantity of an ingredient in a recipe, replacing any previous
    /// line. The quantity is in the ingredient's own unit.
    pub fn set_recipe_ingredient(
        &self,
        recipe_id: i64,
        ingredient_id: i64,
        quantity: Decimal,
    ) -> Result<RecipeIngredient> {
        let hundredths = to_hundredths(quantity)?;
        if hundredths <= 0 {
            return Err(Error::invalid(format!(
                "Recipe quantity must be positive, got {quantity}"
            )));
        }
        let recipe = self.get_recipe(recipe_id)?;
        let ingredient = self.get_ingredient(ingredient_id)?;
        if ingredient
            .scope
            .owner_user_id()
            .is_some_and(|owner| owner != recipe.user_id)
        {
            return Err(Error::invalid(format!(
                "Ingredient '{}' belongs to another user",
                ingredient.name
            )));
        }

        self.conn().execute(
            "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, quantity_hundredths)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(recipe_id, ingredient_id) DO UPDATE SET
                quantity_hundredths = excluded.quantity_hundredths",
            params![recipe_id, ingredient_id, hundredths],
        )?;
        self.touch_recipe(recipe_id)?;

        self.conn()
            .query_row(
                "SELECT ri.id, ri.recipe_id, ri.ingredient_id, ri.quantity_hundredths, i.name, i.unit
                 FROM recipe_ingredients ri JOIN ingredients i ON i.id = ri.ingredient_id
                 WHERE ri.recipe_id = ?1 AND ri.ingredient_id = ?2",
                params![recipe_id, ingredient_id],
                Self::recipe_ingredient_from_row,
            )
            .map_err(Error::from)
    }

    pub fn remove_recipe_ingredient(&self, recipe_id: i64, ingredient_id: i64) -> Result<()> {
        let rows = self.conn().execute(
            "DELETE FROM recipe_ingredients WHERE recipe_id = ?1 AND ingredient_id = ?2",
            params![recipe_id, ingredient_id],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!(
                "Ingredient {ingredient_id} in recipe {recipe_id}"
            )));
        }
        self.touch_recipe(recipe_id)
    }

    pub fn recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn().prepare(
            "SELECT ri.id, ri.recipe_id, ri.ingredient_id, ri.quantity_hundredths, i.name, i.unit
             FROM recipe_ingredients ri JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id = ?1
             ORDER BY i.name_key",
        )?;
        let lines = stmt
            .query_map(params![recipe_id], Self::recipe_ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    // --- Steps ---

    /// Append a step after the current last one.
    pub fn add_recipe_step(&self, recipe_id: i64, instruction: &str) -> Result<RecipeStep> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(Error::invalid("Step instruction must not be blank"));
        }
        self.get_recipe(recipe_id)?;

        self.conn().execute(
            "INSERT INTO recipe_steps (recipe_id, position, instruction)
             SELECT ?1, COALESCE(MAX(position), 0) + 1, ?2
             FROM recipe_steps WHERE recipe_id = ?1",
            params![recipe_id, instruction],
        )?;
        let id = self.conn().last_insert_rowid();
        self.touch_recipe(recipe_id)?;

        self.conn()
            .query_row(
                "SELECT id, recipe_id, position, instruction FROM recipe_steps WHERE id = ?1",
                params![id],
                Self::recipe_step_from_row,
            )
            .map_err(Error::from)
    }

    /// Remove the step at `position` and close the gap.
    pub fn remove_recipe_step(&self, recipe_id: i64, position: i64) -> Result<()> {
        let tx = self.write_transaction()?;
        let rows = tx.execute(
            "DELETE FROM recipe_steps WHERE recipe_id = ?1 AND position = ?2",
            params![recipe_id, position],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!(
                "Step {position} of recipe {recipe_id}"
            )));
        }

        // Ascending, one row at a time: each target slot is already free.
        let later: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM recipe_steps
                 WHERE recipe_id = ?1 AND position > ?2
                 ORDER BY position",
            )?;
            stmt.query_map(params![recipe_id, position], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        for id in later {
            tx.execute(
                "UPDATE recipe_steps SET position = position - 1 WHERE id = ?1",
                params![id],
            )?;
        }
        tx.execute(
            "UPDATE recipes SET updated_at = ?1 WHERE id = ?2",
            params![now(), recipe_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn recipe_steps(&self, recipe_id: i64) -> Result<Vec<RecipeStep>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, recipe_id, position, instruction FROM recipe_steps
             WHERE recipe_id = ?1 ORDER BY position",
        )?;
        let steps = stmt
            .query_map(params![recipe_id], Self::recipe_step_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(steps)
    }
}
