//! Two-tier ingredient catalog.
//!
//! A typed name resolves to at most one row: the global row for its key if
//! one exists, otherwise the caller's private row. Creation relies on the
//! unique indexes on `name_key`; an insert that loses a race re-selects the
//! winner instead of failing.

use rusqlite::{OptionalExtension, params};

use crate::db::{Database, is_unique_violation, now};
use crate::error::{Error, Result};
use crate::models::{CreateAs, Ingredient, NewIngredient, Scope, validate_unit};
use crate::normalize::normalize;

const INGREDIENT_COLUMNS: &str =
    "id, name, name_key, unit, category, owner_user_id, image_path, created_at";

fn name_key(name: &str) -> Result<String> {
    let key = normalize(name);
    if key.is_empty() {
        return Err(Error::invalid("Ingredient name must not be blank"));
    }
    Ok(key)
}

fn display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Database {
    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            name_key: row.get(2)?,
            unit: row.get(3)?,
            category: row.get(4)?,
            scope: Scope::from_owner(row.get(5)?),
            image_path: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// Resolve a typed name to the ingredient the user sees, creating it if
    /// nothing matches.
    ///
    /// A global row always wins over a private one with the same key. The
    /// unit and category of `new` only apply when a row is created.
    pub fn resolve_or_create_ingredient(
        &self,
        user_id: i64,
        new: &NewIngredient,
        create_as: CreateAs,
    ) -> Result<Ingredient> {
        let key = name_key(&new.name)?;
        let unit = validate_unit(&new.unit)?;

        if let Some(found) = self.lookup_visible(user_id, &key)? {
            return Ok(found);
        }

        self.require_user(user_id)?;
        let scope = match create_as {
            CreateAs::Private => Scope::Private(user_id),
            CreateAs::Global => Scope::Global,
        };
        self.insert_or_fetch_ingredient(scope, &key, new, &unit)
    }

    /// Catalog seeding: resolve against the global tier only.
    pub fn seed_global_ingredient(&self, new: &NewIngredient) -> Result<Ingredient> {
        let key = name_key(&new.name)?;
        let unit = validate_unit(&new.unit)?;
        if let Some(found) = self.lookup_global(&key)? {
            return Ok(found);
        }
        self.insert_or_fetch_ingredient(Scope::Global, &key, new, &unit)
    }

    /// Resolution without creation.
    pub fn find_ingredient(&self, user_id: i64, name: &str) -> Result<Option<Ingredient>> {
        let key = name_key(name)?;
        self.lookup_visible(user_id, &key)
    }

    pub fn get_ingredient(&self, id: i64) -> Result<Ingredient> {
        self.conn()
            .query_row(
                &format!("SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE id = ?1"),
                params![id],
                Self::ingredient_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("Ingredient {id}")))
    }

    /// Global rows plus the user's own private rows, hiding private rows
    /// shadowed by a global row with the same key.
    pub fn list_visible_ingredients(
        &self,
        user_id: i64,
        search: Option<&str>,
    ) -> Result<Vec<Ingredient>> {
        let pattern = search.map(|q| {
            let escaped = normalize(q)
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        });
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {INGREDIENT_COLUMNS} FROM ingredients i
             WHERE (i.owner_user_id IS NULL
                    OR (i.owner_user_id = ?1 AND NOT EXISTS (
                        SELECT 1 FROM ingredients g
                        WHERE g.owner_user_id IS NULL AND g.name_key = i.name_key)))
               AND (?2 IS NULL OR i.name_key LIKE ?2 ESCAPE '\\')
             ORDER BY i.name_key
             LIMIT 200"
        ))?;
        let ingredients = stmt
            .query_map(params![user_id, pattern], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn set_ingredient_image(&self, id: i64, image_path: Option<&str>) -> Result<Ingredient> {
        let rows = self.conn().execute(
            "UPDATE ingredients SET image_path = ?1 WHERE id = ?2",
            params![image_path, id],
        )?;
        if rows == 0 {
            return Err(Error::not_found(format!("Ingredient {id}")));
        }
        self.get_ingredient(id)
    }

    fn lookup_global(&self, key: &str) -> Result<Option<Ingredient>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {INGREDIENT_COLUMNS} FROM ingredients
                     WHERE owner_user_id IS NULL AND name_key = ?1"
                ),
                params![key],
                Self::ingredient_from_row,
            )
            .optional()?)
    }

    fn lookup_private(&self, user_id: i64, key: &str) -> Result<Option<Ingredient>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {INGREDIENT_COLUMNS} FROM ingredients
                     WHERE owner_user_id = ?1 AND name_key = ?2"
                ),
                params![user_id, key],
                Self::ingredient_from_row,
            )
            .optional()?)
    }

    fn lookup_visible(&self, user_id: i64, key: &str) -> Result<Option<Ingredient>> {
        if let Some(global) = self.lookup_global(key)? {
            return Ok(Some(global));
        }
        self.lookup_private(user_id, key)
    }

    /// Insert a row for `scope`/`key`; if a concurrent writer got there
    /// first, return its row.
    pub(crate) fn insert_or_fetch_ingredient(
        &self,
        scope: Scope,
        key: &str,
        new: &NewIngredient,
        unit: &str,
    ) -> Result<Ingredient> {
        let category = new
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let inserted = self.conn().execute(
            "INSERT INTO ingredients (name, name_key, unit, category, owner_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                display_name(&new.name),
                key,
                unit,
                category,
                scope.owner_user_id(),
                now()
            ],
        );

        match inserted {
            Ok(_) => {
                let id = self.conn().last_insert_rowid();
                tracing::info!(ingredient_id = id, name_key = key, ?scope, "created ingredient");
                self.get_ingredient(id)
            }
            Err(err) if is_unique_violation(&err) => {
                tracing::debug!(name_key = key, ?scope, "ingredient insert raced, re-selecting");
                let existing = match scope {
                    Scope::Global => self.lookup_global(key)?,
                    Scope::Private(user_id) => self.lookup_visible(user_id, key)?,
                };
                existing.ok_or(Error::Database(err))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_ingredients(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM ingredients", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_resolve_same_key_returns_same_row() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();

        let a = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("Tomate", "g"),
                CreateAs::Private,
            )
            .unwrap();
        let b = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new(" tomate ", "g"),
                CreateAs::Private,
            )
            .unwrap();
        let c = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("TOMATE", "kg"),
                CreateAs::Private,
            )
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(a.id, c.id);
        assert_eq!(a.name, "Tomate");
        assert_eq!(a.name_key, "tomate");
        assert_eq!(c.unit, "g");
        assert_eq!(a.scope, Scope::Private(user.id));
        assert_eq!(count_ingredients(&db), 1);
    }

    #[test]
    fn test_resolve_matches_across_diacritics() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();
        let a = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("Crème fraîche", "ml"),
                CreateAs::Private,
            )
            .unwrap();
        let b = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("creme  FRAICHE", "ml"),
                CreateAs::Private,
            )
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_global_shadows_private() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();

        let private = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("sel", "g"),
                CreateAs::Private,
            )
            .unwrap();
        let global = db.seed_global_ingredient(&NewIngredient::new("Sel", "g")).unwrap();
        assert_ne!(private.id, global.id);
        assert!(global.is_global());

        let resolved = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("Sel", "g"),
                CreateAs::Private,
            )
            .unwrap();
        assert_eq!(resolved.id, global.id);
        assert_eq!(count_ingredients(&db), 2);
    }

    #[test]
    fn test_global_hit_creates_no_private_row() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();
        let global = db
            .seed_global_ingredient(&NewIngredient::new("Sel", "g").with_category("epices"))
            .unwrap();

        for name in ["Sel", "SEL", "  sel"] {
            let resolved = db
                .resolve_or_create_ingredient(
                    user.id,
                    &NewIngredient::new(name, "g"),
                    CreateAs::Private,
                )
                .unwrap();
            assert_eq!(resolved.id, global.id);
        }
        assert_eq!(count_ingredients(&db), 1);
        assert_eq!(global.category.as_deref(), Some("epices"));
    }

    #[test]
    fn test_private_rows_are_per_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.ensure_user("alice").unwrap();
        let bob = db.ensure_user("bob").unwrap();

        let a = db
            .resolve_or_create_ingredient(
                alice.id,
                &NewIngredient::new("Miso", "g"),
                CreateAs::Private,
            )
            .unwrap();
        let b = db
            .resolve_or_create_ingredient(
                bob.id,
                &NewIngredient::new("miso", "g"),
                CreateAs::Private,
            )
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.scope, Scope::Private(bob.id));
    }

    #[test]
    fn test_create_as_global_is_shared() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.ensure_user("alice").unwrap();
        let bob = db.ensure_user("bob").unwrap();

        let a = db
            .resolve_or_create_ingredient(
                alice.id,
                &NewIngredient::new("Farine", "g"),
                CreateAs::Global,
            )
            .unwrap();
        let b = db
            .resolve_or_create_ingredient(
                bob.id,
                &NewIngredient::new("farine", "g"),
                CreateAs::Private,
            )
            .unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.is_global());
    }

    #[test]
    fn test_blank_name_and_unit_rejected() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();
        let err = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("   ", "g"),
                CreateAs::Private,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("Riz", " "),
                CreateAs::Private,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(count_ingredients(&db), 0);
    }

    #[test]
    fn test_unknown_user_cannot_create() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .resolve_or_create_ingredient(99, &NewIngredient::new("Riz", "g"), CreateAs::Private)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_insert_conflict_returns_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();
        let first = db
            .resolve_or_create_ingredient(
                user.id,
                &NewIngredient::new("Basilic", "g"),
                CreateAs::Private,
            )
            .unwrap();

        // Simulate the losing side of a race: lookup missed, insert collides.
        let again = db
            .insert_or_fetch_ingredient(
                Scope::Private(user.id),
                "basilic",
                &NewIngredient::new("Basilic", "g"),
                "g",
            )
            .unwrap();
        assert_eq!(again.id, first.id);

        let global = db.seed_global_ingredient(&NewIngredient::new("Poivre", "g")).unwrap();
        let again = db
            .insert_or_fetch_ingredient(
                Scope::Global,
                "poivre",
                &NewIngredient::new("poivre", "g"),
                "g",
            )
            .unwrap();
        assert_eq!(again.id, global.id);
        assert_eq!(count_ingredients(&db), 2);
    }

    #[test]
    fn test_concurrent_resolution_yields_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.db");
        let user_id = Database::open(&path).unwrap().ensure_user("alice").unwrap().id;

        let ids: Vec<i64> = std::thread::scope(|s| {
            let handles: Vec<_> = ["Tomate", " tomate ", "TOMATE", "tomate"]
                .into_iter()
                .map(|name| {
                    let path = path.clone();
                    s.spawn(move || {
                        let db = Database::open(&path).unwrap();
                        (0..10)
                            .map(|_| {
                                db.resolve_or_create_ingredient(
                                    user_id,
                                    &NewIngredient::new(name, "g"),
                                    CreateAs::Private,
                                )
                                .unwrap()
                                .id
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        let db = Database::open(&path).unwrap();
        assert_eq!(count_ingredients(&db), 1);
    }

    #[test]
    fn test_find_ingredient_does_not_create() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap();
        assert!(db.find_ingredient(user.id, "Ail").unwrap().is_none());
        assert_eq!(count_ingredients(&db), 0);
    }

    #[test]
    fn test_list_visible_hides_shadowed_and_foreign_rows() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.ensure_user("alice").unwrap();
        let bob = db.ensure_user("bob").unwrap();

        db.resolve_or_create_ingredient(
            alice.id,
            &NewIngredient::new("Sel", "g"),
            CreateAs::Private,
        )
        .unwrap();
        db.resolve_or_create_ingredient(
            alice.id,
            &NewIngredient::new("Câpres", "g"),
            CreateAs::Private,
        )
        .unwrap();
        db.resolve_or_create_ingredient(
            bob.id,
            &NewIngredient::new("Wasabi", "g"),
            CreateAs::Private,
        )
        .unwrap();
        let global_sel = db.seed_global_ingredient(&NewIngredient::new("sel", "g")).unwrap();

        let visible = db.list_visible_ingredients(alice.id, None).unwrap();
        let keys: Vec<&str> = visible.iter().map(|i| i.name_key.as_str()).collect();
        assert_eq!(keys, vec!["capres", "sel"]);
        assert_eq!(visible[1].id, global_sel.id);

        let searched = db.list_visible_ingredients(alice.id, Some("CAP")).unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].name, "Câpres");
    }

    #[test]
    fn test_set_ingredient_image() {
        let db = Database::open_in_memory().unwrap();
        let ing = db.seed_global_ingredient(&NewIngredient::new("Citron", "piece")).unwrap();
        assert!(!ing.has_image());
        let ing = db.set_ingredient_image(ing.id, Some("img/citron.png")).unwrap();
        assert!(ing.has_image());
        assert!(matches!(
            db.set_ingredient_image(999, None),
            Err(Error::NotFound(_))
        ));
    }
}
