use std::collections::HashMap;
use std::io::Read;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CreateAs, NewIngredient};
use crate::normalize::normalize;

/// A single stock line parsed from a pantry CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct PantryRow {
    /// 1-based line in the source file, header included.
    pub line: usize,
    pub ingredient: String,
    pub quantity: Decimal,
    pub unit: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PantryImportSummary {
    pub rows_parsed: usize,
    pub ingredients_created: usize,
    pub ingredients_reused: usize,
    pub lines_updated: usize,
}

/// Parse a pantry CSV from any reader.
///
/// Expected header: `Ingredient,Quantity,Unit[,Category]`, matched
/// case-insensitively. Rows with an empty ingredient are skipped.
pub fn parse_pantry_csv<R: Read>(reader: R) -> Result<Vec<PantryRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let required = |name: &str| {
        col(name).ok_or_else(|| Error::invalid(format!("Missing required column: {name}")))
    };

    let idx_ingredient = required("Ingredient")?;
    let idx_quantity = required("Quantity")?;
    let idx_unit = required("Unit")?;
    let idx_category = col("Category");

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let line = i + 2;

        let ingredient = record.get(idx_ingredient).unwrap_or("").to_string();
        if ingredient.is_empty() {
            continue;
        }

        let raw_quantity = record.get(idx_quantity).unwrap_or("");
        let quantity = raw_quantity.replace(',', ".").parse::<Decimal>().map_err(|_| {
            Error::invalid(format!("Line {line}: invalid quantity '{raw_quantity}'"))
        })?;
        let unit = record.get(idx_unit).unwrap_or("").to_string();
        if unit.is_empty() {
            return Err(Error::invalid(format!("Line {line}: missing unit")));
        }
        let category = idx_category
            .and_then(|i| record.get(i))
            .filter(|c| !c.is_empty())
            .map(String::from);

        rows.push(PantryRow {
            line,
            ingredient,
            quantity,
            unit,
            category,
        });
    }

    Ok(rows)
}

/// Add parsed rows to the user's pantry, resolving each ingredient name
/// through the catalog. All rows apply or none do. With `dry_run` nothing
/// is written and the summary reports what would happen.
pub fn import_pantry(
    db: &Database,
    user_id: i64,
    rows: &[PantryRow],
    dry_run: bool,
) -> Result<PantryImportSummary> {
    db.require_user(user_id)?;

    let mut summary = PantryImportSummary {
        rows_parsed: rows.len(),
        ..PantryImportSummary::default()
    };
    // name key -> resolved id (None: would be created, dry run only)
    let mut seen: HashMap<String, Option<i64>> = HashMap::new();

    let tx = db.write_transaction()?;
    for row in rows {
        let key = normalize(&row.ingredient);
        let ingredient_id = if let Some(cached) = seen.get(&key) {
            summary.ingredients_reused += 1;
            *cached
        } else {
            let existing = db.find_ingredient(user_id, &row.ingredient)?;
            if existing.is_some() {
                summary.ingredients_reused += 1;
            } else {
                summary.ingredients_created += 1;
            }
            let id = match (existing, dry_run) {
                (Some(found), _) => Some(found.id),
                (None, true) => None,
                (None, false) => {
                    let mut new = NewIngredient::new(&row.ingredient, &row.unit);
                    new.category.clone_from(&row.category);
                    Some(db.resolve_or_create_ingredient(user_id, &new, CreateAs::Private)?.id)
                }
            };
            seen.insert(key, id);
            id
        };

        if !dry_run {
            if let Some(id) = ingredient_id {
                db.add_pantry_quantity(user_id, id, row.quantity, &row.unit)
                    .map_err(|err| match err {
                        Error::InvalidInput(msg) => {
                            Error::invalid(format!("Line {}: {msg}", row.line))
                        }
                        other => other,
                    })?;
            }
        }
        summary.lines_updated += 1;
    }

    if dry_run {
        drop(tx);
    } else {
        tx.commit()?;
        tracing::info!(
            user_id,
            rows = summary.rows_parsed,
            created = summary.ingredients_created,
            "imported pantry"
        );
    }
    Ok(summary)
}
