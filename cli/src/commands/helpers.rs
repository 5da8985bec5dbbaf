use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::process;

use larder_core::Database;
use larder_core::models::{CreateAs, Ingredient, NewIngredient, Recipe};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse a decimal quantity, accepting a comma as the decimal separator.
pub(crate) fn parse_quantity(s: &str) -> Result<Decimal> {
    let normalized = s.trim().replace(',', ".");
    normalized
        .parse::<Decimal>()
        .with_context(|| format!("Invalid quantity '{s}'. Use a number like '250' or '1.5'"))
}

/// Like [`parse_quantity`] but rejects zero and negatives.
pub(crate) fn parse_positive_quantity(s: &str) -> Result<Decimal> {
    let q = parse_quantity(s)?;
    if q <= Decimal::ZERO {
        bail!("Quantity must be greater than 0");
    }
    Ok(q)
}

/// Render a stored quantity without trailing zeros: `250.00` -> `250`.
pub(crate) fn fmt_quantity(q: Decimal) -> String {
    q.normalize().to_string()
}

/// Resolve an ingredient name for `user_id`. Unknown names are created as
/// private ingredients only when a unit is supplied.
pub(crate) fn resolve_ingredient(
    db: &Database,
    user_id: i64,
    name: &str,
    unit: Option<&str>,
) -> Result<Ingredient> {
    if let Some(found) = db.find_ingredient(user_id, name)? {
        return Ok(found);
    }
    let Some(unit) = unit else {
        bail!("Unknown ingredient '{name}'. Pass --unit to create it");
    };
    Ok(db.resolve_or_create_ingredient(
        user_id,
        &NewIngredient::new(name, unit),
        CreateAs::Private,
    )?)
}

/// Look up an existing ingredient, exiting with status 2 when it is unknown.
pub(crate) fn require_ingredient(
    db: &Database,
    user_id: i64,
    name: &str,
    json: bool,
) -> Result<Ingredient> {
    match db.find_ingredient(user_id, name)? {
        Some(found) => Ok(found),
        None => exit_not_found(&format!("Ingredient '{name}' not found"), json),
    }
}

/// Look up one of the user's recipes by name or slug, exiting with status 2
/// when it is unknown.
pub(crate) fn require_recipe(
    db: &Database,
    user_id: i64,
    name_or_slug: &str,
    json: bool,
) -> Result<Recipe> {
    match db.find_recipe(user_id, name_or_slug)? {
        Some(found) => Ok(found),
        None => exit_not_found(&format!("Recipe '{name_or_slug}' not found"), json),
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing record and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow".to_string())).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("250").unwrap(), Decimal::new(250, 0));
        assert_eq!(parse_quantity(" 1,5 ").unwrap(), Decimal::new(15, 1));
        assert_eq!(parse_quantity("-2").unwrap(), Decimal::new(-2, 0));
        assert!(parse_quantity("lots").is_err());
    }

    #[test]
    fn test_parse_positive_quantity() {
        assert!(parse_positive_quantity("0").is_err());
        assert!(parse_positive_quantity("-1").is_err());
        assert_eq!(parse_positive_quantity("0.25").unwrap(), Decimal::new(25, 2));
    }

    #[test]
    fn test_fmt_quantity() {
        assert_eq!(fmt_quantity(Decimal::new(25000, 2)), "250");
        assert_eq!(fmt_quantity(Decimal::new(150, 2)), "1.5");
        assert_eq!(fmt_quantity(Decimal::new(0, 2)), "0");
    }

    #[test]
    fn test_resolve_ingredient_needs_unit_to_create() {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap().id;
        assert!(resolve_ingredient(&db, user, "Miel", None).is_err());
        let created = resolve_ingredient(&db, user, "Miel", Some("g")).unwrap();
        let found = resolve_ingredient(&db, user, " miel ", None).unwrap();
        assert_eq!(created.id, found.id);
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("Müsli", 10), "Müsli");
    }
}
