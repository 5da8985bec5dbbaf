use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::Database;
use larder_core::models::PantryLine;
use larder_core::pantry_import::{import_pantry, parse_pantry_csv};

use super::helpers::{
    fmt_quantity, parse_quantity, require_ingredient, resolve_ingredient, truncate,
};

pub(crate) fn cmd_pantry_add(
    db: &Database,
    user_id: i64,
    ingredient_name: &str,
    quantity_str: &str,
    unit: Option<&str>,
    json: bool,
) -> Result<()> {
    let delta = parse_quantity(quantity_str)?;
    let ingredient = resolve_ingredient(db, user_id, ingredient_name, unit)?;
    let unit = unit.unwrap_or(&ingredient.unit);
    let line = db.add_pantry_quantity(user_id, ingredient.id, delta, unit)?;
    print_line(&line, &ingredient.name, json)
}

pub(crate) fn cmd_pantry_set(
    db: &Database,
    user_id: i64,
    ingredient_name: &str,
    quantity_str: &str,
    unit: Option<&str>,
    json: bool,
) -> Result<()> {
    let quantity = parse_quantity(quantity_str)?;
    let ingredient = resolve_ingredient(db, user_id, ingredient_name, unit)?;
    let unit = unit.unwrap_or(&ingredient.unit);
    let line = db.set_pantry_quantity(user_id, ingredient.id, quantity, unit)?;
    print_line(&line, &ingredient.name, json)
}

pub(crate) fn cmd_pantry_remove(
    db: &Database,
    user_id: i64,
    ingredient_name: &str,
    json: bool,
) -> Result<()> {
    let ingredient = require_ingredient(db, user_id, ingredient_name, json)?;
    db.remove_pantry_line(user_id, ingredient.id)?;
    if json {
        println!("{}", serde_json::json!({ "removed": ingredient.name }));
    } else {
        let name = &ingredient.name;
        println!("Removed {name} from the pantry");
    }
    Ok(())
}

pub(crate) fn cmd_pantry_show(db: &Database, user_id: i64, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct PantryRow {
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Updated")]
        updated: String,
    }

    let lines = db.list_pantry(user_id)?;
    if lines.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("Pantry is empty");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    let rows: Vec<PantryRow> = lines
        .iter()
        .map(|l| PantryRow {
            name: truncate(l.ingredient_name.as_deref().unwrap_or("?"), 30),
            quantity: fmt_quantity(l.quantity),
            unit: l.unit.clone(),
            updated: l.updated_at.format("%Y-%m-%d").to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(1)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_pantry_import(
    db: &Database,
    user_id: i64,
    path: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let rows = parse_pantry_csv(file)?;

    if rows.is_empty() {
        if json {
            println!(
                "{}",
                serde_json::json!({ "error": "No rows found in CSV file" })
            );
        } else {
            eprintln!("No rows found in CSV file.");
        }
        return Ok(());
    }

    let summary = import_pantry(db, user_id, &rows, dry_run)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "rows_parsed": summary.rows_parsed,
                "ingredients_created": summary.ingredients_created,
                "ingredients_reused": summary.ingredients_reused,
                "lines_updated": summary.lines_updated,
            })
        );
    } else if dry_run {
        println!("Dry run, no changes made.\n");
        println!("  Rows parsed:          {}", summary.rows_parsed);
        println!("  Ingredients to create: {}", summary.ingredients_created);
        println!("  Ingredients reused:   {}", summary.ingredients_reused);
        println!("  Lines to update:      {}", summary.lines_updated);
    } else {
        println!("Import complete.\n");
        println!("  Rows parsed:          {}", summary.rows_parsed);
        println!("  Ingredients created:  {}", summary.ingredients_created);
        println!("  Ingredients reused:   {}", summary.ingredients_reused);
        println!("  Lines updated:        {}", summary.lines_updated);
    }

    Ok(())
}

fn print_line(line: &PantryLine, name: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(line)?);
    } else {
        let quantity = fmt_quantity(line.quantity);
        let unit = &line.unit;
        println!("Pantry: {name} = {quantity} {unit}");
    }
    Ok(())
}
