use anyhow::{Result, bail};
use chrono::{Days, NaiveDate};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::Database;
use larder_core::models::ShoppingLine;

use super::helpers::{
    fmt_quantity, parse_quantity, require_ingredient, resolve_ingredient, truncate,
};

/// Rebuild the auto lines from the plans in `[from, from + days - 1]`.
pub(crate) fn cmd_shopping_generate(
    db: &Database,
    user_id: i64,
    from: NaiveDate,
    days: u32,
    json: bool,
) -> Result<()> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let to = from
        .checked_add_days(Days::new(u64::from(days - 1)))
        .unwrap_or(NaiveDate::MAX);
    let summary = db.generate_shopping_list(user_id, from, to)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "from": from, "to": to, "summary": summary })
        );
    } else {
        println!("Shopping list for {from} to {to}:\n");
        println!("  Added:       {}", summary.added);
        println!("  Updated:     {}", summary.updated);
        println!("  Unchanged:   {}", summary.unchanged);
        println!("  Removed:     {}", summary.removed);
        println!("  Kept manual: {}", summary.kept_manual);
    }
    Ok(())
}

pub(crate) fn cmd_shopping_show(db: &Database, user_id: i64, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct ShoppingRow {
        #[tabled(rename = "")]
        checked: &'static str,
        #[tabled(rename = "Ingredient")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Source")]
        source: String,
    }

    let lines = db.list_shopping(user_id)?;
    if lines.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("Shopping list is empty");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    let rows: Vec<ShoppingRow> = lines
        .iter()
        .map(|l| ShoppingRow {
            checked: if l.checked { "[x]" } else { "[ ]" },
            name: truncate(l.ingredient_name.as_deref().unwrap_or("?"), 30),
            quantity: fmt_quantity(l.quantity),
            unit: l.unit.clone(),
            source: l.source.to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_shopping_add(
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
    let line = db.add_shopping_quantity(user_id, ingredient.id, delta, unit)?;
    print_line(&line, &ingredient.name, json)
}

pub(crate) fn cmd_shopping_check(
    db: &Database,
    user_id: i64,
    ingredient_name: &str,
    checked: bool,
    json: bool,
) -> Result<()> {
    let ingredient = require_ingredient(db, user_id, ingredient_name, json)?;
    let line = db.set_shopping_checked(user_id, ingredient.id, checked)?;
    print_line(&line, &ingredient.name, json)
}

pub(crate) fn cmd_shopping_remove(
    db: &Database,
    user_id: i64,
    ingredient_name: &str,
    json: bool,
) -> Result<()> {
    let ingredient = require_ingredient(db, user_id, ingredient_name, json)?;
    db.remove_shopping_line(user_id, ingredient.id)?;
    if json {
        println!("{}", serde_json::json!({ "removed": ingredient.name }));
    } else {
        let name = &ingredient.name;
        println!("Removed {name} from the shopping list");
    }
    Ok(())
}

pub(crate) fn cmd_shopping_restock(db: &Database, user_id: i64, json: bool) -> Result<()> {
    let summary = db.restock_from_shopping(user_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if summary.restocked == 0 && summary.skipped == 0 {
        println!("Nothing checked off yet");
    } else {
        let restocked = summary.restocked;
        println!("Moved {restocked} checked line(s) into the pantry");
        if summary.skipped > 0 {
            let skipped = summary.skipped;
            eprintln!("Warning: {skipped} line(s) kept on the list because their unit differs from the pantry");
        }
    }
    Ok(())
}

fn print_line(line: &ShoppingLine, name: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(line)?);
    } else {
        let mark = if line.checked { "[x]" } else { "[ ]" };
        let quantity = fmt_quantity(line.quantity);
        let unit = &line.unit;
        println!("{mark} {name}: {quantity} {unit}");
    }
    Ok(())
}
