use anyhow::{Result, bail};
use chrono::{Days, NaiveDate};
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::Database;
use larder_core::models::MealPlan;

use super::helpers::{exit_not_found, require_recipe, truncate};

pub(crate) fn cmd_plan_add(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    date: NaiveDate,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    let plan = db.plan_meal(user_id, recipe.id, date)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        let id = plan.id;
        println!("Planned {} on {date} (id: {id})", recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_plan_list(
    db: &Database,
    user_id: i64,
    from: NaiveDate,
    days: u32,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
        #[tabled(rename = "Cooked")]
        cooked: &'static str,
    }

    if days == 0 {
        bail!("--days must be at least 1");
    }
    let to = from
        .checked_add_days(Days::new(u64::from(days - 1)))
        .unwrap_or(NaiveDate::MAX);
    let plans = db.list_meal_plans(user_id, from, to)?;
    if plans.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("Nothing planned between {from} and {to}");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| PlanRow {
            id: p.id,
            date: p.date.format("%a %Y-%m-%d").to_string(),
            recipe: truncate(p.recipe_name.as_deref().unwrap_or("?"), 30),
            cooked: if p.validated { "yes" } else { "" },
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_plan_validate(db: &Database, user_id: i64, id: i64, json: bool) -> Result<()> {
    let plan = owned_plan(db, user_id, id, json)?;
    let was_validated = plan.validated;
    let plan = db.validate_meal_plan(plan.id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else if was_validated {
        println!("Meal plan {id} was already marked as cooked");
    } else {
        let recipe = plan.recipe_name.as_deref().unwrap_or("?");
        println!("Marked {recipe} ({}) as cooked, pantry updated", plan.date);
    }
    Ok(())
}

pub(crate) fn cmd_plan_delete(db: &Database, user_id: i64, id: i64, json: bool) -> Result<()> {
    let plan = owned_plan(db, user_id, id, json)?;
    db.delete_meal_plan(plan.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted meal plan {id}");
    }
    Ok(())
}

/// Plans are addressed by ID; one owned by another user reads as missing.
fn owned_plan(db: &Database, user_id: i64, id: i64, json: bool) -> Result<MealPlan> {
    match db.get_meal_plan(id) {
        Ok(plan) if plan.user_id == user_id => Ok(plan),
        Ok(_) | Err(larder_core::Error::NotFound(_)) => {
            exit_not_found(&format!("Meal plan {id} not found"), json)
        }
        Err(e) => Err(e.into()),
    }
}
