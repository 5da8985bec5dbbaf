use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::Database;
use larder_core::models::{CreateAs, Ingredient, NewIngredient};

use super::helpers::truncate;

pub(crate) fn cmd_ingredient_add(
    db: &Database,
    user_id: i64,
    name: &str,
    unit: &str,
    category: Option<String>,
    global: bool,
    json: bool,
) -> Result<()> {
    let mut new = NewIngredient::new(name, unit);
    if let Some(category) = category {
        new = new.with_category(category);
    }
    let ingredient = if global {
        db.seed_global_ingredient(&new)?
    } else {
        db.resolve_or_create_ingredient(user_id, &new, CreateAs::Private)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredient)?);
    } else {
        let name = &ingredient.name;
        let id = ingredient.id;
        let unit = &ingredient.unit;
        let scope = scope_label(&ingredient);
        println!("Ingredient: {name} (id: {id}, unit: {unit}, {scope})");
    }
    Ok(())
}

pub(crate) fn cmd_ingredient_list(
    db: &Database,
    user_id: i64,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Scope")]
        scope: &'static str,
    }

    let ingredients = db.list_visible_ingredients(user_id, search)?;
    if ingredients.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No ingredients found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&ingredients)?);
        return Ok(());
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| IngredientRow {
            id: i.id,
            name: truncate(&i.name, 30),
            unit: i.unit.clone(),
            category: i.category.clone().unwrap_or_default(),
            scope: scope_label(i),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

fn scope_label(ingredient: &Ingredient) -> &'static str {
    if ingredient.is_global() { "global" } else { "private" }
}
