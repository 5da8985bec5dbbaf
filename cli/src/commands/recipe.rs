use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::Database;
use larder_core::models::{CreateAs, NewIngredient, RecipeDetail, validate_unit};

use super::helpers::{
    fmt_quantity, parse_positive_quantity, require_ingredient, require_recipe,
    resolve_ingredient, truncate,
};

pub(crate) fn cmd_recipe_create(
    db: &Database,
    user_id: i64,
    name: &str,
    servings: Option<i64>,
    json: bool,
) -> Result<()> {
    let recipe = db.create_recipe(user_id, name, servings)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let id = recipe.id;
        let slug = &recipe.slug;
        println!("Created recipe: {} (id: {id}, slug: {slug})", recipe.name);
        println!("Add ingredients with: larder recipe add-ingredient {slug} <ingredient> <quantity>");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_add_ingredient(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    ingredient_name: &str,
    quantity_str: &str,
    unit: Option<&str>,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    let quantity = parse_positive_quantity(quantity_str)?;
    let ingredient = resolve_ingredient(db, user_id, ingredient_name, unit)?;
    if let Some(unit) = unit {
        let unit = validate_unit(unit)?;
        if unit != ingredient.unit {
            bail!(
                "'{}' is measured in {}, not {unit}",
                ingredient.name,
                ingredient.unit
            );
        }
    }

    let line = db.set_recipe_ingredient(recipe.id, ingredient.id, quantity)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&line)?);
    } else {
        let qty = fmt_quantity(line.quantity);
        let unit = &line.unit;
        let name = &line.ingredient_name;
        println!("{}: {qty} {unit} of {name}", recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_remove_ingredient(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    ingredient_name: &str,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    let ingredient = require_ingredient(db, user_id, ingredient_name, json)?;
    db.remove_recipe_ingredient(recipe.id, ingredient.id)?;
    if json {
        println!("{}", serde_json::json!({ "removed": ingredient.name }));
    } else {
        println!("Removed {} from {}", ingredient.name, recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_add_step(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    instruction: &str,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    let step = db.add_recipe_step(recipe.id, instruction)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&step)?);
    } else {
        let position = step.position;
        println!("{}: step {position} added", recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_remove_step(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    position: i64,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    db.remove_recipe_step(recipe.id, position)?;
    if json {
        println!("{}", serde_json::json!({ "removed_step": position }));
    } else {
        println!("{}: step {position} removed", recipe.name);
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    let detail = db.get_recipe_detail(recipe.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }
    print_detail(&detail);
    Ok(())
}

fn print_detail(detail: &RecipeDetail) {
    let name = &detail.recipe.name;
    let slug = &detail.recipe.slug;
    println!("=== {name} ({slug}) ===");
    if let Some(servings) = detail.recipe.servings {
        println!("  Servings: {servings}");
    }

    println!("\n  INGREDIENTS:");
    if detail.ingredients.is_empty() {
        println!("    (none)");
    }
    for ing in &detail.ingredients {
        let qty = fmt_quantity(ing.quantity);
        let unit = &ing.unit;
        let iname = &ing.ingredient_name;
        println!("    {iname}: {qty} {unit}");
    }

    println!("\n  STEPS:");
    if detail.steps.is_empty() {
        println!("    (none)");
    }
    for step in &detail.steps {
        let position = step.position;
        let instruction = &step.instruction;
        println!("    {position}. {instruction}");
    }
}

pub(crate) fn cmd_recipe_list(db: &Database, user_id: i64, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Slug")]
        slug: String,
        #[tabled(rename = "Servings")]
        servings: String,
    }

    let recipes = db.list_recipes(user_id)?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 30),
            slug: truncate(&r.slug, 30),
            servings: r.servings.map(|s| s.to_string()).unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(3)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_recipe_delete(
    db: &Database,
    user_id: i64,
    recipe_name: &str,
    json: bool,
) -> Result<()> {
    let recipe = require_recipe(db, user_id, recipe_name, json)?;
    db.delete_recipe(recipe.id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": recipe.id }));
    } else {
        println!("Deleted recipe {} (id: {})", recipe.name, recipe.id);
    }
    Ok(())
}

/// An ingredient line read from a Cooklang file.
#[derive(Debug, Clone, PartialEq)]
struct CooklangLine {
    name: String,
    quantity: Option<Decimal>,
    unit: Option<String>,
}

struct ParsedCooklang {
    title: Option<String>,
    servings: Option<i64>,
    lines: Vec<CooklangLine>,
}

fn parse_cooklang(input: &str) -> Result<ParsedCooklang> {
    let (recipe_data, _report) = cooklang::parse(input)
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to parse Cooklang file: {e}"))?;

    let title = recipe_data.metadata.title().map(String::from);
    let servings = recipe_data
        .metadata
        .servings()
        .and_then(|s| s.as_number().map(i64::from));

    let converter = cooklang::Converter::default();
    let lines = recipe_data
        .group_ingredients(&converter)
        .iter()
        .map(|gi| {
            // Take the first quantity from the grouped quantities (if any)
            let (quantity, unit) =
                gi.quantity
                    .iter()
                    .next()
                    .map_or((None, None), |qty: &cooklang::Quantity| {
                        let value = match qty.value() {
                            cooklang::Value::Number(n) => Decimal::try_from(n.value()).ok(),
                            cooklang::Value::Range { start, .. } => {
                                Decimal::try_from(start.value()).ok()
                            }
                            cooklang::Value::Text(t) => t.trim().replace(',', ".").parse().ok(),
                        };
                        (value.map(|v| v.round_dp(2)), qty.unit().map(String::from))
                    });
            CooklangLine {
                name: gi.ingredient.display_name().to_string(),
                quantity,
                unit,
            }
        })
        .collect();

    Ok(ParsedCooklang {
        title,
        servings,
        lines,
    })
}

/// Import the ingredient list of a Cooklang recipe. Steps are not imported.
pub(crate) fn cmd_recipe_import(
    db: &Database,
    user_id: i64,
    file: &Path,
    name_override: Option<String>,
    servings_override: Option<i64>,
    json: bool,
) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let parsed = parse_cooklang(&input)?;

    let name = name_override
        .or(parsed.title)
        .or_else(|| file.file_stem().and_then(|s| s.to_str()).map(String::from))
        .context("Could not determine recipe name. Use --name to specify one")?;

    if parsed.lines.is_empty() {
        bail!("No ingredients found in recipe");
    }

    let servings = servings_override.or(parsed.servings);
    let (recipe_id, warnings) = import_recipe(db, user_id, &name, servings, &parsed.lines)?;

    for w in &warnings {
        eprintln!("Warning: {w}");
    }

    let detail = db.get_recipe_detail(recipe_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        let rname = &detail.recipe.name;
        let ing_count = detail.ingredients.len();
        let skipped = warnings.len();
        println!("Imported recipe: {rname} ({ing_count} ingredients, {skipped} skipped)");
    }

    Ok(())
}

/// Create the recipe and its ingredient lines, or nothing at all.
fn import_recipe(
    db: &Database,
    user_id: i64,
    name: &str,
    servings: Option<i64>,
    lines: &[CooklangLine],
) -> Result<(i64, Vec<String>)> {
    db.atomically(|db| -> Result<_> {
        let recipe = db.create_recipe(user_id, name, servings)?;
        let warnings = import_lines(db, user_id, recipe.id, lines)?;
        Ok((recipe.id, warnings))
    })
}

fn import_lines(
    db: &Database,
    user_id: i64,
    recipe_id: i64,
    lines: &[CooklangLine],
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    for line in lines {
        let name = &line.name;
        let Some(quantity) = line.quantity.filter(|q| *q > Decimal::ZERO) else {
            warnings.push(format!("{name}: no numeric quantity, skipped"));
            continue;
        };
        let unit = line.unit.as_deref().map(validate_unit).transpose()?;

        let ingredient = match db.find_ingredient(user_id, name)? {
            Some(found) => found,
            None => {
                let unit = unit.as_deref().unwrap_or("piece");
                db.resolve_or_create_ingredient(
                    user_id,
                    &NewIngredient::new(name.as_str(), unit),
                    CreateAs::Private,
                )?
            }
        };
        if let Some(unit) = unit.filter(|u| *u != ingredient.unit) {
            warnings.push(format!(
                "{name}: quantity given in {unit} but the ingredient is measured in {}, skipped",
                ingredient.unit
            ));
            continue;
        }

        db.set_recipe_ingredient(recipe_id, ingredient.id, quantity)?;
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db.ensure_user("alice").unwrap().id;
        (db, user)
    }

    #[test]
    fn test_parse_cooklang_ingredients() {
        let parsed =
            parse_cooklang("Mix @flour{200%g} with @eggs{2} and a pinch of @salt.\n").unwrap();
        let flour = parsed.lines.iter().find(|l| l.name == "flour").unwrap();
        assert_eq!(flour.quantity, Some(Decimal::new(200, 0)));
        assert_eq!(flour.unit.as_deref(), Some("g"));
        let eggs = parsed.lines.iter().find(|l| l.name == "eggs").unwrap();
        assert_eq!(eggs.quantity, Some(Decimal::new(2, 0)));
        assert_eq!(eggs.unit, None);
        let salt = parsed.lines.iter().find(|l| l.name == "salt").unwrap();
        assert_eq!(salt.quantity, None);
    }

    #[test]
    fn test_import_lines_creates_and_skips() {
        let (db, user) = setup();
        let butter = db
            .resolve_or_create_ingredient(
                user,
                &NewIngredient::new("Butter", "g"),
                CreateAs::Private,
            )
            .unwrap();
        let recipe = db.create_recipe(user, "Crêpes", Some(4)).unwrap();

        let lines = vec![
            CooklangLine {
                name: "Flour".into(),
                quantity: Some(Decimal::new(250, 0)),
                unit: Some("G".into()),
            },
            CooklangLine {
                name: "butter".into(),
                quantity: Some(Decimal::new(2, 0)),
                unit: Some("tbsp".into()),
            },
            CooklangLine {
                name: "Salt".into(),
                quantity: None,
                unit: None,
            },
        ];
        let warnings = import_lines(&db, user, recipe.id, &lines).unwrap();
        assert_eq!(warnings.len(), 2);

        let ingredients = db.recipe_ingredients(recipe.id).unwrap();
        assert_eq!(ingredients.len(), 1);
        assert_eq!(ingredients[0].ingredient_name, "Flour");
        assert_eq!(ingredients[0].unit, "g");
        assert_eq!(ingredients[0].quantity, Decimal::new(250, 0));
        assert!(ingredients.iter().all(|i| i.ingredient_id != butter.id));
    }

    #[test]
    fn test_import_lines_defaults_unit_to_piece() {
        let (db, user) = setup();
        let recipe = db.create_recipe(user, "Omelette", None).unwrap();
        let lines = vec![CooklangLine {
            name: "Eggs".into(),
            quantity: Some(Decimal::new(3, 0)),
            unit: None,
        }];
        assert!(import_lines(&db, user, recipe.id, &lines).unwrap().is_empty());
        let eggs = db.find_ingredient(user, "eggs").unwrap().unwrap();
        assert_eq!(eggs.unit, "piece");
    }

    #[test]
    fn test_import_recipe_failure_leaves_nothing_behind() {
        let (db, user) = setup();
        let lines = vec![
            CooklangLine {
                name: "Farine".into(),
                quantity: Some(Decimal::new(500, 0)),
                unit: Some("g".into()),
            },
            CooklangLine {
                name: "Lait".into(),
                quantity: Some(Decimal::new(1, 0)),
                unit: Some("  ".into()),
            },
        ];

        assert!(import_recipe(&db, user, "Pâte à crêpes", None, &lines).is_err());
        assert!(db.list_recipes(user).unwrap().is_empty());
        assert!(db.find_ingredient(user, "farine").unwrap().is_none());

        let (recipe_id, warnings) =
            import_recipe(&db, user, "Pâte à crêpes", None, &lines[..1]).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(db.recipe_ingredients(recipe_id).unwrap().len(), 1);
        assert_eq!(db.get_recipe(recipe_id).unwrap().slug, "pate-a-crepes");
    }
}
