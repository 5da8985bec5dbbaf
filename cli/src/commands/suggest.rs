use anyhow::Result;
use chrono::NaiveDate;

use larder_core::Database;
use larder_core::models::{DailyMealSuggestion, SuggestionContext, SuggestionStatus};
use larder_core::suggestions::SuggestionSource;

use super::helpers::exit_not_found;

/// Get or create the suggestion for `date`. `today` marks rows created on
/// the way into the app rather than by an explicit request.
pub(crate) fn cmd_suggest_generate(
    db: &Database,
    user_id: i64,
    date: NaiveDate,
    today: bool,
    source: &dyn SuggestionSource,
    json: bool,
) -> Result<()> {
    let context = if today {
        SuggestionContext::TodayAuto
    } else {
        SuggestionContext::Manual
    };
    let (suggestion, created) = db.generate_suggestion(user_id, date, context, source)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "suggestion": suggestion, "created": created })
        );
    } else {
        print_suggestion(db, &suggestion)?;
    }
    Ok(())
}

pub(crate) fn cmd_suggest_show(
    db: &Database,
    user_id: i64,
    date: NaiveDate,
    json: bool,
) -> Result<()> {
    let Some(suggestion) = db.get_suggestion_for(user_id, date)? else {
        exit_not_found(&format!("No suggestion for {date}"), json);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&suggestion)?);
    } else {
        print_suggestion(db, &suggestion)?;
    }
    Ok(())
}

pub(crate) fn cmd_suggest_accept(db: &Database, user_id: i64, id: i64, json: bool) -> Result<()> {
    owned_suggestion(db, user_id, id, json)?;
    let suggestion = db.accept_suggestion(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&suggestion)?);
    } else {
        print_suggestion(db, &suggestion)?;
    }
    Ok(())
}

pub(crate) fn cmd_suggest_dismiss(db: &Database, user_id: i64, id: i64, json: bool) -> Result<()> {
    owned_suggestion(db, user_id, id, json)?;
    let suggestion = db.dismiss_suggestion(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&suggestion)?);
    } else {
        print_suggestion(db, &suggestion)?;
    }
    Ok(())
}

fn owned_suggestion(
    db: &Database,
    user_id: i64,
    id: i64,
    json: bool,
) -> Result<DailyMealSuggestion> {
    match db.get_suggestion(id) {
        Ok(s) if s.user_id == user_id => Ok(s),
        Ok(_) | Err(larder_core::Error::NotFound(_)) => {
            exit_not_found(&format!("Suggestion {id} not found"), json)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_suggestion(db: &Database, suggestion: &DailyMealSuggestion) -> Result<()> {
    let date = suggestion.date;
    let id = suggestion.id;
    let recipe = match suggestion.recipe_id {
        Some(recipe_id) => Some(db.get_recipe(recipe_id)?.name),
        None => None,
    };
    match (suggestion.status, recipe) {
        (SuggestionStatus::NonePossible, _) => {
            println!("{date}: nothing the pantry can cover right now");
        }
        (_, None) => println!("{date}: suggestion {id} is {} (recipe deleted)", suggestion.status),
        (SuggestionStatus::Proposed, Some(name)) => {
            println!("{date}: how about {name}?");
            println!("Accept with: larder suggest accept {id}");
        }
        (SuggestionStatus::Accepted, Some(name)) => println!("{date}: {name} is on the plan"),
        (SuggestionStatus::Dismissed, Some(name)) => println!("{date}: {name} (dismissed)"),
    }
    Ok(())
}
