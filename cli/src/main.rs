mod commands;
mod config;
mod push;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    JobStep, cmd_ingredient_add, cmd_ingredient_list, cmd_jobs_run, cmd_pantry_add,
    cmd_pantry_import, cmd_pantry_remove, cmd_pantry_set, cmd_pantry_show, cmd_plan_add,
    cmd_plan_delete, cmd_plan_list, cmd_plan_validate, cmd_prompt_answer, cmd_prompt_list,
    cmd_recipe_add_ingredient, cmd_recipe_add_step, cmd_recipe_create, cmd_recipe_delete,
    cmd_recipe_import, cmd_recipe_list, cmd_recipe_remove_ingredient, cmd_recipe_remove_step,
    cmd_recipe_show, cmd_shopping_add, cmd_shopping_check, cmd_shopping_generate,
    cmd_shopping_remove, cmd_shopping_restock, cmd_shopping_show, cmd_suggest_accept,
    cmd_suggest_dismiss, cmd_suggest_generate, cmd_suggest_show, cmd_user_add, cmd_user_list,
    json_error, parse_date,
};
use crate::config::Config;
use crate::push::{LogNotifier, WebhookNotifier};
use larder_core::Database;
use larder_core::models::{PromptAnswer, PromptStatus};
use larder_core::notify::PushNotifier;
use larder_core::suggestions::PantryMatcher;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "A local-first meal planner: pantry, recipes, shopping list and daily suggestions"
)]
struct Cli {
    /// User to act as (default: $LARDER_USER or "default")
    #[arg(short, long, global = true)]
    user: Option<String>,
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage the ingredient catalog
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommands,
    },
    /// Track what is in stock
    Pantry {
        #[command(subcommand)]
        command: PantryCommands,
    },
    /// Build and work through the shopping list
    Shopping {
        #[command(subcommand)]
        command: ShoppingCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Plan meals on dates
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Daily "what to cook" suggestions
    Suggest {
        #[command(subcommand)]
        command: SuggestCommands,
    },
    /// "Did you cook it?" prompts
    Prompt {
        #[command(subcommand)]
        command: PromptCommands,
    },
    /// Scheduled maintenance jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (use 0.0.0.0 for LAN access)
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user (or show the existing one with that name)
    Add {
        /// User name
        name: String,
    },
    /// List users
    List,
}

#[derive(Subcommand)]
enum IngredientCommands {
    /// Add an ingredient, reusing any visible one with the same name
    Add {
        /// Ingredient name
        name: String,
        /// Unit quantities are measured in (e.g. g, ml, piece)
        #[arg(long)]
        unit: String,
        /// Category (e.g. dairy, produce)
        #[arg(long)]
        category: Option<String>,
        /// Add to the shared catalog instead of your private one
        #[arg(long)]
        global: bool,
    },
    /// List ingredients visible to you
    List {
        /// Filter by name
        #[arg(short, long)]
        search: Option<String>,
    },
}

#[derive(Subcommand)]
enum PantryCommands {
    /// Add to (or, with a negative quantity, take from) the stock
    Add {
        /// Ingredient name
        ingredient: String,
        /// Quantity to add (e.g. 250, -1, 1,5)
        #[arg(allow_negative_numbers = true)]
        quantity: String,
        /// Unit (default: the ingredient's unit; required for new ingredients)
        #[arg(long)]
        unit: Option<String>,
    },
    /// Overwrite the stock
    Set {
        /// Ingredient name
        ingredient: String,
        /// New quantity
        quantity: String,
        /// Unit (default: the ingredient's unit)
        #[arg(long)]
        unit: Option<String>,
    },
    /// Show the pantry
    Show,
    /// Remove an ingredient from the pantry
    Remove {
        /// Ingredient name
        ingredient: String,
    },
    /// Import stock from a CSV file (Ingredient,Quantity,Unit[,Category])
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Preview without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ShoppingCommands {
    /// Rebuild the list from planned meals
    Generate {
        /// First day to cover (YYYY-MM-DD, today, tomorrow; default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of days to cover
        #[arg(short, long, default_value = "7")]
        days: u32,
    },
    /// Show the shopping list
    Show,
    /// Add an item by hand
    Add {
        /// Ingredient name
        ingredient: String,
        /// Quantity to add
        #[arg(allow_negative_numbers = true)]
        quantity: String,
        /// Unit (default: the ingredient's unit; required for new ingredients)
        #[arg(long)]
        unit: Option<String>,
    },
    /// Check an item off
    Check {
        /// Ingredient name
        ingredient: String,
    },
    /// Un-check an item
    Uncheck {
        /// Ingredient name
        ingredient: String,
    },
    /// Remove an item
    Remove {
        /// Ingredient name
        ingredient: String,
    },
    /// Move checked items into the pantry
    Restock,
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new recipe
    Create {
        /// Recipe name
        name: String,
        /// Number of servings
        #[arg(short, long)]
        servings: Option<i64>,
    },
    /// Set an ingredient's quantity in a recipe
    AddIngredient {
        /// Recipe name or slug
        recipe: String,
        /// Ingredient name
        ingredient: String,
        /// Quantity in the ingredient's unit
        quantity: String,
        /// Unit (required when the ingredient is new)
        #[arg(long)]
        unit: Option<String>,
    },
    /// Remove an ingredient from a recipe
    RemoveIngredient {
        /// Recipe name or slug
        recipe: String,
        /// Ingredient name
        ingredient: String,
    },
    /// Append a step
    AddStep {
        /// Recipe name or slug
        recipe: String,
        /// Instruction text
        instruction: String,
    },
    /// Remove a step by its position
    RemoveStep {
        /// Recipe name or slug
        recipe: String,
        /// Step number (1-based)
        position: i64,
    },
    /// Show a recipe
    Show {
        /// Recipe name or slug
        recipe: String,
    },
    /// List recipes
    List,
    /// Delete a recipe
    Delete {
        /// Recipe name or slug
        recipe: String,
    },
    /// Import a recipe's ingredients from a Cooklang (.cook) file
    Import {
        /// Path to the .cook file
        file: PathBuf,
        /// Override recipe name
        #[arg(long)]
        name: Option<String>,
        /// Override servings
        #[arg(long)]
        servings: Option<i64>,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Plan a recipe on a date
    Add {
        /// Recipe name or slug
        recipe: String,
        /// Date (YYYY-MM-DD, today, tomorrow; default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// List planned meals
    List {
        /// First day to show (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
    },
    /// Mark a planned meal as cooked and take it out of the pantry
    Validate {
        /// Meal plan ID
        id: i64,
    },
    /// Delete a planned meal
    Delete {
        /// Meal plan ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum SuggestCommands {
    /// Today's suggestion, created on first request
    Today,
    /// Create the suggestion for a date if it does not exist yet
    Generate {
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show the suggestion for a date without creating one
    Show {
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Accept a suggestion, planning its recipe
    Accept {
        /// Suggestion ID
        id: i64,
    },
    /// Dismiss a suggestion
    Dismiss {
        /// Suggestion ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    /// List prompts
    List {
        /// Only prompts with this status: pending, sent, answered, expired
        #[arg(long)]
        status: Option<PromptStatus>,
    },
    /// Answer a prompt
    Answer {
        /// Prompt ID
        id: i64,
        /// yes or no
        answer: PromptAnswer,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// Run the scheduled jobs once
    Run {
        /// Date to run for (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Run a single step instead of all of them
        #[arg(long, value_enum)]
        only: Option<JobStep>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    init_tracing(&cli.command);

    if let Err(e) = run(cli).await {
        if let Some(larder_core::Error::NotFound(_)) = e.downcast_ref::<larder_core::Error>() {
            let message = e.to_string();
            if json {
                println!("{}", json_error(&message));
            } else {
                eprintln!("{message}");
            }
            process::exit(2);
        }
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Logs go to stderr. Long-running commands default to `info`, the rest to
/// `warn`; `RUST_LOG` overrides both.
fn init_tracing(command: &Commands) {
    let default = match command {
        Commands::Serve { .. } | Commands::Jobs { .. } => "warn,larder=info,larder_core=info",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_notifier(config: &Config) -> Result<Arc<dyn PushNotifier>> {
    Ok(match &config.push_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str())?),
        None => {
            tracing::warn!("LARDER_PUSH_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    })
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let json = cli.json;
    let user_name = cli.user.unwrap_or_else(|| config.default_user.clone());
    let user = || db.ensure_user(&user_name).map(|u| u.id);
    let matcher = PantryMatcher {
        recent_days: config.jobs.suggestion_recent_days,
    };

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Add { name } => cmd_user_add(&db, &name, json),
            UserCommands::List => cmd_user_list(&db, json),
        },
        Commands::Ingredient { command } => match command {
            IngredientCommands::Add {
                name,
                unit,
                category,
                global,
            } => cmd_ingredient_add(&db, user()?, &name, &unit, category, global, json),
            IngredientCommands::List { search } => {
                cmd_ingredient_list(&db, user()?, search.as_deref(), json)
            }
        },
        Commands::Pantry { command } => match command {
            PantryCommands::Add {
                ingredient,
                quantity,
                unit,
            } => cmd_pantry_add(&db, user()?, &ingredient, &quantity, unit.as_deref(), json),
            PantryCommands::Set {
                ingredient,
                quantity,
                unit,
            } => cmd_pantry_set(&db, user()?, &ingredient, &quantity, unit.as_deref(), json),
            PantryCommands::Show => cmd_pantry_show(&db, user()?, json),
            PantryCommands::Remove { ingredient } => {
                cmd_pantry_remove(&db, user()?, &ingredient, json)
            }
            PantryCommands::Import { file, dry_run } => {
                cmd_pantry_import(&db, user()?, &file, dry_run, json)
            }
        },
        Commands::Shopping { command } => match command {
            ShoppingCommands::Generate { from, days } => {
                cmd_shopping_generate(&db, user()?, parse_date(from)?, days, json)
            }
            ShoppingCommands::Show => cmd_shopping_show(&db, user()?, json),
            ShoppingCommands::Add {
                ingredient,
                quantity,
                unit,
            } => cmd_shopping_add(&db, user()?, &ingredient, &quantity, unit.as_deref(), json),
            ShoppingCommands::Check { ingredient } => {
                cmd_shopping_check(&db, user()?, &ingredient, true, json)
            }
            ShoppingCommands::Uncheck { ingredient } => {
                cmd_shopping_check(&db, user()?, &ingredient, false, json)
            }
            ShoppingCommands::Remove { ingredient } => {
                cmd_shopping_remove(&db, user()?, &ingredient, json)
            }
            ShoppingCommands::Restock => cmd_shopping_restock(&db, user()?, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create { name, servings } => {
                cmd_recipe_create(&db, user()?, &name, servings, json)
            }
            RecipeCommands::AddIngredient {
                recipe,
                ingredient,
                quantity,
                unit,
            } => cmd_recipe_add_ingredient(
                &db,
                user()?,
                &recipe,
                &ingredient,
                &quantity,
                unit.as_deref(),
                json,
            ),
            RecipeCommands::RemoveIngredient { recipe, ingredient } => {
                cmd_recipe_remove_ingredient(&db, user()?, &recipe, &ingredient, json)
            }
            RecipeCommands::AddStep {
                recipe,
                instruction,
            } => cmd_recipe_add_step(&db, user()?, &recipe, &instruction, json),
            RecipeCommands::RemoveStep { recipe, position } => {
                cmd_recipe_remove_step(&db, user()?, &recipe, position, json)
            }
            RecipeCommands::Show { recipe } => cmd_recipe_show(&db, user()?, &recipe, json),
            RecipeCommands::List => cmd_recipe_list(&db, user()?, json),
            RecipeCommands::Delete { recipe } => cmd_recipe_delete(&db, user()?, &recipe, json),
            RecipeCommands::Import {
                file,
                name,
                servings,
            } => cmd_recipe_import(&db, user()?, &file, name, servings, json),
        },
        Commands::Plan { command } => match command {
            PlanCommands::Add { recipe, date } => {
                cmd_plan_add(&db, user()?, &recipe, parse_date(date)?, json)
            }
            PlanCommands::List { from, days } => {
                cmd_plan_list(&db, user()?, parse_date(from)?, days, json)
            }
            PlanCommands::Validate { id } => cmd_plan_validate(&db, user()?, id, json),
            PlanCommands::Delete { id } => cmd_plan_delete(&db, user()?, id, json),
        },
        Commands::Suggest { command } => match command {
            SuggestCommands::Today => {
                cmd_suggest_generate(&db, user()?, parse_date(None)?, true, &matcher, json)
            }
            SuggestCommands::Generate { date } => {
                cmd_suggest_generate(&db, user()?, parse_date(date)?, false, &matcher, json)
            }
            SuggestCommands::Show { date } => {
                cmd_suggest_show(&db, user()?, parse_date(date)?, json)
            }
            SuggestCommands::Accept { id } => cmd_suggest_accept(&db, user()?, id, json),
            SuggestCommands::Dismiss { id } => cmd_suggest_dismiss(&db, user()?, id, json),
        },
        Commands::Prompt { command } => match command {
            PromptCommands::List { status } => cmd_prompt_list(&db, user()?, status, json),
            PromptCommands::Answer { id, answer } => {
                cmd_prompt_answer(&db, user()?, id, answer, json)
            }
        },
        Commands::Jobs { command } => match command {
            JobsCommands::Run { date, only } => {
                let notifier = build_notifier(&config)?;
                cmd_jobs_run(
                    &db,
                    parse_date(date)?,
                    only,
                    notifier.as_ref(),
                    &matcher,
                    &config.jobs,
                    json,
                )
            }
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            let notifier = build_notifier(&config)?;
            server::start_server(
                db,
                port,
                &bind,
                api_key,
                new_api_key,
                notifier,
                config.jobs,
            )
            .await
        }
    }
}
