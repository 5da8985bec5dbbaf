pub mod db;
pub mod error;
pub mod ingredients;
pub mod jobs;
pub mod ledger;
pub mod meal_plans;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod pantry_import;
pub mod prompts;
pub mod recipes;
pub mod suggestions;

pub use db::Database;
pub use error::{Error, Result};
