use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Enums persisted as lowercase TEXT columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::invalid(format!(
                        "Invalid {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse().map_err(|_| {
                    FromSqlError::Other(format!("unknown {} '{text}'", stringify!($name)).into())
                })
            }
        }
    };
}

// --- Quantities ---

/// Quantities are persisted as integer hundredths so SQL-side merges
/// (`MAX(0, quantity + delta)`) stay exact.
pub fn to_hundredths(quantity: Decimal) -> Result<i64> {
    quantity
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|d| d.to_i64())
        .ok_or_else(|| Error::invalid(format!("Quantity {quantity} is out of range")))
}

#[must_use]
pub fn from_hundredths(hundredths: i64) -> Decimal {
    Decimal::new(hundredths, 2)
}

/// Trim and lowercase a unit, rejecting blanks.
pub fn validate_unit(unit: &str) -> Result<String> {
    let unit = unit.trim().to_lowercase();
    if unit.is_empty() {
        return Err(Error::invalid("Unit must not be blank"));
    }
    Ok(unit)
}

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// --- Ingredients ---

/// Visibility tier of an ingredient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Scope {
    Global,
    Private(i64),
}

impl Scope {
    #[must_use]
    pub fn owner_user_id(self) -> Option<i64> {
        match self {
            Self::Global => None,
            Self::Private(user_id) => Some(user_id),
        }
    }

    #[must_use]
    pub fn from_owner(owner_user_id: Option<i64>) -> Self {
        owner_user_id.map_or(Self::Global, Self::Private)
    }
}

/// Where a newly created ingredient lands when resolution finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateAs {
    /// Normal user flows: the new row is visible to its creator only.
    Private,
    /// Catalog seeding: the new row is shared by every user.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub name_key: String,
    pub unit: String,
    pub category: Option<String>,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Ingredient {
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image_path.is_some()
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.scope == Scope::Global
    }
}

#[derive(Debug, Clone)]
pub struct NewIngredient {
    pub name: String,
    pub unit: String,
    pub category: Option<String>,
}

impl NewIngredient {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            category: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

// --- Ledger ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PantryLine {
    pub id: i64,
    pub user_id: i64,
    pub ingredient_id: i64,
    pub quantity: Decimal,
    pub unit: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShoppingSource {
    Manual,
    Auto,
}

text_enum!(ShoppingSource {
    Manual => "manual",
    Auto => "auto",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingLine {
    pub id: i64,
    pub user_id: i64,
    pub ingredient_id: i64,
    pub quantity: Decimal,
    pub unit: String,
    pub source: ShoppingSource,
    pub checked: bool,
    pub checked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
}

/// Outcome of regenerating the auto portion of a shopping list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShoppingRegeneration {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    /// Ingredients still needed but held by a manual line, left untouched.
    pub kept_manual: usize,
}

// --- Recipes ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub slug: String,
    pub servings: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipe {
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image_path.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeStep {
    pub id: i64,
    pub recipe_id: i64,
    pub position: i64,
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub quantity: Decimal,
    pub ingredient_name: String,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub steps: Vec<RecipeStep>,
    pub ingredients: Vec<RecipeIngredient>,
}

// --- Meal plans ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealPlan {
    pub id: i64,
    pub user_id: i64,
    pub recipe_id: i64,
    pub date: NaiveDate,
    pub validated: bool,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_name: Option<String>,
}

// --- Meal-cooked prompts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Pending,
    Sent,
    Answered,
    Expired,
}

text_enum!(PromptStatus {
    Pending => "pending",
    Sent => "sent",
    Answered => "answered",
    Expired => "expired",
});

impl PromptStatus {
    /// Answered and expired prompts never move again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptAnswer {
    Yes,
    No,
}

text_enum!(PromptAnswer {
    Yes => "yes",
    No => "no",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealCookedPrompt {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub status: PromptStatus,
    pub answer: Option<PromptAnswer>,
    pub sent_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// --- Daily suggestions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Proposed,
    NonePossible,
    Dismissed,
    Accepted,
}

text_enum!(SuggestionStatus {
    Proposed => "proposed",
    NonePossible => "none_possible",
    Dismissed => "dismissed",
    Accepted => "accepted",
});

/// Why a suggestion row was generated. Audit only; it never changes behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionContext {
    TodayAuto,
    CronBackfill,
    Manual,
}

text_enum!(SuggestionContext {
    TodayAuto => "today_auto",
    CronBackfill => "cron_backfill",
    Manual => "manual",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMealSuggestion {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub status: SuggestionStatus,
    pub recipe_id: Option<i64>,
    pub meal_plan_id: Option<i64>,
    pub context: SuggestionContext,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hundredths_round_trip_keeps_two_decimals() {
        let q: Decimal = "3.5".parse().unwrap();
        assert_eq!(to_hundredths(q).unwrap(), 350);
        assert_eq!(from_hundredths(350).to_string(), "3.50");
        assert_eq!(from_hundredths(0).to_string(), "0.00");
    }

    #[test]
    fn test_hundredths_rounds_extra_precision() {
        let q: Decimal = "0.125".parse().unwrap();
        assert_eq!(to_hundredths(q).unwrap(), 13);
        let q: Decimal = "-0.125".parse().unwrap();
        assert_eq!(to_hundredths(q).unwrap(), -13);
    }

    #[test]
    fn test_repeated_additions_do_not_drift() {
        let step: Decimal = "0.1".parse().unwrap();
        let total = (0..1000).fold(0_i64, |acc, _| acc + to_hundredths(step).unwrap());
        assert_eq!(from_hundredths(total), Decimal::new(10000, 2));
    }

    #[test]
    fn test_validate_unit() {
        assert_eq!(validate_unit(" G ").unwrap(), "g");
        assert!(matches!(validate_unit("  "), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_text_enums_parse_case_insensitively() {
        assert_eq!("SENT".parse::<PromptStatus>().unwrap(), PromptStatus::Sent);
        assert_eq!(
            "none_possible".parse::<SuggestionStatus>().unwrap(),
            SuggestionStatus::NonePossible
        );
        assert_eq!(" yes ".parse::<PromptAnswer>().unwrap(), PromptAnswer::Yes);
        assert!("maybe".parse::<PromptAnswer>().is_err());
    }

    #[test]
    fn test_scope_owner_round_trip() {
        assert_eq!(Scope::from_owner(None), Scope::Global);
        assert_eq!(Scope::from_owner(Some(7)), Scope::Private(7));
        assert_eq!(Scope::Private(7).owner_user_id(), Some(7));
        assert_eq!(Scope::Global.owner_user_id(), None);
    }

    #[test]
    fn test_terminal_prompt_states() {
        assert!(PromptStatus::Answered.is_terminal());
        assert!(PromptStatus::Expired.is_terminal());
        assert!(!PromptStatus::Pending.is_terminal());
        assert!(!PromptStatus::Sent.is_terminal());
    }
}
