mod helpers;
mod ingredient;
mod jobs;
mod pantry;
mod plan;
mod prompt;
mod recipe;
mod shopping;
mod suggest;
mod user;

pub(crate) use helpers::{json_error, parse_date};
pub(crate) use ingredient::{cmd_ingredient_add, cmd_ingredient_list};
pub(crate) use jobs::{JobStep, cmd_jobs_run};
pub(crate) use pantry::{
    cmd_pantry_add, cmd_pantry_import, cmd_pantry_remove, cmd_pantry_set, cmd_pantry_show,
};
pub(crate) use plan::{cmd_plan_add, cmd_plan_delete, cmd_plan_list, cmd_plan_validate};
pub(crate) use prompt::{cmd_prompt_answer, cmd_prompt_list};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_add_step, cmd_recipe_create, cmd_recipe_delete,
    cmd_recipe_import, cmd_recipe_list, cmd_recipe_remove_ingredient, cmd_recipe_remove_step,
    cmd_recipe_show,
};
pub(crate) use shopping::{
    cmd_shopping_add, cmd_shopping_check, cmd_shopping_generate, cmd_shopping_remove,
    cmd_shopping_restock, cmd_shopping_show,
};
pub(crate) use suggest::{
    cmd_suggest_accept, cmd_suggest_dismiss, cmd_suggest_generate, cmd_suggest_show,
};
pub(crate) use user::{cmd_user_add, cmd_user_list};
