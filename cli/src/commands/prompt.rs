use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::Database;
use larder_core::models::{PromptAnswer, PromptStatus};

use super::helpers::exit_not_found;

pub(crate) fn cmd_prompt_list(
    db: &Database,
    user_id: i64,
    status: Option<PromptStatus>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct PromptRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Answer")]
        answer: String,
    }

    let prompts = db.list_prompts(user_id, status)?;
    if prompts.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No prompts found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&prompts)?);
        return Ok(());
    }

    let rows: Vec<PromptRow> = prompts
        .iter()
        .map(|p| PromptRow {
            id: p.id,
            date: p.date.to_string(),
            status: p.status.to_string(),
            answer: p.answer.map(|a| a.to_string()).unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) fn cmd_prompt_answer(
    db: &Database,
    user_id: i64,
    id: i64,
    answer: PromptAnswer,
    json: bool,
) -> Result<()> {
    match db.get_prompt(id) {
        Ok(p) if p.user_id == user_id => {}
        Ok(_) | Err(larder_core::Error::NotFound(_)) => {
            exit_not_found(&format!("Prompt {id} not found"), json)
        }
        Err(e) => return Err(e.into()),
    }

    let prompt = db.answer_prompt(id, answer)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prompt)?);
    } else if prompt.answer == Some(answer) {
        println!("Prompt {id} for {}: answered {answer}", prompt.date);
    } else {
        println!("Prompt {id} for {} is already {}", prompt.date, prompt.status);
    }
    Ok(())
}
