use anyhow::Result;
use std::process;
use tabled::{Table, Tabled, settings::Style};

use larder_core::Database;

pub(crate) fn cmd_user_add(db: &Database, name: &str, json: bool) -> Result<()> {
    let user = db.ensure_user(name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        let name = &user.name;
        let id = user.id;
        println!("User: {name} (id: {id})");
    }
    Ok(())
}

pub(crate) fn cmd_user_list(db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Since")]
        since: String,
    }

    let users = db.list_users()?;
    if users.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No users yet");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            name: u.name.clone(),
            since: u.created_at.format("%Y-%m-%d").to_string(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}
