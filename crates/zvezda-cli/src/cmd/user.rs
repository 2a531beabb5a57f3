use crate::output::{print_json, print_table};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use std::io::{BufRead, IsTerminal};
use std::path::Path;
use zvezda_core::credentials::{validate_username, Credential, UserDb};
use zvezda_core::password;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug)]
pub enum UserSubcommand {
    /// Add a user; the password is read from the terminal or stdin
    Add {
        /// Login name used for HTTP basic auth
        username: String,
    },
    /// Replace a user's password
    Update {
        /// Existing user
        username: String,
    },
    /// List users
    List,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(db_path: &Path, subcommand: UserSubcommand, json: bool) -> Result<()> {
    match subcommand {
        UserSubcommand::Add { username } => add(db_path, &username, json),
        UserSubcommand::Update { username } => update(db_path, &username, json),
        UserSubcommand::List => list(db_path, json),
    }
}

fn open_db(db_path: &Path) -> Result<UserDb> {
    UserDb::open(db_path).with_context(|| {
        format!(
            "cannot open credential database {} (is `zvezda serve` running?)",
            db_path.display()
        )
    })
}

// ---------------------------------------------------------------------------
// add / update
// ---------------------------------------------------------------------------

fn add(db_path: &Path, username: &str, json: bool) -> Result<()> {
    validate_username(username)?;
    let db = open_db(db_path)?;
    let hash = read_new_password()?;
    db.create(&Credential::new(username, hash))?;
    tracing::info!(%username, "user added");

    if json {
        print_json(&serde_json::json!({ "username": username, "action": "added" }))?;
    } else {
        println!("Added user '{username}'.");
    }
    Ok(())
}

fn update(db_path: &Path, username: &str, json: bool) -> Result<()> {
    let db = open_db(db_path)?;
    let hash = read_new_password()?;
    db.update_hash(username, &hash)?;
    tracing::info!(%username, "password updated");

    if json {
        print_json(&serde_json::json!({ "username": username, "action": "updated" }))?;
    } else {
        println!("Updated password for '{username}'.");
    }
    Ok(())
}

/// Read, check and hash a new password.
fn read_new_password() -> Result<String> {
    let password = read_password("Password: ")?;
    password::validate_new_password(&password)?;
    Ok(password::hash_password(&password)?)
}

/// Prompt without echo on a terminal; read one line from stdin otherwise so
/// provisioning scripts can pipe the password in.
fn read_password(prompt: &str) -> Result<String> {
    if std::io::stdin().is_terminal() {
        return rpassword::prompt_password(prompt).context("failed to read password");
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct UserRow<'a> {
    username: &'a str,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

fn list(db_path: &Path, json: bool) -> Result<()> {
    let users = open_db(db_path)?.list()?;

    if json {
        let rows: Vec<UserRow> = users
            .iter()
            .map(|u| UserRow {
                username: &u.username,
                created_at: u.created_at,
                last_used_at: u.last_used_at,
            })
            .collect();
        return print_json(&rows);
    }

    if users.is_empty() {
        println!("No users. Add one with `zvezda user add <name>`.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = users
        .iter()
        .map(|u| {
            vec![
                u.username.clone(),
                format_time(u.created_at),
                u.last_used_at
                    .map(format_time)
                    .unwrap_or_else(|| "never".to_string()),
            ]
        })
        .collect();
    print_table(&["USERNAME", "CREATED", "LAST USED"], rows);
    Ok(())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
