//! Operator CLI for a local lesson deck database.
//!
//! # Responsibility
//! - Probe `lessondeck_core` linkage (`ping`, `version`).
//! - Export and import decks through the same JSON handlers clients use.
//! - Seed the local user and lesson directories.

use anyhow::{bail, Context, Result};
use lessondeck_core::db::{open_db, open_db_in_memory, share};
use lessondeck_core::{
    init_logging, DeckEndpoint, EngineConfig, ReplaceResponse, SqliteLessonDirectory,
    SqliteUserDirectory, UserRecord,
};
use log::info;
use rusqlite::Connection;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "lessondeck.toml";
const CONFIG_ENV: &str = "LESSONDECK_CONFIG";

const USAGE: &str = "usage: lessondeck [--config <path>] <command>

commands:
  ping
  version
  export <lesson-id>
  import <snapshot.json>
  seed-user <user-id> <name> [image-url]
  seed-lesson <lesson-id> <title> [resource-url]";

fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_config_path(&mut args)?;
    let config = EngineConfig::load_from_path(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .unwrap_or_default();
    init_logging(&config.logging)?;

    let Some((command, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };
    info!("event=cli_command module=cli status=start command={command}");

    match (command.as_str(), rest) {
        ("ping", []) => println!("lessondeck_core ping={}", lessondeck_core::ping()),
        ("version", []) => println!("lessondeck_core version={}", lessondeck_core::core_version()),
        ("export", [lesson_id]) => {
            let endpoint = endpoint(&config)?;
            println!("{}", endpoint.handle_fetch_json(lesson_id));
        }
        ("import", [file]) => {
            let body = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
            let endpoint = endpoint(&config)?;
            let response = endpoint.handle_replace_json(&body);
            println!("{response}");
            let parsed: ReplaceResponse = serde_json::from_str(&response)?;
            if let ReplaceResponse::Failed { error, .. } = parsed {
                bail!("import failed: {error}");
            }
        }
        ("seed-user", [id, name, image @ ..]) if image.len() <= 1 => {
            let conn = open(&config)?;
            SqliteUserDirectory::new(&conn).upsert_user(&UserRecord {
                id: id.clone(),
                name: name.clone(),
                image: image.first().cloned(),
            })?;
            println!("user {id} saved");
        }
        ("seed-lesson", [id, title, resource @ ..]) if resource.len() <= 1 => {
            let conn = open(&config)?;
            SqliteLessonDirectory::new(&conn).upsert_lesson(
                id,
                title,
                resource.first().map(String::as_str),
            )?;
            println!("lesson {id} saved");
        }
        _ => bail!("{USAGE}"),
    }
    Ok(())
}

fn take_config_path(args: &mut Vec<String>) -> Result<PathBuf> {
    if let Some(index) = args.iter().position(|arg| arg == "--config") {
        if index + 1 >= args.len() {
            bail!("--config requires a path");
        }
        let path = args.remove(index + 1);
        args.remove(index);
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)))
}

fn open(config: &EngineConfig) -> Result<Connection> {
    let conn = match config.storage.db_path.as_ref() {
        Some(path) => open_db(path).with_context(|| format!("opening {}", path.display()))?,
        None => open_db_in_memory()?,
    };
    Ok(conn)
}

fn endpoint(config: &EngineConfig) -> Result<DeckEndpoint> {
    Ok(DeckEndpoint::new(share(open(config)?)).with_timeout(config.transaction_timeout()))
}
