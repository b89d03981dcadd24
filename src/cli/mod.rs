pub mod commands;

use crate::cli::commands::{ChatAction, Commands, DocumentAction};
use crate::config::AppConfig;
use crate::db::{get_connection, lock, service::DbService};

/// Runs the administrative subcommands directly against the database. These
/// bypass ownership checks; they are for the operator, not for API users.
pub fn run_cli(command: Commands, config_path: String) {
    let config = match AppConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return;
        }
    };

    let pool = match get_connection(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("DB error: {}", e);
            return;
        }
    };
    let conn = match lock(&pool) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("DB error: {}", e);
            return;
        }
    };

    match command {
        Commands::Serve => {
            eprintln!("Serve is handled by the server entry point");
        }
        Commands::Chat { action } => match action {
            ChatAction::List { user } => match DbService::list_chats(&conn, &user, 50, 0) {
                Ok(chats) => {
                    if chats.is_empty() {
                        println!("No chats found.");
                    } else {
                        println!("{:<38} | {:<32} | {}", "ID", "Created At", "Title");
                        println!("{:-<38}-+-{:-<32}-+-{:-<20}", "", "", "");
                        for c in chats {
                            println!("{:<38} | {:<32} | {}", c.id, c.created_at.to_rfc3339(), c.title);
                        }
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            },
            ChatAction::Delete { id } => match DbService::get_chat(&conn, &id) {
                Ok(Some(_)) => match DbService::delete_chat(&conn, &id) {
                    Ok(_) => println!("Deleted chat {}", id),
                    Err(e) => eprintln!("Error: {}", e),
                },
                Ok(None) => eprintln!("Chat {} not found.", id),
                Err(e) => eprintln!("Error: {}", e),
            },
        },
        Commands::Document { action } => match action {
            DocumentAction::History { id } => match DbService::get_document_history(&conn, &id) {
                Ok(history) if history.is_empty() => eprintln!("Document {} not found.", id),
                Ok(history) => {
                    for (version, doc) in history.iter().enumerate() {
                        println!("--- v{} [{}] {} ({}) ---", version + 1, doc.created_at.to_rfc3339(), doc.title, doc.kind);
                        println!("{}", doc.content);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            },
        },
    }
}
