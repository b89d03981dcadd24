use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "draftbox", version, about = "Draftbox document-authoring chat server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file path globally
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve,

    /// Inspect or remove chats
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Inspect stored documents
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },
}

#[derive(Subcommand)]
pub enum ChatAction {
    /// List the chats owned by a user
    List {
        #[arg(short, long)]
        user: String,
    },

    /// Delete a chat and its messages
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum DocumentAction {
    /// Print every snapshot of a document, oldest first
    History { id: String },
}
