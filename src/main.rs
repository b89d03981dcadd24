use actix_web::{web, App, HttpServer};
use clap::Parser;
use draftbox::api::middleware::UserAuth;
use draftbox::chat::Orchestrator;
use draftbox::cli::{commands::{Cli, Commands}, run_cli};
use draftbox::config::AppConfig;
use draftbox::db;
use draftbox::llm::{ModelRegistry, ProviderFactory};
use draftbox::tools::ToolRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Serve) {
        run_cli(cli.command, cli.config);
        return Ok(());
    }

    info!("Starting Draftbox server...");

    let config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db_pool = match db::get_connection(&config.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let llm_provider = match ProviderFactory::create_default(&config) {
        Some(p) => p,
        None => {
            error!("Failed to initialize LLM Provider from config.yaml mapping");
            std::process::exit(1);
        }
    };

    let tools = ToolRegistry::new(db_pool.clone(), llm_provider.clone(), &config.tools);
    let orchestrator = web::Data::new(Orchestrator::new(
        db_pool.clone(),
        llm_provider,
        ModelRegistry::new(config.models.clone()),
        tools,
        &config.chat,
    ));
    info!(
        "Serving {} model(s) with tool scope {:?}",
        config.models.len(),
        config.chat.tool_scope
    );

    let auth = web::Data::new(config.auth.clone());
    let host = config.server.host.clone();
    let port = config.server.port;

    info!("Server listening on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(auth.clone())
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(orchestrator.clone())
            .wrap(UserAuth)
            .configure(draftbox::api::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
