//! Hearth CLI binary entry point.

use clap::Parser;
use hearth::auth::{SessionEvent, SessionManager};
use hearth::cli::{AuthCommands, Cli, Commands, GetArgs};
use hearth::config::SessionConfig;
use hearth::transport::ApiRequest;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => SessionConfig::load_from_path(path)?,
        None => SessionConfig::from_env()?,
    };
    let session = SessionManager::from_config(config)?;
    let _printer = session.events().subscribe(|event| match event {
        SessionEvent::AuthenticationRequired { .. } => {
            eprintln!("⚠️  Session expired. Run `hearth auth login <email>`.");
        }
        SessionEvent::AccessDenied { details } => {
            eprintln!("⛔ Access denied: {details}");
        }
        _ => {}
    });

    let result = match cli.command {
        Commands::Auth(auth_args) => match auth_args.command {
            AuthCommands::Login(args) => hearth::cli::auth::handle_login(&session, &args.email).await,
            AuthCommands::Register(args) => {
                hearth::cli::auth::handle_register(&session, &args.email, args.name.as_deref()).await
            }
            AuthCommands::Status => hearth::cli::auth::handle_status(&session).await,
            AuthCommands::Logout => hearth::cli::auth::handle_logout(&session).await,
        },
        Commands::Get(args) => handle_get(&session, args).await,
    };

    session.shutdown();
    result
}

async fn handle_get(session: &SessionManager, args: GetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let response = session.send(ApiRequest::get(args.path)).await?;
    if !response.is_success() {
        return Err(format!("request failed with status {}: {}", response.status, response.body).into());
    }
    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.body),
    }
    Ok(())
}
