use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use chatwrap::{
    constants,
    openai::ModelClient,
    repl,
    storage::{FileStore, StorageService},
    web_server::{self, AppState},
    BackendClient, ChatConfig, ChatService,
};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Chat with the model directly from the terminal.
    Chat {
        #[arg(long, env = "CHATWRAP_STORAGE_PATH", help = "File used to persist the session.")]
        storage: Option<String>,
        #[arg(long, env = "OPENAI_API_URL", help = "Chat completion endpoint.")]
        api_url: Option<String>,
    },
    /// Send one message through the backend and print the streamed answer.
    Ask {
        /// The message to send.
        message: String,
        #[arg(long, help = "User id to send as; defaults to the stored one.")]
        user_id: Option<String>,
        #[arg(long, env = "CHATWRAP_BACKEND_URL", help = "Base URL of the backend.")]
        backend: Option<String>,
    },
    /// Check whether the backend is reachable.
    Health {
        #[arg(long, env = "CHATWRAP_BACKEND_URL", help = "Base URL of the backend.")]
        backend: Option<String>,
    },
    /// Run the companion backend.
    Serve {
        #[arg(long, default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, help = "Skip checking the OpenAI API key at startup.")]
        skip_key_check: bool,
    },
}

fn open_storage(path: Option<String>) -> Result<StorageService<FileStore>> {
    let path = path.unwrap_or_else(|| constants::STORAGE_PATH.clone());
    let store = FileStore::open(&path).with_context(|| format!("Failed to open storage at {}", path))?;
    Ok(StorageService::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for API keys and endpoints)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,chatwrap=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("chatwrap starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Chat { storage, api_url } => {
            let mut config = ChatConfig::from_env();
            if let Some(url) = api_url {
                config.api_url = url;
            }
            let storage = open_storage(storage)?;
            let service = ChatService::default();

            let stdin = std::io::stdin();
            repl::run_chat(&service, &config, &storage, stdin.lock(), std::io::stdout())
                .await
                .context("Chat session failed")?;
            info!("Chat session finished.");
        }
        Commands::Ask {
            message,
            user_id,
            backend,
        } => {
            let client = match backend {
                Some(url) => BackendClient::new(&url)?,
                None => BackendClient::from_env()?,
            };
            let user_id = match user_id {
                Some(id) => id,
                None => repl::load_user_id(&open_storage(None)?),
            };
            repl::run_ask(&client, &user_id, &message, std::io::stdout()).await?;
        }
        Commands::Health { backend } => {
            let client = match backend {
                Some(url) => BackendClient::new(&url)?,
                None => BackendClient::from_env()?,
            };
            if client.check_health().await {
                println!("Backend at {} is available", client.base_url());
            } else {
                println!("Backend at {} is unavailable", client.base_url());
                std::process::exit(1);
            }
        }
        Commands::Serve {
            port,
            skip_key_check,
        } => {
            let config = ChatConfig::from_env();
            let api_key = config
                .api_key()
                .context("OPENAI_API_KEY environment variable is required")?
                .to_string();
            let model = ModelClient::new();

            if !skip_key_check {
                model
                    .validate_api_key(&constants::OPENAI_MODELS_URL, &api_key)
                    .await
                    .context("Failed to validate OpenAI API key")?;
            }

            let state = AppState::new(config, model).with_cors_origin(&constants::CORS_ORIGIN)?;
            let mut server = tokio::spawn(async move { web_server::start_web_server(port, state).await });

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down...");
                    server.abort();
                }
                res = &mut server => {
                    match res {
                        Ok(Ok(())) => info!("Web server task completed."),
                        Ok(Err(e)) => {
                            error!("Web server failed: {:?}", e);
                            return Err(e);
                        }
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }
        }
    }

    Ok(())
}
