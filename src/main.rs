use anyhow::Result;
use clap::{Parser, Subcommand};
use hookline::client::PollingLoop;
use hookline::config::Config;
use hookline::webhook::resolver::CallbackAddressResolver;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "hookline",
    version,
    about = "Chat portal gateway with asynchronous webhook reply reconciliation"
)]
struct Cli {
    /// Path to config.toml (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Gateway {
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Watch a conversation until its pending reply resolves.
    Watch {
        /// Conversation id to poll.
        conversation: i64,
        /// Gateway base URL, e.g. http://127.0.0.1:3001
        #[arg(long)]
        base_url: String,
        /// Portal bearer token.
        #[arg(long)]
        token: String,
    },
    /// Resolve and validate the callback address once, then report.
    Probe,
    /// Config inspection helpers.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the JSON schema of the config file.
    Schema,
    /// Print the resolved config file path.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Gateway { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            hookline::gateway::run(config).await
        }
        Command::Watch {
            conversation,
            base_url,
            token,
        } => {
            let poller = PollingLoop::new(&base_url, &token, &config.poll);
            let cancel = CancellationToken::new();
            let guard = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    guard.cancel();
                }
            });

            let messages = poller.run(conversation, cancel).await?;
            match messages.last() {
                Some(last) if !hookline::webhook::is_pending(&last.content) => {
                    println!("{}", last.content);
                }
                Some(_) => println!("(still pending — the reply has not arrived yet)"),
                None => println!("(conversation has no messages)"),
            }
            Ok(())
        }
        Command::Probe => {
            let resolver = CallbackAddressResolver::from_config(&config);
            match resolver.resolve_and_validate().await {
                Ok(resolved) => {
                    println!("callback url:  {}", resolved.callback_url);
                    println!("delivery mode: {:?}", resolved.delivery_mode);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("callback validation failed: {err}");
                    std::process::exit(1);
                }
            }
        }
        Command::Config { action } => {
            match action {
                ConfigCommand::Schema => {
                    let schema = schemars::schema_for!(Config);
                    println!("{}", serde_json::to_string_pretty(&schema)?);
                }
                ConfigCommand::Path => println!("{}", config.config_path.display()),
            }
            Ok(())
        }
    }
}
