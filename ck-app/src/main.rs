//! cooldown-keeper: tracks Mazoku cooldowns and reminds players when they end.

mod commands;
mod config;
mod delivery;
mod gateway;
mod http_auth;
mod init;
mod routes;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "cooldown-keeper",
    version,
    about = "Cooldown reminders for the Mazoku Discord bot"
)]
struct Cli {
    /// Config file (default: ~/.cooldown-keeper/config.toml).
    #[arg(long, global = true, env = "COOLDOWN_KEEPER_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to Discord and track cooldowns (default).
    Serve,
    /// Write a config template next to the config path (idempotent).
    Init,
    /// Validate config and check the state file is readable.
    Doctor,
    /// Print the persisted cooldowns without connecting to Discord.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(config_path).await,
        Command::Init => {
            let report = init::initialize(config_path).await?;
            if report.created.is_empty() {
                println!(
                    "cooldown-keeper init: already initialized at {}",
                    report.root.display()
                );
            } else {
                println!("cooldown-keeper init: initialized {}", report.root.display());
                for path in &report.created {
                    println!("created {}", path.display());
                }
                if !report.skipped.is_empty() {
                    println!("kept {} existing file(s) unchanged", report.skipped.len());
                }
            }
            println!(
                "next: set discord.bot_token (or DISCORD_BOT_TOKEN) under {}",
                report.root.display()
            );
            Ok(())
        }
        Command::Doctor => server::doctor(config_path).await,
        Command::Status => server::status(config_path).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Compact,
}

impl LogFormat {
    fn parse(raw: Option<&str>) -> anyhow::Result<Self> {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("compact") => Ok(Self::Compact),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(anyhow::anyhow!(
                "unsupported COOLDOWN_KEEPER_LOG_FORMAT={other:?}; expected json or compact"
            )),
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let format = LogFormat::parse(std::env::var("COOLDOWN_KEEPER_LOG_FORMAT").ok().as_deref())?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "info,cooldown_keeper=debug,ck_app=debug,ck_engine=debug,ck_channels=debug,tower_http=info",
        )
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    match format {
        LogFormat::Json => builder
            .with_thread_ids(true)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Compact => builder.compact().init(),
    }

    tracing::info!(
        log_format = ?format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        tracing::error!(
            panic_location = ?panic_info.location().map(|loc| (loc.file(), loc.line())),
            panic_payload = %message,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

#[cfg(test)]
mod tests {
    use super::LogFormat;

    #[test]
    fn log_format_defaults_to_compact() {
        assert_eq!(LogFormat::parse(None).expect("default"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(Some(" JSON ")).expect("json"), LogFormat::Json);
        assert!(LogFormat::parse(Some("pretty")).is_err());
    }
}
