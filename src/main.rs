use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use contextperm::command::Command;
use contextperm::console::{ConsoleHost, ConsoleSource, Outcome};
use contextperm::policy::loader::load_policies;
use contextperm::policy::PolicyState;
use contextperm::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "contextperm",
    version,
    about = "Context-sensitive permission cache console"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging goes to stderr, replies to stdout
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // load policies
    let state = if settings.policy.dir.is_dir() {
        load_policies(&settings.policy.dir)?
    } else {
        tracing::warn!(
            dir = %settings.policy.dir.display(),
            "Policy directory not found, starting without policies"
        );
        PolicyState::default()
    };

    let host = ConsoleHost::new(&settings, state);
    host.lifecycle().start().await?;

    let console = ConsoleSource::Console;
    let reply_to = host.bridge().wrap(&console);
    reply_to.send_message("Type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.into_diagnostic()? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                reply_to.send_message(&e.to_string());
                continue;
            }
        };
        match host.execute(command).await {
            Ok(Outcome::Reply(reply)) => reply_to.send_message(&reply),
            Ok(Outcome::Exit) => break,
            Err(e) => reply_to.send_message(&format!("Error: {e}")),
        }
    }

    host.shutdown().await?;
    Ok(())
}
