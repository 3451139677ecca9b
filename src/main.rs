mod app;
mod cli;

use anyhow::Context;
use clap::Parser;
use rulebook_chat::{config, paths, store::SessionStore};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    // Resolve and create dirs early.
    let config_dir = paths::config_dir()?;
    let store = SessionStore::new(paths::sessions_dir()?);

    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?;
    tracing::debug!(?config_dir, model = ?cfg.as_ref().map(|c| &c.gemini.model), "resolved config");

    if let cli::Command::Sessions = args.cmd {
        return app::cmd_sessions(&store);
    }
    if let cli::Command::Forget { turn, side } = args.cmd {
        return app::cmd_forget(&store, args.session, turn, side);
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let client = app::build_client(&http, cfg.as_ref(), &config_dir, args.model)?;

    match args.cmd {
        cli::Command::Upload {
            path,
            system_instruction,
            owner,
        } => app::cmd_upload(&client, &store, args.session, &path, system_instruction, owner).await,
        cli::Command::Chat { no_stream, prompt } => {
            let prompt = prompt.join(" ");
            app::cmd_chat(&client, &store, args.session, prompt, !no_stream).await
        }
        cli::Command::Cache { id } => app::cmd_cache(&client, &store, args.session, id).await,
        cli::Command::Sessions | cli::Command::Forget { .. } => Ok(()),
    }
}
