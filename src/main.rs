use anyhow::Context;
use clap::{CommandFactory, Parser};
use console::style;
use tracing_subscriber::EnvFilter;

use live_server::cli::Cli;
use live_server::server::{self, LiveServer};
use live_server::{Config, Site};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Some(entry) = cli.entry.as_deref() else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let default_filter = if cli.verbose { "live_server=debug,tower_http=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(cli.verbose)
        .init();

    let site = Site::from_entry(entry)
        .with_context(|| format!("cannot serve {}", entry.display()))?;
    let config = Config::load(site.root(), cli.config.as_deref())?
        .with_overrides(cli.overrides())?;

    println!("live-server v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "{} Serving {} from {}",
        style("[1/2]").dim(),
        style(site.entry()).bold(),
        site.root().display()
    );

    let entry_name = site.entry().to_string();
    let server = LiveServer::new(site, &config).context("cannot start live reload")?;
    let listener = server::bind(&config).await?;
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(config.port);

    println!("{} Watching for changes", style("[2/2]").dim());
    println!("{}", style(format!("  http://localhost:{port}/{entry_name}")).yellow());

    server.serve(listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    // If the handler cannot be installed, run until killed.
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
