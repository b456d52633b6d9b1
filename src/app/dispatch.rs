use crate::app::status::{StatusProbe, render_status};
use crate::cli::commands::{Cli, Commands};
use anyhow::Result;
use keyloom::config::Config;
use keyloom::llm::{DiffusionRuntime, build_provider_client_with_timeout};
use keyloom::session::{SessionStore, SqliteSessionStore};
use std::sync::Arc;
use tracing::info;

async fn probe(config: &Config) -> StatusProbe {
    let store = match SqliteSessionStore::open(&config.session.resolved_db_path()).await {
        Ok(store) => store.ping().await.map_err(|e| format!("{e:#}")),
        Err(error) => Err(format!("{error:#}")),
    };

    let fallback = if config.fallback.enabled {
        let runtime = DiffusionRuntime::new(
            build_provider_client_with_timeout(10),
            config.fallback.clone(),
        );
        runtime
            .handle()
            .await
            .map(|handle| handle.checkpoint.clone())
            .map_err(|e| e.to_string())
    } else {
        Ok(None)
    };

    StatusProbe { store, fallback }
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let config = Arc::new(config);
    match cli.command {
        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting Keyloom gateway on {host} (random port)");
            } else {
                info!("Starting Keyloom gateway on {host}:{port}");
            }
            keyloom::transport::gateway::run_gateway(&host, port, Arc::clone(&config)).await
        }
        Commands::Status => {
            let probe = probe(&config).await;
            println!("{}", render_status(&config, &probe));
            Ok(())
        }
    }
}
