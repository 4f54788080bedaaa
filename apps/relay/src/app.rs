//! Runs the relay server until Ctrl-C or a fatal server error.

use std::sync::Arc;

use framerelay_server::RelayServer;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = RelayServer::new(config.server_config(), config.relay_config());
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupt received, shutting down");
            server.shutdown();
            server_task.await??;
        }
        result = &mut server_task => {
            result??;
        }
    }

    Ok(())
}
