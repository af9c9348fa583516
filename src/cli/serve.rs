use anyhow::Result;
use console::style;
use tokio::sync::broadcast;
use tracing::info;

use crate::core::config::Config;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::terminal::{GuideSection, print_link};
use crate::interfaces::web::{ApiServer, ApiServerConfig};

/// Serve the install API until Ctrl+C.
pub async fn run_serve(
    config: &Config,
    log_tx: broadcast::Sender<String>,
    host: String,
    port: u16,
) -> Result<()> {
    let installer = super::build_installer(config);
    info!(
        "Fetch program: {}, managed base directory: {}",
        config.fetch.program,
        config.remote.base_dir.display()
    );

    let mut server = ApiServer::new(ApiServerConfig {
        installer,
        log_tx,
        api_host: host.clone(),
        api_port: port,
    });
    server.on_init().await?;
    server.on_start().await?;

    GuideSection::new("labdrop API")
        .status("Listening", &format!("{host}:{port}"))
        .blank()
        .text(&format!(
            "Press {} to stop the server.",
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    print_link("Jobs", &format!("http://127.0.0.1:{port}/api/jobs"));
    println!();

    tokio::signal::ctrl_c().await?;
    server.on_shutdown().await?;
    Ok(())
}
