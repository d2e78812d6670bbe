use anyhow::Result;
use lib_feed::RealtimeClient;
use tokio::signal;

mod feed_logic;
use feed_logic::{config, logger, monitor};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    if let Some(path) = config.fetch.as_deref() {
        return monitor::fetch_once(&config.failover_config(), path).await;
    }

    let client = RealtimeClient::start(config.realtime_config())?;
    let printer = tokio::spawn(monitor::print_events(client.events()));
    client.connect()?;

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    client.disconnect()?;
    client.shutdown()?;
    drop(client);

    // The printer ends once the actor drops its event sender.
    let _ = printer.await;

    log::info!("Shutdown complete.");
    Ok(())
}
