use anyhow::Result;
use lib_feed::retrieve::RequestOptions;
use lib_feed::{FailoverClient, FailoverConfig, FailoverError, FeedEvent, Message};
use serde_json::Value;
use tokio::sync::broadcast;

pub fn format_message(message: &Message) -> String {
    format!(
        "{} [{}] {}{}",
        message.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
        message.category,
        message.content,
        if message.is_new { " *" } else { "" }
    )
}

pub fn rate_limit_line(retry_after_secs: u64) -> String {
    format!("Rate limited by the server, try again in {} seconds", retry_after_secs)
}

/// Prints messages and logs connection changes until the event stream closes.
pub async fn print_events(mut events: broadcast::Receiver<FeedEvent>) {
    loop {
        match events.recv().await {
            Ok(FeedEvent::NewMessage(message)) => println!("{}", format_message(&message)),
            Ok(FeedEvent::StateChanged(state)) => log::info!("Connection state: {}", state),
            Ok(FeedEvent::Error(text)) => log::warn!("Feed error: {}", text),
            Ok(FeedEvent::ConnectionInfo(info)) => log::info!("Server info: {}", info),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Event printer lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// One failover GET against `path`; prints the JSON body.
pub async fn fetch_once(config: &FailoverConfig, path: &str) -> Result<()> {
    let client = FailoverClient::new(config)?;

    match client.execute::<Value>(path, RequestOptions::get()).await {
        Ok(response) if response.success => {
            let body = response.data.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&body)?);
            log::info!("{} answered {} from {}", path, response.status, response.address);
        }
        Ok(response) => {
            eprintln!(
                "{} answered {} from {}: {}",
                path,
                response.status,
                response.address,
                response.error_body.unwrap_or_default()
            );
        }
        Err(e @ FailoverError::RateLimited(_)) => {
            println!("{}", rate_limit_line(e.retry_after_secs().unwrap_or_default()));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
