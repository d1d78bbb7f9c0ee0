//! Prints session updates to stdout

use tokio::sync::broadcast;
use tracing::{info, warn};

use mdstream_session::SessionUpdate;

/// Render one update as a printable line
pub fn render(update: &SessionUpdate) -> String {
    match update {
        SessionUpdate::Market { session, message } => {
            let body = serde_json::to_string_pretty(&message.raw).unwrap_or_else(|_| message.raw.to_string());
            format!("[{}] RECEIVED:\n{}", session, body)
        }
        SessionUpdate::State {
            session,
            state,
            reason: Some(reason),
        } => format!("[{}] {} ({})", session, state, reason),
        SessionUpdate::State {
            session,
            state,
            reason: None,
        } => format!("[{}] {}", session, state),
    }
}

/// Print updates until the channel closes
pub async fn print_updates(mut updates: broadcast::Receiver<SessionUpdate>) {
    loop {
        match updates.recv().await {
            Ok(update @ SessionUpdate::Market { .. }) => println!("{}", render(&update)),
            Ok(update) => info!("{}", render(&update)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Update printer lagged; {} updates skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
