//! Keepalive pings

use crate::connection::{Shared, State};
use asyncws_proto::close;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ping the peer every `interval` while the connection is open.
///
/// A pong that does not arrive within `ping_timeout` fails the connection
/// with close code 1011.
pub(crate) async fn run(shared: Arc<Shared>, interval: Duration, ping_timeout: Option<Duration>) {
    let cancel = shared.cancel.clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if shared.state() != State::Open {
            return;
        }

        let waiter = match shared.ping(None).await {
            Ok(waiter) => waiter,
            Err(e) => {
                debug!("Connection {} keepalive stopped: {}", shared.id, e);
                return;
            }
        };

        let pong = match ping_timeout {
            Some(limit) => tokio::select! {
                _ = cancel.cancelled() => return,
                pong = tokio::time::timeout(limit, waiter) => pong,
            },
            None => tokio::select! {
                _ = cancel.cancelled() => return,
                pong = waiter => Ok(pong),
            },
        };

        match pong {
            Ok(Ok(())) => debug!("Connection {} keepalive pong received", shared.id),
            Ok(Err(e)) => {
                debug!("Connection {} keepalive stopped: {}", shared.id, e);
                return;
            }
            Err(_) => {
                warn!(
                    "Connection {} keepalive ping timed out after {:?}",
                    shared.id,
                    ping_timeout.unwrap_or_default()
                );
                let reason = "keepalive ping timeout";
                shared
                    .fail(
                        close::INTERNAL_ERROR,
                        reason,
                        Some((close::INTERNAL_ERROR, reason.to_string())),
                    )
                    .await;
                shared.finalize().await;
                return;
            }
        }
    }
}
