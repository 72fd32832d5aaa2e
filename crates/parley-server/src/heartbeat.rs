//! Per-connection liveness monitoring.
//!
//! One monitor task per connection, started at registration. Each tick it
//! sends a JSON `ping` frame through the registry and checks the gap since
//! the last `pong`. Connections that stay half-open after socket-level
//! failure would otherwise hold their user-id slot until the next broadcast
//! happens to touch them; the monitor bounds that window deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, info};

use parley_core::events::ServerEvent;

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;

/// Why a heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped acknowledging pings; the connection was reaped.
    TimedOut,
    /// The connection was unregistered externally (disconnect path).
    Cancelled,
    /// A newer connection for the same user took over; this handle is stale.
    Superseded,
    /// The ping write failed and the registry already reaped the connection.
    SendFailed,
}

/// Spawn the monitor task for a freshly registered connection.
pub fn spawn(
    registry: Arc<ConnectionRegistry>,
    conn: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
) -> tokio::task::JoinHandle<HeartbeatResult> {
    tokio::spawn(run(registry, conn, interval, timeout))
}

async fn run(
    registry: Arc<ConnectionRegistry>,
    conn: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let cancel = conn.cancel_token();
    let mut ticker = time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A reconnect may have replaced this handle; the fresh
                // connection runs its own monitor.
                if !registry.is_current(&conn) {
                    debug!(user_id = %conn.user_id(), epoch = conn.epoch(), "heartbeat superseded");
                    return HeartbeatResult::Superseded;
                }

                let ping = ServerEvent::Ping { ts: chrono::Utc::now() };
                if !registry.send(conn.user_id(), &ping) {
                    // send() already unregistered on failure.
                    return HeartbeatResult::SendFailed;
                }

                if conn.last_pong_elapsed() > timeout {
                    info!(user_id = %conn.user_id(), epoch = conn.epoch(),
                        "liveness timeout, reaping connection");
                    registry.unregister_conn(conn.user_id(), conn.epoch());
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
