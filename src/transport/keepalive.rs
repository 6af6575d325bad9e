//! Keep-alive monitor.
//!
//! One task per connection. Each tick:
//!
//! | State | Action |
//! |-------|--------|
//! | Closed | Stop |
//! | Not alive | Run the teardown callback, stop |
//! | Idle for at least one period | Ping; a long-poll client with no `GET` parked is marked dead |
//! | Otherwise | Nothing |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace};

use super::connection::Connection;

// ============================================================================
// Monitor
// ============================================================================

/// Spawns the monitor for `connection`.
///
/// `on_dead` runs once when the connection is found dead; it is expected to
/// deregister and close it.
pub fn spawn<F>(connection: Arc<Connection>, period: Duration, on_dead: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = connection.closed() => break,
                _ = ticker.tick() => {}
            }

            if connection.is_closed() {
                break;
            }

            if !connection.is_alive() {
                debug!(connection_id = %connection.id(), "Keep-alive found connection dead");
                on_dead();
                break;
            }

            if connection.idle_for() >= period {
                connection.ping();
            }
        }

        trace!(connection_id = %connection.id(), "Keep-alive monitor stopped");
    })
}

// ============================================================================
// Tests
// ============================================================================
