//! Runs the registry's scheduled callbacks
//!
//! Each callback gets its own task. It waits for its delay, then runs
//! against a snapshot of the tree; periodic callbacks repeat with the
//! delay as their period.

use crate::server::Server;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub fn spawn_scheduler(server: &Arc<Server>) -> Vec<JoinHandle<()>> {
    server
        .callbacks
        .scheduled()
        .iter()
        .cloned()
        .map(|scheduled| {
            let server = server.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(scheduled.delay).await;
                    let snapshot = server.dal.snapshot().await;
                    debug!(callback = %scheduled.name, "running scheduled callback");
                    if let Err(e) = (scheduled.callback)(&snapshot) {
                        warn!(callback = %scheduled.name, "scheduled callback failed: {}", e);
                    }
                    if !scheduled.repeat {
                        break;
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Settings;

    #[tokio::test(start_paused = true)]
    async fn test_builtin_schedule_is_spawned() {
        let server = Server::in_memory(Settings::default());
        let handles = spawn_scheduler(&server);
        assert_eq!(handles.len(), server.callbacks().scheduled().len());
        assert!(!handles.is_empty());

        // the one-shot sweep finishes once its delay has elapsed
        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        let finished = handles.iter().filter(|h| h.is_finished()).count();
        assert_eq!(finished, 1);
        handles.iter().for_each(JoinHandle::abort);
    }
}
