//! Gateway shutdown.
//!
//! The reactor and the HTTP listener wait on the root token. Each socket
//! gets a child token, so draining the gateway closes every link.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `drain` waits for the reactor and listener tasks.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Shared stop signal for the gateway.
#[derive(Debug, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Signal that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root token, for the reactor and the listener.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token for one socket. Cancelling it leaves the gateway running.
    pub fn session_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Stop accepting sockets and close the open ones.
    pub fn begin(&self) {
        self.token.cancel();
    }

    /// Whether `begin` was called.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Begin shutdown and wait for `tasks`. Returns `false` if the grace
    /// period ran out first.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        self.drain_within(tasks, DRAIN_GRACE).await
    }

    async fn drain_within(&self, tasks: Vec<JoinHandle<()>>, grace: Duration) -> bool {
        self.begin();
        info!(tasks = tasks.len(), "draining gateway");
        let finished = tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_ok();
        if !finished {
            warn!(?grace, "gateway tasks still running after grace period");
        }
        finished
    }
}
