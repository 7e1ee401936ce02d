//! In-process relay harness.

use relay::coordinator::{CoordinatorActor, CoordinatorHandle};
use relay::server;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Kick grace short enough for tests to await the forced close.
pub const TEST_KICK_GRACE: Duration = Duration::from_millis(25);

/// A relay running on an ephemeral local port.
pub struct RelayHarness {
    url: String,
    coordinator: CoordinatorHandle,
    cancel_token: CancellationToken,
    coordinator_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
}

impl RelayHarness {
    /// Start a relay on `127.0.0.1:0` with [`TEST_KICK_GRACE`].
    pub async fn start() -> Self {
        Self::start_with_grace(TEST_KICK_GRACE).await
    }

    /// Start a relay with an explicit kick grace.
    pub async fn start_with_grace(kick_grace: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let (coordinator, coordinator_task) =
            CoordinatorActor::spawn(kick_grace, cancel_token.child_token());

        let listener = server::bind("127.0.0.1:0")
            .await
            .expect("harness failed to bind");
        let addr = server::local_addr(&listener).expect("listener has no local address");
        let url = format!("ws://{addr}");

        let server_task = tokio::spawn(server::run(
            listener,
            coordinator.clone(),
            cancel_token.child_token(),
        ));

        Self {
            url,
            coordinator,
            cancel_token,
            coordinator_task,
            server_task,
        }
    }

    /// `ws://` address clients connect to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Handle for querying coordinator state from tests.
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Stop the relay and wait for its tasks.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        self.coordinator_task.await.expect("coordinator task panicked");
        self.server_task.await.expect("server task panicked");
    }
}
