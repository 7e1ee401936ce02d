//! Full-stack tests: mesh orchestrators negotiating through a real relay.
//!
//! The media layer is the scripted mock transport, so "connected" means
//! the offer/answer exchange completed over the live signaling path.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::types::SessionId;
use mesh::mesh::{MeshConfig, MeshHandle, MeshOrchestrator, RosterSnapshot, SessionEnd};
use mesh::mock::{MockControls, MockLinkFactory};
use mesh::signal::SignalChannel;
use mesh::transport::{LinkRole, LinkState, StreamHandle};
use test_utils::harness::RelayHarness;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct Client {
    handle: MeshHandle,
    controls: MockControls,
    task: JoinHandle<()>,
}

async fn join_room(relay_url: &str, room_id: &str, name: &str, session: &str) -> Client {
    let cancel_token = CancellationToken::new();
    let channel = SignalChannel::connect(relay_url, cancel_token.clone())
        .await
        .expect("failed to connect signaling channel");
    let (outbound, inbound) = channel.split();

    let factory = MockLinkFactory::new();
    let controls = factory.controls();
    let config = MeshConfig {
        room_id: room_id.to_string(),
        display_name: name.to_string(),
        password: String::new(),
        session_id: SessionId::from(session),
    };
    let (handle, task) = MeshOrchestrator::spawn(
        config,
        Box::new(factory),
        Some(StreamHandle::new(format!("cam-{name}"))),
        outbound,
        inbound,
        cancel_token,
    );
    Client {
        handle,
        controls,
        task,
    }
}

async fn wait_roster<F>(client: &Client, what: &str, pred: F) -> RosterSnapshot
where
    F: Fn(&RosterSnapshot) -> bool,
{
    let mut roster = client.handle.roster();
    timeout(Duration::from_secs(5), async {
        loop {
            if pred(&roster.borrow()) {
                return roster.borrow().clone();
            }
            roster.changed().await.expect("orchestrator dropped");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}

fn all_connected(snapshot: &RosterSnapshot, expected: usize) -> bool {
    snapshot.links.len() == expected
        && snapshot
            .links
            .values()
            .all(|l| l.state == LinkState::Connected)
}

#[tokio::test]
async fn test_three_members_form_a_full_mesh() {
    let relay = RelayHarness::start().await;

    let a = join_room(relay.url(), "mesh", "A", "sess-a").await;
    wait_roster(&a, "founder host grant", |s| s.is_host).await;

    let b = join_room(relay.url(), "mesh", "B", "sess-b").await;
    let c = join_room(relay.url(), "mesh", "C", "sess-c").await;

    for (client, name) in [(&a, "A"), (&b, "B"), (&c, "C")] {
        let snapshot = wait_roster(client, "two connected links", |s| all_connected(s, 2)).await;
        assert!(
            !snapshot.links.contains_key(&SessionId::from(format!("sess-{}", name.to_lowercase()))),
            "no self link expected"
        );
    }

    // Names arrived with the links.
    let snapshot = wait_roster(&a, "named links", |s| {
        s.links.values().all(|l| l.name.is_some())
    })
    .await;
    let mut names: Vec<_> = snapshot
        .links
        .values()
        .filter_map(|l| l.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["B".to_string(), "C".to_string()]);

    // C leaves; the survivors drop back to one connected link each.
    c.handle.cancel();
    c.task.await.unwrap();
    for client in [&a, &b] {
        wait_roster(client, "link teardown after leave", |s| all_connected(s, 1)).await;
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn test_link_failure_recovers_through_remote_reinitiation() {
    let relay = RelayHarness::start().await;

    let a = join_room(relay.url(), "pair", "A", "sess-a").await;
    wait_roster(&a, "founder host grant", |s| s.is_host).await;
    let b = join_room(relay.url(), "pair", "B", "sess-b").await;
    wait_roster(&a, "initial link", |s| all_connected(s, 1)).await;
    wait_roster(&b, "initial link", |s| all_connected(s, 1)).await;

    // B joined second, so B initiated the original link.
    assert_eq!(
        b.controls.latest_role(&SessionId::from("sess-a")),
        Some(LinkRole::Initiator)
    );

    // B's transport fails. B asks A to re-initiate; A tears its side down
    // and offers fresh; B answers on a replacement link.
    assert!(b.controls.fail(&SessionId::from("sess-a")));
    wait_roster(&b, "failure visible", |s| {
        s.links
            .get(&SessionId::from("sess-a"))
            .is_some_and(|l| l.state == LinkState::Failed)
    })
    .await;

    wait_roster(&a, "recovered link", |s| all_connected(s, 1)).await;
    wait_roster(&b, "recovered link", |s| all_connected(s, 1)).await;

    // Directionality flipped: exactly one fresh link per side, initiated
    // by the requested side.
    assert_eq!(a.controls.created_count(), 2);
    assert_eq!(b.controls.created_count(), 2);
    assert_eq!(
        a.controls.latest_role(&SessionId::from("sess-b")),
        Some(LinkRole::Initiator)
    );
    assert_eq!(
        b.controls.latest_role(&SessionId::from("sess-a")),
        Some(LinkRole::Responder)
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn test_host_kick_ends_the_target_session() {
    let relay = RelayHarness::start().await;

    let host = join_room(relay.url(), "mod", "Host", "sess-host").await;
    wait_roster(&host, "founder host grant", |s| s.is_host).await;
    let target = join_room(relay.url(), "mod", "Target", "sess-target").await;
    wait_roster(&host, "host link", |s| all_connected(s, 1)).await;
    wait_roster(&target, "initial link", |s| all_connected(s, 1)).await;

    assert!(host.handle.kick(SessionId::from("sess-target")).await);

    let ended = wait_roster(&target, "kick to land", |s| s.ended.is_some()).await;
    assert_eq!(ended.ended, Some(SessionEnd::Kicked { banned: false }));
    target.task.await.unwrap();

    wait_roster(&host, "kicked member torn down", |s| s.links.is_empty()).await;
    assert_eq!(
        host.controls.latest_closed(&SessionId::from("sess-target")),
        Some(true)
    );

    relay.shutdown().await;
}
