mod common;

use common::{RecordingRoom, settings};
use kwami::pipeline::offline::OfflineFactory;
use kwami::room::Participant;
use kwami::{KwamiError, Session, SessionEvent, SessionStart};
use std::sync::Arc;
use std::time::Duration;

fn session(factory: &OfflineFactory) -> Session {
    Session::new(settings(200), Arc::new(factory.clone()))
}

#[tokio::test(start_paused = true)]
async fn smaller_identity_keeps_the_session() {
    let room_a = RecordingRoom::new(
        "agent-a",
        vec![Participant::user("alice"), Participant::agent("agent-b")],
    );
    let room_b = RecordingRoom::new(
        "agent-b",
        vec![Participant::user("alice"), Participant::agent("agent-a")],
    );
    let factory_a = OfflineFactory::new();
    let factory_b = OfflineFactory::new();

    let (a, b) = tokio::join!(
        session(&factory_a).start(room_a.clone(), None, None),
        session(&factory_b).start(room_b.clone(), None, None),
    );

    let a = match a.expect("start a") {
        SessionStart::Running(running) => running,
        SessionStart::Yielded { winner } => panic!("agent-a yielded to {winner}"),
    };
    match b.expect("start b") {
        SessionStart::Yielded { winner } => assert_eq!(winner.as_str(), "agent-a"),
        SessionStart::Running(_) => panic!("agent-b should have yielded"),
    }

    assert!(a.greeting.is_some());
    assert!(factory_b.builds().is_empty());
    assert_eq!(factory_a.builds().len(), 3);
    assert_eq!(room_a.disconnects(), 0);
    assert_eq!(room_b.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn rival_joining_during_grace_period_wins() {
    let room = RecordingRoom::new("agent-b", vec![Participant::user("alice")]);
    let factory = OfflineFactory::new();
    let starting = tokio::spawn(session(&factory).start(room.clone(), None, None));

    tokio::time::sleep(Duration::from_millis(100)).await;
    room.join(Participant::agent("agent-a"));

    match starting.await.expect("join start").expect("start") {
        SessionStart::Yielded { winner } => assert_eq!(winner.as_str(), "agent-a"),
        SessionStart::Running(_) => panic!("agent-b should have yielded"),
    }
    assert!(factory.builds().is_empty());
    assert_eq!(room.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnected_rival_is_ignored() {
    let room = RecordingRoom::new(
        "agent-b",
        vec![
            Participant::user("alice"),
            Participant::agent("agent-a").disconnected(),
        ],
    );
    let started = session(&OfflineFactory::new())
        .start(room, None, None)
        .await
        .expect("start");
    assert!(matches!(started, SessionStart::Running(_)));
}

#[tokio::test(start_paused = true)]
async fn rival_joining_later_wins_at_next_reconfiguration() {
    let room = RecordingRoom::new("agent-b", vec![Participant::user("alice")]);
    let running = match session(&OfflineFactory::new())
        .start(room.clone(), None, None)
        .await
        .expect("start")
    {
        SessionStart::Running(running) => running,
        SessionStart::Yielded { winner } => panic!("yielded to {winner}"),
    };
    let handle = running.handle.clone();
    let mut events = handle.subscribe();

    room.join(Participant::agent("agent-a"));
    let update = br#"{"type":"config_update","updateType":"llm","config":{"model":"gpt-4.1"}}"#;
    handle.deliver(update.to_vec()).await.expect("deliver");
    running.task.await.expect("actor");

    let mut lost = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ArbitrationLost { winner } = event {
            lost = Some(winner);
        }
    }
    assert_eq!(lost.as_deref(), Some("agent-a"));
    assert!(handle.is_closed());
    assert_eq!(room.disconnects(), 1);
    assert!(matches!(
        handle.snapshot().await,
        Err(KwamiError::SessionClosed)
    ));
}
