//! Session API behavior
//!
//! Exercises the engine-level event surface: append/list with filters,
//! long-polling, tombstones, inspection traces, and the per-session
//! serialization of turns.

mod common;

use colloquy::store::EventFilter;
use colloquy::{
    Agent, EngineError, EventKind, EventSource, Guideline, NewEvent, SessionId, Status,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn thirsty_script() -> Arc<ScriptedCompletion> {
    Arc::new(
        ScriptedCompletion::new()
            .activate_in_context("thirsty", 8, "i'm thirsty")
            .reply_in_context("pepsi", "Would you like a Pepsi?"),
    )
}

fn waiter() -> Agent {
    Agent::new("Waiter", "A helpful waiter")
}

fn thirst_guideline() -> Guideline {
    Guideline::new("the customer is thirsty", "offer them a Pepsi")
}

#[tokio::test]
async fn created_events_get_sequential_offsets() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;

    for i in 0..4u64 {
        let event = h
            .engine
            .create_event(h.session_id, NewEvent::customer_message(format!("m{i}")))
            .await
            .unwrap();
        assert_eq!(event.offset, i);
        assert_eq!(event.source, EventSource::Customer);
    }
}

#[tokio::test]
async fn create_event_rejects_unknown_sessions() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;

    let result = h
        .engine
        .create_event(SessionId::new(), NewEvent::customer_message("hello"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn process_rejects_unknown_sessions() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;

    let result = h
        .engine
        .process(SessionId::new(), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(EngineError::SessionNotFound(_))));
}

#[tokio::test]
async fn list_events_filters_by_kind_and_offset() {
    let h = harness(
        thirsty_script(),
        waiter(),
        vec![thirst_guideline()],
        vec![],
        vec![],
    )
    .await;

    h.engine
        .create_event(h.session_id, NewEvent::customer_message("I'm thirsty"))
        .await
        .unwrap();
    h.engine
        .process(h.session_id, CancellationToken::new())
        .await
        .unwrap();

    let messages = h
        .engine
        .list_events(
            h.session_id,
            EventFilter::default().kinds(vec![EventKind::Message]),
        )
        .await
        .unwrap();
    assert_eq!(messages.len(), 2, "customer message plus agent reply");

    let from_two = h
        .engine
        .list_events(h.session_id, EventFilter::from_offset(2))
        .await
        .unwrap();
    assert!(from_two.iter().all(|e| e.offset >= 2));
}

#[tokio::test]
async fn long_poll_returns_once_an_event_arrives() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;
    let session_id = h.session_id;
    let engine = Arc::new(h.engine);

    let reader = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .list_events(
                    session_id,
                    EventFilter::from_offset(0).wait_for_data(Duration::from_secs(10)),
                )
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(25)).await;
    engine
        .create_event(session_id, NewEvent::customer_message("finally"))
        .await
        .unwrap();

    let events = reader.await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message_text(), Some("finally"));
}

#[tokio::test]
async fn tombstoned_events_disappear_from_listings() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;

    let first = h
        .engine
        .create_event(h.session_id, NewEvent::customer_message("delete me"))
        .await
        .unwrap();
    h.engine
        .create_event(h.session_id, NewEvent::customer_message("keep me"))
        .await
        .unwrap();

    h.engine.delete_event(h.session_id, first.id).await.unwrap();

    let events = h
        .engine
        .list_events(h.session_id, EventFilter::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message_text(), Some("keep me"));
}

#[tokio::test]
async fn inspection_exposes_the_turn_reasoning() {
    let h = harness(
        thirsty_script(),
        waiter(),
        vec![thirst_guideline()],
        vec![],
        vec![],
    )
    .await;

    h.engine
        .create_event(h.session_id, NewEvent::customer_message("I'm thirsty"))
        .await
        .unwrap();
    let outcome = h
        .engine
        .process(h.session_id, CancellationToken::new())
        .await
        .unwrap();

    let trace = h
        .engine
        .inspect_event(h.session_id, outcome.messages[0].id)
        .await
        .unwrap();
    assert_eq!(trace.correlation_root, outcome.correlation_root);
    assert_eq!(trace.active_guidelines.len(), 1);
    assert!(trace
        .rationale_texts
        .iter()
        .any(|note| note.stage == "propose"));
}

#[tokio::test]
async fn turns_for_different_sessions_run_concurrently() {
    let script = thirsty_script();
    let stores = colloquy::EngineStores::in_memory();

    use colloquy::store::{AgentStore, GuidelineStore, SessionStore};
    use colloquy::types::CustomerId;
    let agent_id = stores.agents.add_agent(waiter()).await.unwrap();
    stores
        .guidelines
        .add_guideline(agent_id, thirst_guideline())
        .await
        .unwrap();

    let engine = Arc::new(
        colloquy::AlphaEngine::builder()
            .stores(stores.clone())
            .completion(script)
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let session = colloquy::Session::new(agent_id, CustomerId::new());
        let session_id = stores.sessions.create_session(session).await.unwrap();
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .create_event(session_id, NewEvent::customer_message("I'm thirsty"))
                .await
                .unwrap();
            engine
                .process(session_id, CancellationToken::new())
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.messages.len(), 1);
    }
}

#[tokio::test]
async fn status_vocabulary_round_trips_through_the_log() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;

    for status in [Status::Accepted, Status::Pending] {
        h.engine
            .create_event(
                h.session_id,
                NewEvent {
                    source: EventSource::System,
                    data: colloquy::EventData::Status {
                        status,
                        trigger_offset: -1,
                    },
                    correlation_id: None,
                },
            )
            .await
            .unwrap();
    }

    let statuses = h
        .engine
        .list_events(
            h.session_id,
            EventFilter::default().kinds(vec![EventKind::Status]),
        )
        .await
        .unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].status(), Some(Status::Accepted));
    assert_eq!(statuses[1].status(), Some(Status::Pending));
}

#[tokio::test]
async fn zz_minimal_spawn_process_only() {
    let h = harness(thirsty_script(), waiter(), vec![], vec![], vec![]).await;
    let engine = Arc::new(h.engine);
    let session_id = h.session_id;
    engine
        .create_event(session_id, NewEvent::customer_message("I'm thirsty"))
        .await
        .unwrap();
    let e2 = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        e2.process(session_id, CancellationToken::new()).await.unwrap()
    });
    handle.await.unwrap();
}
