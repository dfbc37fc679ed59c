mod common;

use chatgen::transcript::TranscriptStore;
use chatgen::{
    ChatSession, GenerationEngine, ModelError, ModelInputs, ModelOutputs, ModelPort, SessionError,
    StopReason, TurnStatus,
};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::mpsc;

#[test]
fn submit_and_wait() {
    let model = ScriptedModel::new(vec![Step::Favor(HELLO), Step::Favor(EOS)], Step::Favor(EOS));
    let engine = GenerationEngine::new(config(5, 32), tokenizer(), model).unwrap();
    let session = ChatSession::spawn(engine, None);

    let reply = session.submit("hi").unwrap().wait().unwrap();
    assert_eq!(reply.status, TurnStatus::Completed(StopReason::EndOfSequence));
    assert_eq!(reply.text, "hello");
    assert!(!session.is_busy());
}

#[test]
fn second_submit_while_in_flight_is_busy() {
    let (gate_tx, gate_rx) = mpsc::channel();
    let mut model = ScriptedModel::always(Step::Favor(HELLO));
    model.gate = Some(gate_rx);
    let engine = GenerationEngine::new(config(1, 32), tokenizer(), model).unwrap();
    let session = ChatSession::spawn(engine, None);

    let pending = session.submit("hello").unwrap();
    assert_eq!(session.submit("again").err(), Some(SessionError::Busy));

    gate_tx.send(()).unwrap();
    let reply = pending.wait().unwrap();
    assert_eq!(reply.tokens, vec![HELLO]);

    gate_tx.send(()).unwrap();
    assert!(session.submit("again").unwrap().wait().unwrap().is_completed());
}

#[test]
fn blank_submit_resolves_immediately() {
    let model = ScriptedModel::always(Step::Favor(HELLO));
    let calls = model.calls.clone();
    let engine = GenerationEngine::new(config(3, 32), tokenizer(), model).unwrap();
    let session = ChatSession::spawn(engine, None);

    let mut pending = session.submit("   ").unwrap();
    let reply = pending.poll().unwrap().unwrap();
    assert_eq!(reply.status, TurnStatus::Skipped);
    assert!(!session.is_busy());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_stops_between_steps() {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let mut model = ScriptedModel::always(Step::Favor(HELLO));
    model.gate = Some(gate_rx);
    let engine = GenerationEngine::new(config(10, 32), tokenizer(), model).unwrap();
    let session = ChatSession::spawn(engine, None);

    let pending = session.submit("hello").unwrap();
    pending.cancel();
    // let the step already waiting on the gate finish
    gate_tx.send(()).unwrap();
    let reply = pending.wait().unwrap();
    assert_eq!(reply.status, TurnStatus::Cancelled);
    assert!(reply.tokens.len() <= 1);
}

#[test]
fn finished_turns_reach_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("turns.db");
    let model = ScriptedModel::always(Step::Favor(WORLD));
    let engine = GenerationEngine::new(config(2, 32), tokenizer(), model).unwrap();
    let session = ChatSession::spawn(engine, Some(TranscriptStore::new(&db).unwrap()));

    session.submit("hello").unwrap().wait().unwrap();
    session.submit("").unwrap().wait().unwrap();
    session.submit("hi there").unwrap().wait().unwrap();

    let store = TranscriptStore::new(&db).unwrap();
    let entries = store.recent(10).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].user_message, "hello");
    assert_eq!(entries[0].reply, "world world");
    assert_eq!(entries[1].outcome, "completed:max_new_tokens");
}

#[test]
fn reset_clears_context_between_turns() {
    let model = ScriptedModel::always(Step::Favor(EOS));
    let inputs = model.inputs.clone();
    let engine = GenerationEngine::new(config(3, 32), tokenizer(), model).unwrap();
    let session = ChatSession::spawn(engine, None);

    session.submit("hello").unwrap().wait().unwrap();
    session.reset().unwrap();
    session.submit("hello").unwrap().wait().unwrap();

    let seen = inputs.lock().unwrap();
    let first_turn_prompt = &seen[0];
    let last_turn_prompt = seen.iter().rev().nth(1).unwrap();
    assert_eq!(first_turn_prompt, last_turn_prompt);
}

struct PanickingModel;

impl ModelPort for PanickingModel {
    fn run(&mut self, _inputs: &ModelInputs) -> Result<ModelOutputs, ModelError> {
        panic!("kernel fault");
    }
}

#[test]
fn panicking_model_aborts_turn_and_frees_session() {
    let engine = GenerationEngine::new(config(3, 32), tokenizer(), PanickingModel).unwrap();
    let session = ChatSession::spawn(engine, None);

    let reply = session.submit("hello").unwrap().wait().unwrap();
    match &reply.status {
        TurnStatus::Aborted(ModelError::Runtime(message)) => {
            assert!(message.contains("kernel fault"))
        }
        other => panic!("expected an aborted turn, got {:?}", other),
    }
    assert!(reply.tokens.is_empty());
    assert!(!session.is_busy());

    // the worker survives and keeps serving turns
    let again = session.submit("hello").unwrap().wait().unwrap();
    assert!(again.error().is_some());
}
