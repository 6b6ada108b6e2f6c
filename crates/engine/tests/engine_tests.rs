//! Integration tests for the engine facade: the control surface plus
//! per-project exclusivity, against the mock backend.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use scn::{Engine, EngineConfig, EngineError};
use scn_protocol::{ServerMessage, SessionStatus, TestPlan, ValidationError};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn test_engine() -> Engine {
	Engine::new(EngineConfig { step_delay: Duration::ZERO, ..Default::default() })
}

fn plan(value: serde_json::Value) -> TestPlan {
	serde_json::from_value(value).unwrap()
}

fn single_step_plan() -> TestPlan {
	plan(serde_json::json!({
		"scenarios": [{
			"name": "smoke",
			"steps": [{ "action": "navigate", "url": "https://example.test/" }]
		}]
	}))
}

fn gated_plan() -> TestPlan {
	plan(serde_json::json!({
		"scenarios": [{
			"name": "gated",
			"steps": [{ "action": "navigate", "url": "https://example.test/", "humanVerification": true }]
		}]
	}))
}

async fn recv_for(
	rx: &mut UnboundedReceiver<ServerMessage>,
	session_id: u64,
) -> ServerMessage {
	loop {
		let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
			.await
			.expect("timed out waiting for event")
			.expect("event channel closed");
		if event.session_id() == Some(session_id) {
			return event;
		}
	}
}

async fn wait_until_complete(rx: &mut UnboundedReceiver<ServerMessage>, session_id: u64) {
	loop {
		if let ServerMessage::ExecutionComplete { .. } = recv_for(rx, session_id).await {
			return;
		}
	}
}

#[tokio::test]
async fn start_returns_id_synchronously_and_completes_over_events() {
	let engine = test_engine();
	let mut sub = engine.subscribe();

	let session_id = engine.start_execution(1, None, &single_step_plan()).unwrap();
	wait_until_complete(&mut sub.rx, session_id).await;

	let session = engine.session(session_id).unwrap();
	assert_eq!(session.status, SessionStatus::Completed);
	assert_eq!(session.current_step, 1);
	assert_eq!(session.total_steps, 1);
	assert!(session.completed_at.is_some());
	assert!(session.logs.iter().any(|l| l.message == "All tests completed successfully"));
}

#[tokio::test]
async fn second_execution_for_active_project_is_rejected() {
	let engine = test_engine();
	let mut sub = engine.subscribe();

	// The gated plan parks in manual verification, keeping the project
	// active for as long as the test needs.
	let session_id = engine.start_execution(7, None, &gated_plan()).unwrap();
	loop {
		if let ServerMessage::ManualVerificationRequired { .. } =
			recv_for(&mut sub.rx, session_id).await
		{
			break;
		}
	}

	let err = engine.start_execution(7, None, &single_step_plan()).unwrap_err();
	assert!(matches!(err, EngineError::AlreadyRunning { project_id: 7 }));

	// A different project is free to run.
	let other = engine.start_execution(8, None, &single_step_plan()).unwrap();
	wait_until_complete(&mut sub.rx, other).await;

	// Once the first session finishes, the project can execute again.
	engine.complete_manual_verification(session_id).unwrap();
	wait_until_complete(&mut sub.rx, session_id).await;
	engine.start_execution(7, None, &single_step_plan()).unwrap();
}

#[tokio::test]
async fn invalid_plan_is_rejected_before_any_session_exists() {
	let engine = test_engine();

	let err = engine.start_execution(1, None, &plan(serde_json::json!({ "scenarios": [] }))).unwrap_err();
	assert!(matches!(err, EngineError::Validation(ValidationError::EmptyPlan)));

	let err = engine
		.start_execution(
			1,
			None,
			&plan(serde_json::json!({
				"scenarios": [{ "name": "bad", "steps": [{ "action": "click" }] }]
			})),
		)
		.unwrap_err();
	assert!(matches!(err, EngineError::Validation(ValidationError::MissingField { .. })));

	assert!(engine.sessions().is_empty());
}

#[tokio::test]
async fn control_signals_for_unknown_sessions_fail() {
	let engine = test_engine();
	assert!(matches!(engine.pause(41), Err(EngineError::SessionNotFound { id: 41 })));
	assert!(matches!(engine.resume(41), Err(EngineError::SessionNotFound { id: 41 })));
	assert!(matches!(engine.stop(41), Err(EngineError::SessionNotFound { id: 41 })));
	assert!(matches!(
		engine.complete_manual_verification(41),
		Err(EngineError::SessionNotFound { id: 41 })
	));
}

#[tokio::test]
async fn verification_signal_resumes_only_the_targeted_session() {
	let engine = test_engine();
	let mut sub = engine.subscribe();

	let first = engine.start_execution(1, None, &gated_plan()).unwrap();
	let second = engine.start_execution(2, None, &gated_plan()).unwrap();

	// Both sessions reach their verification gates, in whatever order.
	let mut gated = std::collections::HashSet::new();
	while gated.len() < 2 {
		let event = tokio::time::timeout(EVENT_TIMEOUT, sub.rx.recv())
			.await
			.expect("timed out waiting for event")
			.expect("event channel closed");
		if let ServerMessage::ManualVerificationRequired { session_id, .. } = event {
			gated.insert(session_id);
		}
	}
	assert_eq!(gated, std::collections::HashSet::from([first, second]));

	engine.complete_manual_verification(first).unwrap();
	wait_until_complete(&mut sub.rx, first).await;

	// The untargeted session is still gated.
	assert_eq!(engine.session(second).unwrap().status, SessionStatus::ManualVerification);

	engine.complete_manual_verification(second).unwrap();
	wait_until_complete(&mut sub.rx, second).await;
}

#[tokio::test]
async fn sessions_are_retained_for_historical_reads() {
	let engine = test_engine();
	let mut sub = engine.subscribe();

	let a = engine.start_execution(1, None, &single_step_plan()).unwrap();
	wait_until_complete(&mut sub.rx, a).await;
	let b = engine.start_execution(1, None, &single_step_plan()).unwrap();
	wait_until_complete(&mut sub.rx, b).await;

	let sessions = engine.sessions();
	assert_eq!(sessions.len(), 2);
	assert!(sessions.iter().all(|s| s.status == SessionStatus::Completed));
	assert!(sessions[0].id < sessions[1].id);
}

#[tokio::test]
async fn every_observer_sees_every_sessions_events() {
	let engine = test_engine();
	let mut first = engine.subscribe();
	let mut second = engine.subscribe();

	let session_id = engine.start_execution(1, None, &single_step_plan()).unwrap();

	wait_until_complete(&mut first.rx, session_id).await;
	wait_until_complete(&mut second.rx, session_id).await;

	engine.unsubscribe(first.id);
	engine.unsubscribe(second.id);
	assert_eq!(engine.broadcaster().observer_count(), 0);
}
