//! Direct plan execution and validation from the command line.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use colored::Colorize;
use tracing::debug;

use scn::{Engine, EngineConfig};
use scn_protocol::{ServerMessage, TestPlan};

fn load_plan(path: &Path) -> Result<TestPlan> {
	let raw = std::fs::read_to_string(path)
		.with_context(|| format!("reading plan file {}", path.display()))?;
	serde_json::from_str(&raw).with_context(|| format!("parsing plan file {}", path.display()))
}

/// Executes a plan file against the configured backend, streaming
/// progress lines as events arrive. A step gated on human verification
/// prompts on the terminal and resumes once the operator confirms.
pub async fn run_plan(path: &Path, project_id: u64, config: EngineConfig) -> Result<()> {
	let plan = load_plan(path)?;

	let engine = Engine::new(config);
	let mut subscription = engine.subscribe();
	let session_id = engine.start_execution(project_id, None, &plan)?;
	debug!(target = "scn.run", session_id, "execution started");

	loop {
		let event = subscription
			.rx
			.recv()
			.await
			.ok_or_else(|| anyhow!("event channel closed before the run finished"))?;
		if event.session_id() != Some(session_id) {
			continue;
		}

		match event {
			ServerMessage::ExecutionUpdate { current_step, total_steps, message, .. } => {
				println!("{} {message}", format!("[{current_step}/{total_steps}]").dimmed());
			}
			ServerMessage::ManualVerificationRequired { .. } => {
				println!(
					"{} Manual verification required. Press Enter when done.",
					"!".yellow().bold()
				);
				tokio::task::spawn_blocking(|| {
					let mut line = String::new();
					let _ = std::io::stdin().read_line(&mut line);
				})
				.await
				.context("waiting for confirmation")?;
				engine.complete_manual_verification(session_id)?;
			}
			ServerMessage::ExecutionComplete { message, .. } => {
				println!("{} {message}", "ok".green().bold());
				return Ok(());
			}
			ServerMessage::ExecutionError { message, .. } => {
				println!("{} {message}", "failed".red().bold());
				bail!("execution failed: {message}");
			}
			ServerMessage::Pong => {}
		}
	}
}

/// Validates a plan file and prints its shape.
pub fn check_plan(path: &Path) -> Result<()> {
	let plan = load_plan(path)?;
	plan.validate()?;

	for scenario in &plan.scenarios {
		println!("{}: {} steps", scenario.name, scenario.steps.len());
	}
	println!(
		"{} {} scenarios, {} steps total",
		"ok".green().bold(),
		plan.scenarios.len(),
		plan.total_steps()
	);
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	fn write_plan(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("plan.json");
		let mut file = std::fs::File::create(&path).unwrap();
		file.write_all(contents.as_bytes()).unwrap();
		(dir, path)
	}

	#[test]
	fn check_accepts_a_valid_plan() {
		let (_dir, path) = write_plan(
			r#"{ "scenarios": [{ "name": "smoke", "steps": [{ "action": "navigate", "url": "https://example.test/" }] }] }"#,
		);
		check_plan(&path).unwrap();
	}

	#[test]
	fn check_rejects_missing_fields() {
		let (_dir, path) =
			write_plan(r#"{ "scenarios": [{ "name": "bad", "steps": [{ "action": "click" }] }] }"#);
		let err = check_plan(&path).unwrap_err();
		assert!(err.to_string().contains("requires `selector`"));
	}

	#[test]
	fn check_rejects_unparseable_json() {
		let (_dir, path) = write_plan("{ not json");
		assert!(check_plan(&path).is_err());
	}

	#[test]
	fn missing_file_is_reported_with_its_path() {
		let err = check_plan(Path::new("/nonexistent/plan.json")).unwrap_err();
		assert!(err.to_string().contains("/nonexistent/plan.json"));
	}

	#[tokio::test]
	async fn run_executes_against_the_mock_backend() {
		let (_dir, path) = write_plan(
			r#"{ "scenarios": [{ "name": "smoke", "steps": [
				{ "action": "navigate", "url": "https://example.test/" },
				{ "action": "expect", "selector": "body" }
			] }] }"#,
		);
		let config = EngineConfig { step_delay: std::time::Duration::ZERO, ..Default::default() };
		run_plan(&path, 1, config).await.unwrap();
	}

	#[tokio::test]
	async fn run_fails_on_invalid_plans() {
		let (_dir, path) = write_plan(r#"{ "scenarios": [] }"#);
		let config = EngineConfig { step_delay: std::time::Duration::ZERO, ..Default::default() };
		assert!(run_plan(&path, 1, config).await.is_err());
	}
}
