//! The test plan as authored: ordered scenarios of ordered steps.
//!
//! A plan is immutable once loaded. Step order inside a scenario and
//! scenario order inside a plan define execution order; each step's DOM
//! precondition depends on the side effects of the previous one, so the
//! engine never reorders or parallelizes them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One atomic browser action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
	/// Load a URL (absolute, or relative to the execution base URL).
	Navigate,
	/// Type a value into the element matched by `selector`.
	Fill,
	/// Click the element matched by `selector`.
	Click,
	/// Block until `selector` matches an element or `timeout` elapses.
	WaitForSelector,
	/// Assert the element matched by `selector` is visible.
	Expect,
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Action::Navigate => "navigate",
			Action::Fill => "fill",
			Action::Click => "click",
			Action::WaitForSelector => "waitForSelector",
			Action::Expect => "expect",
		};
		f.write_str(name)
	}
}

/// One instruction in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
	pub action: Action,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub selector: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	/// Per-step timeout in milliseconds (used by `waitForSelector`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
	/// When true, the session suspends after this step until a human
	/// confirms completion (CAPTCHA solving and the like).
	#[serde(default)]
	pub human_verification: bool,
}

impl Step {
	fn selector(&self) -> Option<&str> {
		self.selector.as_deref()
	}
}

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
	pub name: String,
	pub steps: Vec<Step>,
}

/// The full ordered description of what to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
	pub scenarios: Vec<Scenario>,
}

impl TestPlan {
	/// Total number of steps across all scenarios.
	pub fn total_steps(&self) -> u32 {
		self.scenarios.iter().map(|s| s.steps.len() as u32).sum()
	}

	/// Iterates steps in execution order: scenario order, then step order.
	pub fn steps(&self) -> impl Iterator<Item = &Step> {
		self.scenarios.iter().flat_map(|s| s.steps.iter())
	}

	/// Checks that every step carries the parameters its action requires.
	///
	/// Runs before any session is created; a plan that fails here never
	/// reaches the executor.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.total_steps() == 0 {
			return Err(ValidationError::EmptyPlan);
		}

		for scenario in &self.scenarios {
			for (index, step) in scenario.steps.iter().enumerate() {
				let missing = match step.action {
					Action::Navigate => step.url.is_none().then_some("url"),
					Action::Fill => {
						if step.selector().is_none() {
							Some("selector")
						} else if step.value.is_none() {
							Some("value")
						} else {
							None
						}
					}
					Action::Click | Action::WaitForSelector | Action::Expect => {
						step.selector().is_none().then_some("selector")
					}
				};

				if let Some(field) = missing {
					return Err(ValidationError::MissingField {
						scenario: scenario.name.clone(),
						step: index,
						action: step.action,
						field,
					});
				}
			}
		}

		Ok(())
	}
}

/// A plan that cannot be executed as written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("plan contains no steps")]
	EmptyPlan,

	#[error("scenario \"{scenario}\", step {step}: {action} requires `{field}`")]
	MissingField {
		scenario: String,
		step: usize,
		action: Action,
		field: &'static str,
	},
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn parse(value: serde_json::Value) -> TestPlan {
		serde_json::from_value(value).unwrap()
	}

	#[test]
	fn parses_camel_case_wire_form() {
		let plan = parse(json!({
			"scenarios": [{
				"name": "User Login Flow",
				"steps": [
					{ "action": "navigate", "url": "/login" },
					{ "action": "fill", "selector": "#username", "value": "testuser" },
					{ "action": "click", "selector": "#login-button" },
					{ "action": "waitForSelector", "selector": ".dashboard", "humanVerification": true, "timeout": 10000 }
				]
			}]
		}));

		assert_eq!(plan.total_steps(), 4);
		assert!(plan.validate().is_ok());

		let steps: Vec<&Step> = plan.steps().collect();
		assert_eq!(steps[0].action, Action::Navigate);
		assert_eq!(steps[3].action, Action::WaitForSelector);
		assert!(steps[3].human_verification);
		assert_eq!(steps[3].timeout, Some(10000));
		assert!(!steps[0].human_verification);
	}

	#[test]
	fn step_order_spans_scenarios() {
		let plan = parse(json!({
			"scenarios": [
				{ "name": "a", "steps": [{ "action": "navigate", "url": "/one" }] },
				{ "name": "b", "steps": [
					{ "action": "click", "selector": "#two" },
					{ "action": "expect", "selector": "#three" }
				] }
			]
		}));

		assert_eq!(plan.total_steps(), 3);
		let actions: Vec<Action> = plan.steps().map(|s| s.action).collect();
		assert_eq!(actions, vec![Action::Navigate, Action::Click, Action::Expect]);
	}

	#[test]
	fn empty_plan_is_rejected() {
		let plan = parse(json!({ "scenarios": [] }));
		assert_eq!(plan.validate(), Err(ValidationError::EmptyPlan));

		let plan = parse(json!({ "scenarios": [{ "name": "empty", "steps": [] }] }));
		assert_eq!(plan.validate(), Err(ValidationError::EmptyPlan));
	}

	#[test]
	fn missing_parameters_are_rejected() {
		let plan = parse(json!({
			"scenarios": [{ "name": "bad", "steps": [{ "action": "navigate" }] }]
		}));
		assert_eq!(
			plan.validate(),
			Err(ValidationError::MissingField {
				scenario: "bad".to_string(),
				step: 0,
				action: Action::Navigate,
				field: "url",
			})
		);

		let plan = parse(json!({
			"scenarios": [{ "name": "bad", "steps": [
				{ "action": "navigate", "url": "/ok" },
				{ "action": "fill", "selector": "#name" }
			] }]
		}));
		assert_eq!(
			plan.validate(),
			Err(ValidationError::MissingField {
				scenario: "bad".to_string(),
				step: 1,
				action: Action::Fill,
				field: "value",
			})
		);
	}

	#[test]
	fn validation_error_names_the_step() {
		let err = ValidationError::MissingField {
			scenario: "checkout".to_string(),
			step: 2,
			action: Action::Click,
			field: "selector",
		};
		assert_eq!(err.to_string(), "scenario \"checkout\", step 2: click requires `selector`");
	}
}
