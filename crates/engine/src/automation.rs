//! The automation capability contract.
//!
//! Everything the executor needs from a browser, expressed as one trait so
//! the engine never depends on a concrete backend. Implementations live in
//! [`crate::backend`]; the engine picks one at configuration time and never
//! branches on which is active afterwards.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdapterError;

type Result<T> = std::result::Result<T, AdapterError>;

/// Backend-agnostic browser capability set.
///
/// Every operation may suspend until the backend completes and may fail
/// with an [`AdapterError`]. Side effects are confined to live browser
/// state; no operation touches the session record.
#[async_trait]
pub trait Automation: Send + Sync {
	/// Loads `url` in the active page and waits for the load to settle.
	async fn navigate(&self, url: &str) -> Result<()>;

	/// Clicks the element matched by `selector`.
	async fn click(&self, selector: &str) -> Result<()>;

	/// Types `value` into the element matched by `selector`.
	async fn fill(&self, selector: &str, value: &str) -> Result<()>;

	/// Returns the rendered text of the matched element.
	async fn get_text(&self, selector: &str) -> Result<String>;

	/// Returns an attribute value, or `None` when the attribute is absent.
	async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>>;

	/// Returns a computed style property of the matched element.
	async fn get_style(&self, selector: &str, prop: &str) -> Result<String>;

	/// Returns the current input value of the matched element.
	async fn get_value(&self, selector: &str) -> Result<String>;

	/// Returns the page's current URL.
	async fn current_url(&self) -> Result<String>;

	/// Suspends until `selector` matches an element or `timeout_ms` elapses.
	async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()>;

	/// Returns whether the matched element is visible; `false` when no
	/// element matches.
	async fn is_visible(&self, selector: &str) -> Result<bool>;

	/// Returns the raw text content of the matched element; empty when no
	/// element matches.
	async fn text_content(&self, selector: &str) -> Result<String>;

	/// Reads content inside a nested browsing context: waits for the frame
	/// matched by `frame_selector`, then returns the text of
	/// `content_selector` within it.
	async fn frame_content(&self, frame_selector: &str, content_selector: &str) -> Result<String>;

	/// Installs a request-matching rule that fulfills matching network
	/// requests with canned data and passes everything else through.
	async fn intercept_network(&self, rule: InterceptRule) -> Result<()>;

	/// Releases all backend resources. Invoked on every terminal exit path
	/// of a session's backend instance.
	async fn close(&self) -> Result<()>;
}

/// A network interception rule.
///
/// Requests whose URL matches `url` (simple `*` wildcards) and whose method
/// matches `method` are fulfilled with `mock_data`; everything else
/// continues to the network, optionally with `inject_headers` added.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptRule {
	pub url: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(default = "default_status")]
	pub status: u16,
	#[serde(default = "default_content_type")]
	pub content_type: String,
	pub mock_data: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inject_headers: Option<HashMap<String, String>>,
}

fn default_status() -> u16 {
	200
}

fn default_content_type() -> String {
	"application/json".to_string()
}

impl InterceptRule {
	/// Rule fulfilling `GET **/{path}` with `mock_data`.
	pub fn get(url: impl Into<String>, mock_data: Value) -> Self {
		Self {
			url: url.into(),
			method: Some("GET".to_string()),
			status: default_status(),
			content_type: default_content_type(),
			mock_data,
			inject_headers: None,
		}
	}

	/// Whether a request matches this rule's URL pattern and method.
	pub fn matches(&self, url: &str, method: &str) -> bool {
		if let Some(expected) = &self.method {
			if !expected.eq_ignore_ascii_case(method) {
				return false;
			}
		}
		pattern_matches(&self.url, url)
	}
}

/// Installs one rule per `(url suffix, body)` pair of a mock bundle.
///
/// Each key is registered as `**/{key}` so callers can mock API routes
/// without spelling out the deployment host.
pub async fn register_mocks<A: Automation + ?Sized>(
	automation: &A,
	bundle: HashMap<String, Value>,
) -> Result<()> {
	for (url, mock_data) in bundle {
		automation
			.intercept_network(InterceptRule::get(format!("**/{url}"), mock_data))
			.await?;
	}
	Ok(())
}

/// Minimal `*` wildcard matcher for URL patterns ( `*` spans any run of
/// characters, including `/`).
pub(crate) fn pattern_matches(pattern: &str, text: &str) -> bool {
	fn inner(pattern: &[u8], text: &[u8]) -> bool {
		match pattern.split_first() {
			None => text.is_empty(),
			Some((b'*', rest)) => {
				(0..=text.len()).any(|skip| inner(rest, &text[skip..]))
			}
			Some((ch, rest)) => text.split_first().is_some_and(|(t, ts)| t == ch && inner(rest, ts)),
		}
	}
	// Collapse `**` runs; they are equivalent to a single `*` here.
	let collapsed: Vec<u8> = {
		let mut out = Vec::with_capacity(pattern.len());
		let mut prev_star = false;
		for b in pattern.bytes() {
			if b == b'*' && prev_star {
				continue;
			}
			prev_star = b == b'*';
			out.push(b);
		}
		out
	};
	inner(&collapsed, text.as_bytes())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn pattern_matching() {
		assert!(pattern_matches("*", "https://example.com/api/users"));
		assert!(pattern_matches("**/api/users", "https://example.com/api/users"));
		assert!(pattern_matches("https://example.com/*", "https://example.com/anything"));
		assert!(!pattern_matches("**/api/users", "https://example.com/api/orders"));
		assert!(pattern_matches("exact", "exact"));
		assert!(!pattern_matches("exact", "exactly"));
	}

	#[test]
	fn rule_matches_url_and_method() {
		let rule = InterceptRule::get("**/api/session", json!({ "ok": true }));
		assert!(rule.matches("https://portal.example.com/api/session", "GET"));
		assert!(rule.matches("https://portal.example.com/api/session", "get"));
		assert!(!rule.matches("https://portal.example.com/api/session", "POST"));
		assert!(!rule.matches("https://portal.example.com/api/other", "GET"));
	}

	#[test]
	fn rule_without_method_matches_any_method() {
		let rule = InterceptRule {
			url: "**/api/*".to_string(),
			method: None,
			status: 200,
			content_type: "application/json".to_string(),
			mock_data: json!({}),
			inject_headers: None,
		};
		assert!(rule.matches("https://x.test/api/a", "GET"));
		assert!(rule.matches("https://x.test/api/b", "DELETE"));
	}

	#[test]
	fn rule_defaults_from_wire_form() {
		let rule: InterceptRule =
			serde_json::from_value(json!({ "url": "**/api/otp", "mockData": { "code": "123456" } })).unwrap();
		assert_eq!(rule.status, 200);
		assert_eq!(rule.content_type, "application/json");
		assert!(rule.method.is_none());
	}
}
