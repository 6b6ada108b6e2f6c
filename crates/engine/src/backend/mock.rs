//! Scripted in-memory backend for tests and dry runs.
//!
//! Records every capability call in order, serves canned values, and can
//! be scripted to fail a specific call with a specific [`AdapterError`].
//! Clones share state, so a test can keep a handle for assertions after
//! handing the backend to the executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::automation::{Automation, InterceptRule};
use crate::error::AdapterError;

type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Clone, Default)]
pub struct MockBackend {
	state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
	calls: Mutex<Vec<String>>,
	failures: Mutex<HashMap<String, AdapterError>>,
	texts: Mutex<HashMap<String, String>>,
	attributes: Mutex<HashMap<String, String>>,
	hidden: Mutex<Vec<String>>,
	rules: Mutex<Vec<InterceptRule>>,
	current_url: Mutex<String>,
	closed: Mutex<bool>,
}

impl MockBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Scripts `op` on `key` (a selector or URL) to fail with `error`.
	pub fn fail_on(&self, op: &str, key: &str, error: AdapterError) -> &Self {
		self.state.failures.lock().insert(call_key(op, key), error);
		self
	}

	/// Serves `text` for `get_text`/`text_content`/`get_value` on `selector`.
	pub fn set_text(&self, selector: &str, text: &str) -> &Self {
		self.state.texts.lock().insert(selector.to_string(), text.to_string());
		self
	}

	/// Serves `value` for `get_attribute(selector, name)`.
	pub fn set_attribute(&self, selector: &str, name: &str, value: &str) -> &Self {
		self.state.attributes.lock().insert(call_key(selector, name), value.to_string());
		self
	}

	/// Makes `is_visible(selector)` report false.
	pub fn hide(&self, selector: &str) -> &Self {
		self.state.hidden.lock().push(selector.to_string());
		self
	}

	/// Every capability call made so far, formatted as `"op arg ..."`.
	pub fn calls(&self) -> Vec<String> {
		self.state.calls.lock().clone()
	}

	/// Interception rules installed so far.
	pub fn rules(&self) -> Vec<InterceptRule> {
		self.state.rules.lock().clone()
	}

	/// Whether `close` has been called.
	pub fn closed(&self) -> bool {
		*self.state.closed.lock()
	}

	fn record(&self, op: &str, args: &[&str]) -> Result<()> {
		let mut line = op.to_string();
		for arg in args {
			line.push(' ');
			line.push_str(arg);
		}
		self.state.calls.lock().push(line);

		if let Some(first) = args.first() {
			if let Some(err) = self.state.failures.lock().get(&call_key(op, first)) {
				return Err(err.clone());
			}
		}
		Ok(())
	}

	fn text_for(&self, selector: &str) -> String {
		self.state.texts.lock().get(selector).cloned().unwrap_or_default()
	}
}

fn call_key(op: &str, key: &str) -> String {
	format!("{op} {key}")
}

#[async_trait]
impl Automation for MockBackend {
	async fn navigate(&self, url: &str) -> Result<()> {
		self.record("navigate", &[url])?;
		*self.state.current_url.lock() = url.to_string();
		Ok(())
	}

	async fn click(&self, selector: &str) -> Result<()> {
		self.record("click", &[selector])
	}

	async fn fill(&self, selector: &str, value: &str) -> Result<()> {
		self.record("fill", &[selector, value])
	}

	async fn get_text(&self, selector: &str) -> Result<String> {
		self.record("get_text", &[selector])?;
		Ok(self.text_for(selector))
	}

	async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
		self.record("get_attribute", &[selector, name])?;
		Ok(self.state.attributes.lock().get(&call_key(selector, name)).cloned())
	}

	async fn get_style(&self, selector: &str, prop: &str) -> Result<String> {
		self.record("get_style", &[selector, prop])?;
		Ok(String::new())
	}

	async fn get_value(&self, selector: &str) -> Result<String> {
		self.record("get_value", &[selector])?;
		Ok(self.text_for(selector))
	}

	async fn current_url(&self) -> Result<String> {
		self.record("current_url", &[])?;
		let url = self.state.current_url.lock().clone();
		Ok(if url.is_empty() { "about:blank".to_string() } else { url })
	}

	async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
		self.record("wait_for_selector", &[selector, &timeout_ms.to_string()])
	}

	async fn is_visible(&self, selector: &str) -> Result<bool> {
		self.record("is_visible", &[selector])?;
		Ok(!self.state.hidden.lock().iter().any(|s| s == selector))
	}

	async fn text_content(&self, selector: &str) -> Result<String> {
		self.record("text_content", &[selector])?;
		Ok(self.text_for(selector))
	}

	async fn frame_content(&self, frame_selector: &str, content_selector: &str) -> Result<String> {
		self.record("frame_content", &[frame_selector, content_selector])?;
		Ok(self.text_for(content_selector))
	}

	async fn intercept_network(&self, rule: InterceptRule) -> Result<()> {
		self.record("intercept_network", &[&rule.url])?;
		self.state.rules.lock().push(rule);
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		self.record("close", &[])?;
		*self.state.closed.lock() = true;
		Ok(())
	}
}
