//! Automation backends.
//!
//! A fixed, closed set of capability-contract implementations. The
//! backend is chosen once, from configuration, when an execution starts;
//! the engine itself never branches on which one is active.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::automation::{Automation, InterceptRule};
use crate::error::AdapterError;

mod cdp;
mod mock;

pub use cdp::CdpBackend;
pub use mock::MockBackend;

type Result<T> = std::result::Result<T, AdapterError>;

/// Which backend implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
	/// Chrome DevTools Protocol over a WebSocket.
	Cdp,
	/// In-memory scripted backend (tests, dry runs).
	#[default]
	Mock,
}

impl std::str::FromStr for BackendKind {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"cdp" => Ok(BackendKind::Cdp),
			"mock" => Ok(BackendKind::Mock),
			other => Err(format!("unknown backend '{other}' (expected: cdp, mock)")),
		}
	}
}

impl std::fmt::Display for BackendKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			BackendKind::Cdp => "cdp",
			BackendKind::Mock => "mock",
		})
	}
}

/// Backend selection, resolved once at process configuration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
	#[serde(default)]
	pub kind: BackendKind,
	/// DevTools WebSocket endpoint; required for [`BackendKind::Cdp`].
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cdp_url: Option<String>,
	/// Navigation timeout in milliseconds.
	#[serde(default = "default_nav_timeout_ms")]
	pub nav_timeout_ms: u64,
}

fn default_nav_timeout_ms() -> u64 {
	30_000
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			kind: BackendKind::Mock,
			cdp_url: None,
			nav_timeout_ms: default_nav_timeout_ms(),
		}
	}
}

/// The closed set of backends, dispatching the capability contract.
pub enum Backend {
	Cdp(CdpBackend),
	Mock(MockBackend),
}

impl Backend {
	/// Builds and connects the configured backend.
	pub async fn connect(config: &BackendConfig) -> Result<Self> {
		match config.kind {
			BackendKind::Cdp => {
				let url = config.cdp_url.as_deref().ok_or_else(|| {
					AdapterError::BackendUnavailable(
						"cdp backend selected but no cdpUrl configured".to_string(),
					)
				})?;
				Ok(Backend::Cdp(CdpBackend::connect(url, config.nav_timeout_ms).await?))
			}
			BackendKind::Mock => Ok(Backend::Mock(MockBackend::new())),
		}
	}
}

impl std::fmt::Debug for Backend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Backend::Cdp(_) => f.write_str("Backend::Cdp"),
			Backend::Mock(_) => f.write_str("Backend::Mock"),
		}
	}
}

impl From<MockBackend> for Backend {
	fn from(mock: MockBackend) -> Self {
		Backend::Mock(mock)
	}
}

macro_rules! delegate {
	($self:ident, $method:ident($($arg:expr),*)) => {
		match $self {
			Backend::Cdp(backend) => backend.$method($($arg),*).await,
			Backend::Mock(backend) => backend.$method($($arg),*).await,
		}
	};
}

#[async_trait]
impl Automation for Backend {
	async fn navigate(&self, url: &str) -> Result<()> {
		delegate!(self, navigate(url))
	}

	async fn click(&self, selector: &str) -> Result<()> {
		delegate!(self, click(selector))
	}

	async fn fill(&self, selector: &str, value: &str) -> Result<()> {
		delegate!(self, fill(selector, value))
	}

	async fn get_text(&self, selector: &str) -> Result<String> {
		delegate!(self, get_text(selector))
	}

	async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
		delegate!(self, get_attribute(selector, name))
	}

	async fn get_style(&self, selector: &str, prop: &str) -> Result<String> {
		delegate!(self, get_style(selector, prop))
	}

	async fn get_value(&self, selector: &str) -> Result<String> {
		delegate!(self, get_value(selector))
	}

	async fn current_url(&self) -> Result<String> {
		delegate!(self, current_url())
	}

	async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
		delegate!(self, wait_for_selector(selector, timeout_ms))
	}

	async fn is_visible(&self, selector: &str) -> Result<bool> {
		delegate!(self, is_visible(selector))
	}

	async fn text_content(&self, selector: &str) -> Result<String> {
		delegate!(self, text_content(selector))
	}

	async fn frame_content(&self, frame_selector: &str, content_selector: &str) -> Result<String> {
		delegate!(self, frame_content(frame_selector, content_selector))
	}

	async fn intercept_network(&self, rule: InterceptRule) -> Result<()> {
		delegate!(self, intercept_network(rule))
	}

	async fn close(&self) -> Result<()> {
		delegate!(self, close())
	}
}
