//! Engine configuration resolution: flags over config file over defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use scn::{BackendKind, EngineConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::EngineArgs;

/// On-disk form of the engine settings, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
	pub backend: Option<BackendKind>,
	pub cdp_url: Option<String>,
	pub base_url: Option<String>,
	pub step_delay_ms: Option<u64>,
	pub timeout_ms: Option<u64>,
	pub nav_timeout_ms: Option<u64>,
}

impl FileConfig {
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let raw = std::fs::read_to_string(path)
			.with_context(|| format!("reading config file {}", path.display()))?;
		serde_json::from_str(&raw)
			.with_context(|| format!("parsing config file {}", path.display()))
	}
}

/// Resolves the effective engine configuration. Each setting prefers the
/// flag, then the config file, then the engine default.
pub fn build_engine_config(args: &EngineArgs) -> anyhow::Result<EngineConfig> {
	let file = match &args.config {
		Some(path) => FileConfig::load(path)?,
		None => FileConfig::default(),
	};

	let mut config = EngineConfig::default();

	if let Some(kind) = args.backend.or(file.backend) {
		config.backend.kind = kind;
	}
	if let Some(url) = args.cdp_url.clone().or(file.cdp_url) {
		config.backend.cdp_url = Some(url);
	}
	if let Some(ms) = args.nav_timeout_ms.or(file.nav_timeout_ms) {
		config.backend.nav_timeout_ms = ms;
	}
	if let Some(ms) = args.step_delay_ms.or(file.step_delay_ms) {
		config.step_delay = Duration::from_millis(ms);
	}
	if let Some(ms) = args.timeout_ms.or(file.timeout_ms) {
		config.wait_timeout_ms = ms;
	}

	config.base_url = match (&args.base_url, &file.base_url) {
		(Some(url), _) => Some(url.clone()),
		(None, Some(raw)) => {
			Some(Url::parse(raw).with_context(|| format!("invalid baseUrl in config file: {raw}"))?)
		}
		(None, None) => None,
	};

	if config.backend.kind == BackendKind::Cdp && config.backend.cdp_url.is_none() {
		anyhow::bail!("the cdp backend requires --cdp-url (or cdpUrl in the config file)");
	}

	Ok(config)
}
