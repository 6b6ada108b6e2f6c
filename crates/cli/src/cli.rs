use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use scn::BackendKind;
use url::Url;

use crate::{run, server};

#[derive(Parser)]
#[command(name = "scn", about = "Declarative UI test scenario runner", version)]
pub struct Cli {
	/// Increase log verbosity (-v, -vv)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Run the HTTP/WebSocket server
	Serve {
		#[arg(long, default_value = "127.0.0.1")]
		host: String,
		#[arg(long, default_value_t = 8787)]
		port: u16,
		#[command(flatten)]
		engine: EngineArgs,
	},
	/// Execute a plan file directly, streaming progress to the terminal
	Run {
		/// Path to a JSON plan file
		plan: PathBuf,
		/// Project id to record the session under
		#[arg(long, default_value_t = 1)]
		project: u64,
		#[command(flatten)]
		engine: EngineArgs,
	},
	/// Validate a plan file and print its shape
	Check {
		/// Path to a JSON plan file
		plan: PathBuf,
	},
}

/// Engine settings shared by `serve` and `run`. Flags take precedence
/// over the config file; unset values fall back to engine defaults.
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
	/// Automation backend (cdp, mock)
	#[arg(long)]
	pub backend: Option<BackendKind>,

	/// DevTools WebSocket endpoint for the cdp backend
	#[arg(long)]
	pub cdp_url: Option<String>,

	/// Base URL resolved against relative navigation steps
	#[arg(long)]
	pub base_url: Option<Url>,

	/// Inter-step pacing delay in milliseconds
	#[arg(long)]
	pub step_delay_ms: Option<u64>,

	/// Default waitForSelector timeout in milliseconds
	#[arg(long)]
	pub timeout_ms: Option<u64>,

	/// Navigation timeout in milliseconds
	#[arg(long)]
	pub nav_timeout_ms: Option<u64>,

	/// JSON config file carrying the same settings
	#[arg(long)]
	pub config: Option<PathBuf>,
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
	match cli.command {
		Command::Serve { host, port, engine } => {
			let config = crate::config::build_engine_config(&engine)?;
			server::serve(config, &host, port).await
		}
		Command::Run { plan, project, engine } => {
			let config = crate::config::build_engine_config(&engine)?;
			run::run_plan(&plan, project, config).await
		}
		Command::Check { plan } => run::check_plan(&plan),
	}
}
