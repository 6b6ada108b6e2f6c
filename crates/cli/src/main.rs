use clap::Parser;
use scn_cli::{
	cli::{self, Cli},
	logging,
};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = cli::dispatch(cli).await {
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}
