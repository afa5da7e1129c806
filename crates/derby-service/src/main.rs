//! Main entry point for the Chain Derby race runner.
//!
//! Loads the configuration, provisions wallets, waits until the selected
//! chains are funded, runs one race and prints the scoreboard. While racing,
//! typing `skip <chain-id>` on stdin forces a stuck chain to finish.

use clap::Parser;
use derby_adapters::{AdapterFactory, RetryPolicy};
use derby_config::Config;
use derby_core::{RaceBuilder, RaceEngine};
use derby_types::{ChainId, RacePhase};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

mod scoreboard;
mod wallets;

use derby_storage::implementations::http::create_recorder as create_http_recorder;
use derby_storage::implementations::memory::create_recorder as create_memory_recorder;

/// Command-line arguments for the race runner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/derby.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Transactions per chain, overriding the configuration
	#[arg(short, long)]
	transactions: Option<usize>,

	/// Chain ids to race, overriding the configured selection
	#[arg(long = "chain")]
	chains: Vec<String>,
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt().with_env_filter(env_filter).with_target(true).init();

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!(chains = config.chains.len(), "Loaded configuration");

	let engine = build_engine(config)?;
	if let Some(count) = args.transactions {
		engine.set_transaction_count(count)?;
	}
	if !args.chains.is_empty() {
		engine.set_selection(parse_chain_ids(&args.chains))?;
	}

	run(&engine).await?;
	Ok(())
}

/// Builds the race engine with every adapter family and recorder.
fn build_engine(config: Config) -> Result<RaceEngine, Box<dyn std::error::Error>> {
	let wallets = wallets::provision_wallets(&config.wallets)?;
	let policy = RetryPolicy::new(
		config.race.retry_count,
		config.race.retry_base_delay(),
		config.race.operation_timeout(),
	);
	let adapters = AdapterFactory::new(wallets, policy);

	let recorder_factories = create_factory_map!(
		derby_storage::RecorderInterface,
		derby_storage::StorageError,
		"http" => create_http_recorder,
		"memory" => create_memory_recorder,
	);

	Ok(RaceBuilder::new(config).build(&adapters, recorder_factories)?)
}

/// Integers are EVM ids, anything else a named id.
fn parse_chain_id(id: &str) -> ChainId {
	match id.parse::<u64>() {
		Ok(numeric) => ChainId::from(numeric),
		Err(_) => ChainId::from(id),
	}
}

fn parse_chain_ids(ids: &[String]) -> Vec<ChainId> {
	ids.iter().map(|id| parse_chain_id(id)).collect()
}

async fn run(engine: &RaceEngine) -> Result<(), Box<dyn std::error::Error>> {
	for excluded in engine.excluded_chains() {
		println!("Skipping {}: {}", excluded.id, excluded.reason);
	}

	engine.check_balances().await?;
	if engine.phase() != RacePhase::Ready {
		println!("Fund these wallets to start racing:");
		print!(
			"{}",
			scoreboard::render_balances(engine.adapters(), &engine.balances())
		);
		let watcher = engine.spawn_balance_watcher();
		tokio::select! {
			_ = engine.wait_for_phase(RacePhase::Ready) => {},
			_ = tokio::signal::ctrl_c() => {
				watcher.abort();
				tracing::info!("Interrupted while waiting for funds");
				return Ok(());
			}
		}
		watcher.abort();
	}
	print!(
		"{}",
		scoreboard::render_balances(engine.adapters(), &engine.balances())
	);

	let race_id = engine.start_race().await?;
	println!(
		"Race {} started with {} transactions per chain",
		race_id,
		engine.transaction_count()
	);

	let listener = spawn_skip_listener(engine.clone());
	tokio::select! {
		_ = engine.wait_for_phase(RacePhase::Finished) => {},
		_ = tokio::signal::ctrl_c() => {
			listener.abort();
			engine.reset().await?;
			tracing::info!("Race aborted");
			return Ok(());
		}
	}
	listener.abort();

	print!("{}", scoreboard::render_results(&engine.results()));
	if let Some(summary) = engine.flush_persistence().await {
		tracing::info!(title = %summary.title, "Race session saved");
	}
	Ok(())
}

/// Reads `skip <chain-id>` commands from stdin for the running race.
fn spawn_skip_listener(engine: RaceEngine) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut lines = BufReader::new(tokio::io::stdin()).lines();
		while let Ok(Some(line)) = lines.next_line().await {
			let Some(id) = line.trim().strip_prefix("skip ") else {
				continue;
			};
			let chain_id = parse_chain_id(id.trim());
			match engine.skip_chain(&chain_id).await {
				Ok(true) => println!("Skipped {}", chain_id),
				Ok(false) => println!("{} already finished", chain_id),
				Err(e) => println!("Cannot skip {}: {}", chain_id, e),
			}
		}
	})
}
