use anyhow::Result;
use certmanager_operator::{
	commands,
	telemetry::{self, LogFormat},
};
use clap::{Parser, Subcommand};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "certmanager-operator")]
#[command(about = "Installs cert-manager for every CertManager object", long_about = None)]
#[command(version)]
struct Cli {
	/// Log level (trace, debug, info, warn, error); falls back to RUST_LOG
	#[arg(long, global = true)]
	log_level: Option<Level>,

	/// Log line format
	#[arg(long, global = true, value_enum, default_value_t = LogFormat::Auto)]
	log_format: LogFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the controller
	Run(commands::run::RunArgs),

	/// Print the CertManager CustomResourceDefinition
	Crd(commands::crd::CrdArgs),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.log_level, cli.log_format)?;

	match cli.command {
		Commands::Run(args) => commands::run::run(args),
		Commands::Crd(args) => commands::crd::run(args, std::io::stdout()),
	}
}
