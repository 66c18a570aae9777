//! enginekit - main entry point
//!
//! Exit code 0 on success, 1 on any error (including argument errors).

use std::process::ExitCode;
use tracing::{error, info};

use enginekit::cli::{Cli, Mode};
use enginekit::config::RunConfig;
use enginekit::export;
use enginekit::logging;
use enginekit::modules::builtin_registry;
use enginekit::orchestrator::Orchestrator;

fn main() -> ExitCode {
    let cli = match Cli::try_parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    logging::init(&cli.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "enginekit starting up");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("✗ {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut registry = builtin_registry()?;

    match cli.mode()? {
        Mode::WriteConfig { dir } => {
            let summary = export::write_all(&registry, &dir, &cli.root)?;
            println!(
                "✓ Wrote {} module schema(s) and a template to {}",
                summary.defaults.len(),
                dir.display()
            );
        }
        Mode::Run {
            config,
            used_config,
        } => {
            info!(config = %config.display(), root = %cli.root, "running configuration");
            let document = RunConfig::load_from_file(&config)?;
            let report = Orchestrator::new(&mut registry)
                .with_root(cli.root.as_str())
                .run_with_snapshot(&document, &used_config)?;
            println!("✓ Run complete: {}", report.summary());
        }
    }

    Ok(())
}
