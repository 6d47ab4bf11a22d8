use clap::Parser;

use schedcheck_core::config::{DEFAULT_CONFIG_PATH, RunConfig};
use schedcheck_harness::{
    AwsCliCredentialSource, AwsCliStateQuery, ProcessInvoker, TerraformBackend,
};
use schedcheck_runner::cli::RunnerCli;
use schedcheck_runner::error::RunnerError;
use schedcheck_runner::logging::init_tracing;
use schedcheck_runner::orchestrator::Orchestrator;
use schedcheck_runner::report::{self, ReportWriter};

#[tokio::main]
async fn main() {
    let cli = RunnerCli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("schedcheck: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: RunnerCli) -> Result<i32, RunnerError> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path).await?,
        None => RunConfig::load_or_default(DEFAULT_CONFIG_PATH).await?,
    };
    cli.apply_overrides(&mut config)?;

    if cli.validate {
        println!("configuration OK");
        return Ok(0);
    }

    init_tracing(&config.general).map_err(|e| RunnerError::Setup(e.to_string()))?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "schedcheck starting");

    let backend = TerraformBackend::from_core(&config.fixture);
    let query = AwsCliStateQuery::new(config.aws.cli_bin.clone());
    let invoker = ProcessInvoker::from_core(&config.scheduler)
        .map_err(|e| RunnerError::Setup(e.to_string()))?;
    let credentials = AwsCliCredentialSource::from_core(&config.aws);

    let orchestrator = Orchestrator::new(config, backend, query, invoker, credentials);
    let result = orchestrator.run().await;

    ReportWriter::new(cli.output).render(&result)?;
    Ok(report::exit_code(&result))
}
