use std::process::ExitCode;

use clap::Parser;
use tower::Service;
use tracing::error;
use tracing_subscriber::EnvFilter;

use prospect_scraper::cli::{Cli, Commands};
use prospect_scraper::service::load_config_for_run;
use prospect_scraper::{AppConfig, CatalogRegistry, PipelineError, PipelineService, RunRequest, Secrets};

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,prospect_scraper=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn list_catalogs(config_path: &std::path::Path) {
    let config = AppConfig::load(config_path).ok();
    for key in CatalogRegistry::builtin().keys() {
        let configured = config.as_ref().and_then(|c| c.catalog(&key)).is_some();
        println!("{}\t{}", key, if configured { "configured" } else { "not configured" });
    }
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    let Commands::Run { catalog, dry_run, max_companies } = cli.command else {
        list_catalogs(&cli.config);
        return Ok(());
    };

    let registry = CatalogRegistry::builtin();
    let secrets = Secrets::from_env();
    let config = load_config_for_run(&registry, &catalog, &cli.config)?;
    let mut service = PipelineService::with_registry(config, secrets, registry);

    let request = RunRequest::new(catalog)
        .with_dry_run(dry_run)
        .with_max_companies(max_companies);
    let summary = service.call(request).await?;

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| PipelineError::Config(format!("サマリのJSON化に失敗: {}", e)))?;
    println!("{}", json);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            if let PipelineError::SheetWrite { summary, .. } = &e {
                if let Ok(json) = serde_json::to_string_pretty(summary) {
                    println!("{}", json);
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}
