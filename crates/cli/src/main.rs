mod config;
mod output;
mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use accounting::{AccountingApi, AccountingClient, StaticToken, TenantRateBudget};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crm::{CrmClient, DealMapper};
use events::ChannelSink;
use orchestrator::{ProgressOrchestrator, SyncConfig, SyncOutcome};
use tasksync_core::{DesiredEntity, DesiredStateDocument, TaskCategory};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Overrides;

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "Reconcile accounting project tasks against timesheet and CRM data", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Accounting tenant, overrides the configuration file
    #[arg(short, long, global = true)]
    tenant: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch remote state and print the reconciliation plan
    Plan {
        #[arg(short, long)]
        desired: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reconcile; nothing is sent without --apply
    Sync {
        #[arg(short, long)]
        desired: PathBuf,

        #[arg(long)]
        apply: bool,
    },
    /// Validate CRM quotes and plan their line items
    ValidateDeals,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::load(&cli.config).await?;
    let apply = matches!(cli.command, Commands::Sync { apply: true, .. });
    let config = config::apply_overrides(
        config,
        Overrides {
            tenant: cli.tenant,
            apply,
        },
    )?;

    match cli.command {
        Commands::Plan { desired, json } => plan(&config, &desired, json).await,
        Commands::Sync { desired, .. } => sync(&config, &desired).await,
        Commands::ValidateDeals => validate_deals(&config).await,
    }
}

async fn plan(config: &SyncConfig, desired: &Path, json: bool) -> Result<()> {
    let desired = read_desired(desired).await?;
    let outcome = run(config, |orchestrator| async move { orchestrator.plan_only(desired).await }).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.plan)?);
    } else {
        output::print_plan(&outcome.plan);
        output::print_summary(&outcome);
    }
    finish(config, outcome).await
}

async fn sync(config: &SyncConfig, desired: &Path) -> Result<()> {
    let desired = read_desired(desired).await?;
    if !config.executor.mode.is_live() {
        println!("Dry run; pass --apply to send changes.");
    }

    let outcome = run(config, |orchestrator| async move { orchestrator.run(desired).await }).await?;
    output::print_summary(&outcome);
    finish(config, outcome).await
}

async fn validate_deals(config: &SyncConfig) -> Result<()> {
    let budget = Arc::new(
        TenantRateBudget::new(config.rate_limit.clone()).map_err(anyhow::Error::msg)?,
    );
    let crm = CrmClient::from_env(config.crm.clone(), budget).context("Failed to configure CRM client")?;
    let deals = crm.fetch_deals().await.context("Failed to fetch CRM deals")?;
    tracing::info!(deals = deals.len(), "Fetched CRM deals");

    let mapper = DealMapper::new(TaskCategory::Time);
    let outcome = run(config, |orchestrator| async move {
        orchestrator.validate_deals(&deals, &mapper).await
    })
    .await?;

    output::print_plan(&outcome.plan);
    output::print_summary(&outcome);
    finish(config, outcome).await
}

/// Build an orchestrator, run `f` with progress rendering, and wait for the
/// renderer to drain.
async fn run<F, Fut>(config: &SyncConfig, f: F) -> Result<SyncOutcome>
where
    F: FnOnce(ProgressOrchestrator) -> Fut,
    Fut: std::future::Future<Output = SyncOutcome>,
{
    let api = accounting_api(config)?;
    let (sink, receiver) = ChannelSink::new();
    let renderer = progress::spawn_renderer(receiver);

    let orchestrator = ProgressOrchestrator::from_config(api, config).with_sink(Arc::new(sink));
    let outcome = f(orchestrator).await;

    renderer.await.context("Progress renderer failed")?;
    Ok(outcome)
}

fn accounting_api(config: &SyncConfig) -> Result<Arc<dyn AccountingApi>> {
    let settings = &config.accounting;
    if settings.tenant_id.is_empty() {
        bail!("No tenant configured; set accounting.tenant_id or pass --tenant");
    }

    let token = StaticToken::from_env(&settings.token_env)
        .with_context(|| format!("Failed to read access token from {}", settings.token_env))?;
    let budget = Arc::new(
        TenantRateBudget::new(config.rate_limit.clone()).map_err(anyhow::Error::msg)?,
    );

    let mut client = AccountingClient::new(
        settings.base_url.clone(),
        settings.tenant_id.clone(),
        Arc::new(token),
        budget,
    );
    if let Some(currency) = &settings.currency {
        client = client.with_currency(currency.clone());
    }
    Ok(Arc::new(client))
}

async fn read_desired(path: &Path) -> Result<Vec<DesiredEntity>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document = DesiredStateDocument::from_json(&content)
        .with_context(|| format!("Invalid desired-state document {}", path.display()))?;
    tracing::info!(parents = document.parent_count(), "Loaded desired state");

    let entities = document.into_entities()?;
    Ok(entities)
}

async fn finish(config: &SyncConfig, outcome: SyncOutcome) -> Result<()> {
    if let Some(report) = &outcome.report {
        let path = report
            .write_to(&config.report.output_dir)
            .await
            .context("Failed to write report")?;
        println!();
        println!("Report: {}", path.display());
    }

    if outcome.is_aborted() {
        bail!("Reconciliation aborted");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "tasksync=debug,orchestrator=debug,accounting=debug,crm=debug,info"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}
