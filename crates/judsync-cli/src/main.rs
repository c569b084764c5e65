mod display;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use clap::{ArgAction, Args, Parser, Subcommand};
use judsync_core::config::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use judsync_core::{
    AliasTable, BatchConfig, CaseId, DataJudConfig, ProcessNumber, TribunalResolver,
    parse_timezone,
};
use judsync_store::{CaseStore, DuckStore, StoreError};
use judsync_sync::{DataJudClient, SyncRunner};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "judsync",
    version,
    about = "Keep tracked court cases in step with the CNJ DataJud public API"
)]
struct Cli {
    /// DuckDB database file holding cases and movements.
    #[arg(long, env = "JUDSYNC_DB", default_value = "judsync.duckdb", global = true)]
    db: PathBuf,

    /// UTC offset used for log and report timestamps (UTC, Z or ±HH:MM).
    #[arg(
        long,
        env = "SCHEDULER_TIMEZONE",
        default_value = "-03:00",
        value_parser = parse_timezone,
        global = true
    )]
    timezone: FixedOffset,

    #[command(flatten)]
    datajud: DataJudArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct DataJudArgs {
    /// DataJud API key.
    #[arg(long, env = "CNJ_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[arg(long, env = "CNJ_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs(), global = true)]
    timeout_secs: u64,

    /// Version reported in the User-Agent header.
    #[arg(long, env = "APP_VERSION", global = true)]
    app_version: Option<String>,

    /// Add or replace a tribunal alias, e.g. `--alias 26=api_publica_tjsp`. Repeatable.
    #[arg(long = "alias", value_parser = AliasTable::parse_override, global = true)]
    aliases: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct BatchArgs {
    #[arg(long, env = "CNJ_JOB_ENABLED", default_value_t = true, action = ArgAction::Set)]
    enabled: bool,

    #[arg(long, env = "CNJ_JOB_INTERVAL_HOURS", default_value_t = 12)]
    interval_hours: u32,

    #[arg(long, env = "CNJ_JOB_INTERVAL_MINUTES", default_value_t = 0)]
    interval_minutes: u32,

    /// Days since the last check before a case is due again.
    #[arg(long, env = "CNJ_JOB_VERIFICATION_INTERVAL_DAYS", default_value_t = 1)]
    staleness_days: u32,

    #[arg(long, env = "CNJ_JOB_MAX_CASES_PER_RUN", default_value_t = 10)]
    max_cases: usize,

    /// Pause between two consecutive DataJud queries.
    #[arg(long, env = "CNJ_JOB_REQUEST_DELAY_SECONDS", default_value_t = 5)]
    delay_seconds: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation batch over the stalest cases.
    Run(BatchArgs),
    /// Reconcile a single case now and print the outcome as JSON.
    Check(CheckArgs),
    /// Show a case and its stored movements.
    Movements {
        case_id: CaseId,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Start tracking a process number.
    Track { process_number: String },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct CheckArgs {
    case_id: Option<CaseId>,

    /// Look the case up by its process number instead of its id.
    #[arg(long)]
    number: Option<String>,
}

impl DataJudArgs {
    fn config(&self) -> DataJudConfig {
        let defaults = DataJudConfig::default();
        DataJudConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            app_version: self.app_version.clone().unwrap_or(defaults.app_version),
            ..defaults
        }
    }

    fn resolver(&self) -> TribunalResolver {
        TribunalResolver::new(AliasTable::state_courts().with_overrides(self.aliases.clone()))
    }
}

impl BatchArgs {
    fn config(&self, timezone: FixedOffset) -> BatchConfig {
        BatchConfig {
            enabled: self.enabled,
            interval_hours: self.interval_hours,
            interval_minutes: self.interval_minutes,
            staleness_days: self.staleness_days,
            max_cases_per_run: self.max_cases,
            delay_seconds: self.delay_seconds,
            timezone,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.timezone);
    info!("judsync v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        DuckStore::open_persistent(&cli.db)
            .with_context(|| format!("opening case store at {}", cli.db.display()))?,
    );

    match &cli.command {
        Command::Run(batch) => {
            let runner = runner(&cli, store, batch.config(cli.timezone));
            let report = runner.run_batch().await;
            display::print_batch_report(&report);
            Ok(if report.aborted {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Check(target) => {
            let config = BatchConfig {
                timezone: cli.timezone,
                ..BatchConfig::default()
            };
            let runner = runner(&cli, store, config);
            let outcome = match (&target.case_id, &target.number) {
                (Some(id), _) => runner.check_case(*id).await,
                (None, Some(number)) => runner.check_process(&ProcessNumber::new(number.as_str())).await,
                (None, None) => anyhow::bail!("either a case id or --number is required"),
            };
            let report = outcome.report();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.status >= 400 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Movements { case_id, limit } => {
            let case = store
                .case(*case_id)?
                .ok_or(StoreError::CaseNotFound(*case_id))?;
            let runner = runner(&cli, store, BatchConfig::default());
            let movements = runner.movements(*case_id)?;
            display::print_case(&case, &movements, *limit, cli.timezone);
            Ok(ExitCode::SUCCESS)
        }
        Command::Track { process_number } => {
            let number = ProcessNumber::new(process_number.trim());
            anyhow::ensure!(!number.is_blank(), "process number is empty");
            if !number.has_canonical_length() {
                tracing::warn!(process_number = %number, "process number does not have 20 digits");
            }
            let case = store.insert_case(&number)?;
            println!("tracking {} as case {}", number, case.id);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn runner(
    cli: &Cli,
    store: Arc<DuckStore>,
    config: BatchConfig,
) -> SyncRunner<DuckStore, DataJudClient> {
    let client = DataJudClient::new(cli.datajud.config(), cli.datajud.resolver());
    SyncRunner::new(store, Arc::new(client), config)
}
