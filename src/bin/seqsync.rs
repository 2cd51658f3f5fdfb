use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use seqsync::app::App;
use seqsync::config::Config;
use seqsync::error::SyncError;
use seqsync::host::HostHttpClient;
use seqsync::portal::PortalHttpClient;
use seqsync::records::EntityType;
use seqsync::registry::RegistryHttpClient;
use seqsync::search::SearchHttpClient;
use seqsync::submit::SubmitOutcome;

#[derive(Parser)]
#[command(name = "seqsync")]
#[command(about = "Mirror sequencing LIMS records: pull run results in, push record graphs out")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile upstream sequencing projects into the registry")]
    Reconcile(ReconcileArgs),
    #[command(about = "Submit a registry record and its dependencies to the portal")]
    Submit(SubmitArgs),
}

#[derive(Args)]
struct ReconcileArgs {
    #[arg(required = true)]
    project_ids: Vec<String>,
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(value_enum)]
    entity: EntityType,

    id: u64,

    #[arg(long, help = "PATCH the already-submitted record instead of POSTing")]
    patch: bool,

    #[arg(
        long,
        help = "Degrade portal authorization failures on PATCH to warnings"
    )]
    ignore_forbidden: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<SyncError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MissingEnv(_)
        | SyncError::RecordNotFound { .. }
        | SyncError::NeverSubmitted { .. }
        | SyncError::UnknownProvider(_) => 2,
        SyncError::RegistryHttp(_)
        | SyncError::RegistryStatus { .. }
        | SyncError::HostHttp(_)
        | SyncError::HostStatus { .. }
        | SyncError::PortalHttp(_)
        | SyncError::PortalStatus { .. }
        | SyncError::SearchHttp(_)
        | SyncError::SearchStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().into_diagnostic()?;

    let registry = RegistryHttpClient::new(&config.registry).into_diagnostic()?;
    let host = HostHttpClient::new(&config.host).into_diagnostic()?;
    let portal = PortalHttpClient::new(&config.portal).into_diagnostic()?;
    let search = SearchHttpClient::new(&config.search).into_diagnostic()?;
    let app = App::new(
        registry,
        host,
        portal,
        search,
        config.host.provider_name.clone(),
    );

    match cli.command {
        Commands::Reconcile(args) => {
            let report = app.sync_projects(&args.project_ids);
            println!(
                "{}",
                serde_json::to_string_pretty(&report).into_diagnostic()?
            );
            if report.has_failures() {
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Submit(args) => {
            let outcome = app
                .submit_entity(args.entity, args.id, args.patch, !args.ignore_forbidden)
                .into_diagnostic()?;
            let summary = match outcome {
                SubmitOutcome::Submitted(upstream) => serde_json::json!({
                    "entity": args.entity.path(),
                    "id": args.id,
                    "upstream_identifier": upstream,
                }),
                SubmitOutcome::DryRun => serde_json::json!({
                    "entity": args.entity.path(),
                    "id": args.id,
                    "dry_run": true,
                }),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).into_diagnostic()?
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
