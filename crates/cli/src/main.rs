use crate::{
    conn::{OpenedStore, StoreSource},
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use commands::Commands;
use engine_config::{pipeline::PipelineDefinition, settings::EngineSettings};
use engine_core::{progress::ProgressReport, staging::StagingQueue};
use engine_runtime::{
    engine::Engine,
    error::MigrationError,
    migration::cancel_migration,
    uploads::UploadOptions,
};
use engine_transfer::error::ErrorResponse;
use futures_util::TryStreamExt;
use model::{
    core::identifiers::{ProcessId, SessionId, TargetId},
    transfer::ChunkRequest,
};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod conn;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Resumable file transfer and checkpointed data migration"
)]
struct Cli {
    #[arg(long, global = true, help = "Load FERRY_* settings from a .env file")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match run(cli, &shutdown).await {
        Ok(()) if shutdown.is_shutdown_requested() => ExitCode::ShutdownRequested,
        Ok(()) => ExitCode::Success,
        Err(CliError::ShutdownRequested) => ExitCode::ShutdownRequested,
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli, shutdown: &ShutdownCoordinator) -> Result<(), CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = &cli.env_file {
        env.load_from_file(path)?;
    }
    let settings = EngineSettings::from_vars(env.all())?;

    match cli.command {
        Commands::Upload {
            file,
            session,
            content_type,
            verify,
            withhold,
        } => {
            let engine = Engine::open(settings)?;
            let session = SessionId::parse(session)?;
            let options = UploadOptions {
                content_type,
                verify,
                withhold,
            };
            let report = engine
                .uploads()
                .upload_file(&file, &session, &options)
                .await?;
            info!(
                chunks_sent = report.chunks_sent,
                resends = report.resends,
                metrics = ?engine.metrics().snapshot(),
                "Upload finished"
            );
            output::print_json(&report.response)?;
        }
        Commands::UploadChunk { request } => {
            let engine = Engine::open(settings)?;
            let json = tokio::fs::read_to_string(&request).await?;
            let request: ChunkRequest = serde_json::from_str(&json)?;
            match engine.uploads().receive(request).await {
                Ok(response) => output::print_json(&response)?,
                Err(err) => {
                    output::print_json(&ErrorResponse::from(&err))?;
                    return Err(err.into());
                }
            }
        }
        Commands::CancelUpload { session } => {
            let engine = Engine::open(settings)?;
            let session = SessionId::parse(session)?;
            engine.uploads().cancel(&session).await?;
        }
        Commands::Download {
            file,
            range,
            output,
        } => {
            let engine = Engine::open(settings)?;
            let response = engine
                .download_server()
                .serve(&file, range.as_deref())
                .await?;

            eprintln!("HTTP {}", response.status.code());
            for (name, value) in &response.headers {
                eprintln!("{name}: {value}");
            }

            let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
                Some(path) => Box::new(tokio::fs::File::create(path).await?),
                None => Box::new(tokio::io::stdout()),
            };
            if let Some(mut body) = response.body {
                while let Some(chunk) = body.try_next().await? {
                    sink.write_all(&chunk).await?;
                }
            }
            sink.flush().await?;
            info!(metrics = ?engine.metrics().snapshot(), "Download finished");
        }
        Commands::Migrate {
            pipeline,
            target,
            checkpoint,
            database_url,
            fixture,
            until_done,
        } => {
            let definition = PipelineDefinition::from_file(&pipeline)?;
            let store = OpenedStore::open(StoreSource::from_args(database_url, fixture)?).await?;
            let engine = Engine::open(settings)?;
            let runner = engine.runner(&definition, store.row_store())?;
            let target = TargetId::new(target);

            let mut state = match output::read_checkpoint(&checkpoint).await? {
                Some(cp) if cp.target != target => {
                    return Err(MigrationError::TargetMismatch {
                        expected: target,
                        found: cp.target,
                    }
                    .into());
                }
                Some(cp) => cp,
                None => runner.begin(target),
            };

            let result = if until_done {
                runner
                    .run_until_done(&mut state, &shutdown.cancel_token())
                    .await
                    .map(|_| ())
            } else {
                runner.step(&mut state).await.map(|_| ())
            };

            output::write_checkpoint(&checkpoint, &state).await?;
            store.persist().await?;
            result?;

            output::print_progress_table(&ProgressReport::from_checkpoint(&state));
            if !state.done && shutdown.is_shutdown_requested() {
                info!(checkpoint = %checkpoint.display(), "Stopped early, resume from the checkpoint");
                return Err(CliError::ShutdownRequested);
            }
            info!(metrics = ?engine.metrics().snapshot(), "Migration invocation finished");
        }
        Commands::CancelMigration { target, process } => {
            let engine = Engine::open(settings)?;
            cancel_migration(
                engine.state().as_ref(),
                &TargetId::new(target),
                &ProcessId::new(process),
            )
            .await?;
        }
        Commands::Status { checkpoint, json } => {
            let state = output::read_checkpoint(&checkpoint)
                .await?
                .ok_or_else(|| CliError::Config(format!("no checkpoint at {}", checkpoint.display())))?;
            let report = ProgressReport::from_checkpoint(&state);
            if json {
                output::print_json(&report)?;
            } else {
                output::print_progress_table(&report);
            }
        }
        Commands::Stage { dir } => {
            let queue = StagingQueue::from_dir(&dir).await?;
            let files: Vec<_> = queue.collect();
            output::print_staging(&files);
        }
    }

    Ok(())
}
