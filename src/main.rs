use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use zbr_agent::bridge;
use zbr_agent::config::{Cli, Commands, EmitCommand, ReportingConfig};
use zbr_agent::protocol::ArtifactSource;
use zbr_agent::reporter::{Reporter, ZbrReporter};
use zbr_agent::sdk::Emitter;

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries side-channel events; logs go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zbr_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Report => report(&cli.config).await,
        Commands::Emit { event } => {
            emit(&Emitter::stdout(), event);
            Ok(())
        }
    }
}

async fn report(config_path: &Path) -> Result<()> {
    let config = ReportingConfig::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let reporter: Arc<dyn Reporter> =
        Arc::new(ZbrReporter::from_config(config).context("failed to create reporter")?);

    let stdin = BufReader::new(tokio::io::stdin());
    bridge::drive(reporter, stdin)
        .await
        .context("reporting aborted")?;
    Ok(())
}

fn emit<W: std::io::Write + Send>(emitter: &Emitter<W>, event: EmitCommand) {
    fn refs(values: &[String]) -> Vec<&str> {
        values.iter().map(String::as_str).collect()
    }

    match event {
        EmitCommand::TestLabel { key, values } => emitter.test_label(&key, &refs(&values)),
        EmitCommand::RunLabel { key, values } => emitter.run_label(&key, &refs(&values)),
        EmitCommand::TestArtifactReference { name, value } => {
            emitter.test_artifact_reference(&name, &value)
        }
        EmitCommand::RunArtifactReference { name, value } => {
            emitter.run_artifact_reference(&name, &value)
        }
        EmitCommand::TestArtifact { path, name } => {
            emitter.test_artifact(ArtifactSource::Path(path), name.as_deref())
        }
        EmitCommand::RunArtifact { path, name } => {
            emitter.run_artifact(ArtifactSource::Path(path), name.as_deref())
        }
        EmitCommand::Screenshot { path } => {
            emitter.test_screenshot(ArtifactSource::Path(path), None)
        }
        EmitCommand::Maintainer { maintainer } => emitter.set_maintainer(&maintainer),
        EmitCommand::Log { level, message } => emitter.test_log(&level, &message),
        EmitCommand::TestCase {
            tcm_type,
            case_ids,
            status,
        } => emitter.test_case(&tcm_type, &refs(&case_ids), status.as_deref()),
        EmitCommand::Revert => emitter.revert_registration(),
    }
}
