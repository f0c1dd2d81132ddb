use clap::{Parser, Subcommand};
use compaction_controller::config::Config;
use compaction_controller::demo::DemoWorker;
use compaction_controller::{Controller, ContainerDirectory, ContainerId, RunTargets};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "compaction-controller", about = "Drive the compaction control plane")]
struct Cli {
    #[arg(long, default_value_t = 8)]
    containers: u32,

    #[arg(long)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    RunAll,
    Run {
        #[arg(required = true)]
        container_ids: Vec<u32>,
    },
    Diagnose,
    Suspend,
    Resume,
    State,
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|err| {
        tracing::warn!(?err, "failed to load config, falling back to defaults");
        Config::default()
    });

    let mut directory = ContainerDirectory::new();
    for i in 0..cli.containers {
        directory.insert(ContainerId(i), Arc::new(DemoWorker::new(ContainerId(i))));
    }
    let max_concurrent = cli.max_concurrent.unwrap_or(config.max_concurrent);
    let controller = Controller::spawn(Arc::new(directory), config);

    match cli.command {
        Command::RunAll => controller.run_all(max_concurrent, None).await?,
        Command::Run { container_ids } => {
            controller
                .run(
                    container_ids.into_iter().map(ContainerId).collect(),
                    max_concurrent,
                    None,
                )
                .await?
        }
        Command::Diagnose => {
            controller
                .diagnose(RunTargets::All, max_concurrent, None)
                .await?
        }
        Command::Suspend => controller.suspend().await?,
        Command::Resume => controller.resume().await?,
        Command::Stop => {
            controller.stop().await?;
            return Ok(());
        }
        Command::State => {
            let stats = controller.state().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }
    }

    let stats = controller.state().await?;
    info!(status = ?stats.status, targets = stats.total_targets, "command dispatched");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
