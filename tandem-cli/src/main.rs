//! `tandem`: relay server, headless participant and sandbox provisioning.
//!
//! Logging goes through `env_logger`; set `RUST_LOG` to change the level
//! (defaults to `info`).

mod session;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::info;

use tandem_collab::{ServerConfig, SyncServer};
use tandem_sandbox::{
    BootReport, BootstrapManifest, Fetcher, FileFetcher, FsSandbox, HttpFetcher, Provisioner,
    SandboxWorker, Status, StepStatus, WorkerConfig, WorkerInput,
};

#[derive(Parser)]
#[command(name = "tandem", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
    /// Join a room as a headless editor reading lines from stdin
    Join {
        #[arg(long, default_value = "ws://127.0.0.1:8000")]
        url: String,
        #[arg(long, default_value = "ws")]
        room: String,
        /// Display name announced to other peers
        #[arg(long)]
        name: Option<String>,
        /// Exchange cursor presence with other peers
        #[arg(long)]
        presence: bool,
        /// Provision a sandbox at this root, then start a sandboxed
        /// participant in the same room
        #[arg(long, value_name = "ROOT")]
        sandbox: Option<PathBuf>,
        #[command(flatten)]
        source: ProvisionArgs,
    },
    /// Provision a filesystem sandbox and start a local worker in it
    Bootstrap {
        /// Sandbox root directory
        #[arg(long)]
        root: PathBuf,
        #[command(flatten)]
        source: ProvisionArgs,
    },
}

#[derive(Args)]
struct ProvisionArgs {
    /// Origin serving the wheel and worker script
    #[arg(long, conflicts_with = "from")]
    base_url: Option<String>,
    /// Local directory to provision from instead of an HTTP origin
    #[arg(long)]
    from: Option<PathBuf>,
    /// JSON manifest to run instead of the default
    #[arg(long)]
    manifest: Option<PathBuf>,
}

impl ProvisionArgs {
    async fn provisioner(
        self,
        root: &Path,
    ) -> Result<(Provisioner, BootstrapManifest, Arc<FsSandbox>), Box<dyn Error>> {
        let manifest = match self.manifest {
            Some(path) => BootstrapManifest::from_json(&tokio::fs::read_to_string(&path).await?)?,
            None => BootstrapManifest::pyodide_default(),
        };
        let fetcher: Arc<dyn Fetcher> = match (self.base_url, self.from) {
            (_, Some(dir)) => Arc::new(FileFetcher::new(dir)),
            (Some(url), None) => Arc::new(HttpFetcher::new(url)),
            (None, None) => return Err("either --base-url or --from is required".into()),
        };
        let sandbox = Arc::new(FsSandbox::pyodide(root));
        Ok((Provisioner::new(fetcher, sandbox.clone()), manifest, sandbox))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind } => serve(bind).await,
        Commands::Join {
            url,
            room,
            name,
            presence,
            sandbox,
            source,
        } => {
            let sandbox = match sandbox {
                Some(root) => {
                    let (provisioner, manifest, _) = source.provisioner(&root).await?;
                    Some(session::SandboxLaunch {
                        provisioner,
                        manifest,
                    })
                }
                None => None,
            };
            session::run(session::JoinOptions {
                url,
                room,
                name,
                presence,
                sandbox,
            })
            .await
        }
        Commands::Bootstrap { root, source } => bootstrap(root, source).await,
    }
}

async fn serve(bind: Option<String>) -> Result<(), Box<dyn Error>> {
    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind_addr: bind.unwrap_or(defaults.bind_addr.clone()),
        ..defaults
    };
    info!("Starting relay on {}", config.bind_addr);
    SyncServer::new(config).run().await
}

async fn bootstrap(root: PathBuf, source: ProvisionArgs) -> Result<(), Box<dyn Error>> {
    let (provisioner, manifest, sandbox) = source.provisioner(&root).await?;
    let outcome = SandboxWorker::bootstrap(provisioner, manifest, WorkerConfig::default()).await;
    print_report(match &outcome {
        Ok((_, report)) => Some(report),
        Err(e) => e.report(),
    });

    let (mut worker, report) = outcome?;
    println!(
        "sandbox at {} provisioned in {:?}; imported: {}",
        root.display(),
        report.elapsed(),
        sandbox.imported().join(", ")
    );
    match tokio::time::timeout(Duration::from_secs(5), worker.wait_for_status()).await {
        Ok(Some(Status::Ready)) => println!("worker ready"),
        _ => return Err("sandbox worker did not become ready".into()),
    }
    worker.post(WorkerInput::Shutdown);
    Ok(())
}

fn print_report(report: Option<&BootReport>) {
    for step in report.map(|r| r.steps.as_slice()).unwrap_or_default() {
        let status = match &step.status {
            StepStatus::Completed => format!("ok ({:?})", step.elapsed),
            StepStatus::Failed(reason) => format!("FAILED: {reason}"),
            StepStatus::Skipped => "skipped".to_string(),
        };
        println!("{:<16} {status}", step.id.as_str());
    }
}
