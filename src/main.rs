//! meshscope: deploys an observability stack shaped by the cluster's service mesh

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use meshscope_cluster::{ConnectOptions, HelmInstaller, KubeCluster};
use meshscope_core::{
    ClusterClient, DeployOptions, IdentityInput, MeshState, RollbackOptions, RolloutError,
    RolloutOrchestrator, RolloutReport, StackConfig, Target,
};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// meshscope: mesh-aware observability stack rollout
#[derive(Parser, Debug)]
#[command(name = "meshscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kube context to use instead of the current one
    #[arg(short, long, global = true)]
    context: Option<String>,

    /// Stack configuration file (default: <config_dir>/meshscope/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install or upgrade the observability stack
    Deploy(DeployArgs),
    /// Remove the observability stack
    Rollback(RollbackArgs),
    /// Classify the service mesh and exit
    Detect,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum TargetArg {
    /// kind, minikube, Docker Desktop and similar
    Local,
    /// Cloud-managed cluster
    Managed,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Local => Target::Local,
            TargetArg::Managed => Target::Managed,
        }
    }
}

#[derive(Args, Debug)]
struct DeployArgs {
    #[arg(short, long, value_enum)]
    target: TargetArg,

    /// Metrics chart version (default from the stack config)
    #[arg(long)]
    metrics_version: Option<String>,

    /// Grafana image tag (default from the stack config)
    #[arg(long)]
    grafana_tag: Option<String>,

    /// Identity provider tenant for dashboard sign-in
    #[arg(long, env = "MESHSCOPE_TENANT_ID")]
    tenant_id: Option<String>,

    /// Group whose members become dashboard admins
    #[arg(long, env = "MESHSCOPE_GROUP_ID")]
    group_id: Option<String>,

    /// Publish UIs through an internal load balancer (managed targets)
    #[arg(long)]
    internal_lb: bool,
}

impl DeployArgs {
    fn options(&self) -> DeployOptions {
        DeployOptions {
            target: self.target.into(),
            identity: IdentityInput::new(self.tenant_id.clone(), self.group_id.clone()),
            metrics_version: self.metrics_version.clone(),
            visualization_image_tag: self.grafana_tag.clone(),
            load_balancer: self.internal_lb,
        }
    }
}

#[derive(Args, Debug)]
struct RollbackArgs {
    #[arg(short, long, value_enum)]
    target: TargetArg,

    /// Also delete the observability namespace
    #[arg(long)]
    remove_namespace: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    color_eyre::install()?;
    init_logging(cli.debug, cli.log_file.as_deref())?;

    // Install the ring crypto provider for rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| eyre!("failed to install rustls crypto provider"))?;

    tracing::info!("Starting meshscope");

    let config = match StackConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return Ok(fail(&e)),
    };

    let connect = ConnectOptions {
        kubeconfig: cli.kubeconfig.as_deref(),
        context: cli.context.as_deref(),
    };
    let cluster = match KubeCluster::connect(
        connect,
        &config.field_manager,
        config.timeouts.poll_interval(),
    )
    .await
    {
        Ok(cluster) => cluster,
        Err(e) => return Ok(fail(&e.into())),
    };
    let installer = HelmInstaller::new(config.timeouts.install())
        .with_cluster(cli.kubeconfig.as_deref(), cluster.current_context().as_deref());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping before the next phase");
                cancel.cancel();
            }
        }
    });

    let orchestrator =
        RolloutOrchestrator::new(config, &cluster, &cluster, &installer).with_cancellation(cancel);

    let code = match cli.command {
        Command::Deploy(args) => finish(orchestrator.deploy(&args.options()).await),
        Command::Rollback(args) => finish(
            orchestrator
                .rollback(&RollbackOptions {
                    target: args.target.into(),
                    remove_namespace: args.remove_namespace,
                })
                .await,
        ),
        Command::Detect => match orchestrator.detect().await {
            Ok(state) => {
                print_mesh(&state);
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e),
        },
    };

    tracing::info!("Goodbye!");
    Ok(code)
}

/// Build the log filter: `RUST_LOG` first, then the default level. Debug
/// mode keeps the HTTP and TLS stack at info.
fn build_filter(debug: bool) -> Result<EnvFilter> {
    let filter = if debug {
        EnvFilter::from_default_env()
            .add_directive(Level::DEBUG.into())
            .add_directive("hyper=info".parse()?)
            .add_directive("hyper_util=info".parse()?)
            .add_directive("tower=info".parse()?)
            .add_directive("rustls=info".parse()?)
            .add_directive("kube_client=info".parse()?)
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    Ok(filter)
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let (writer, ansi) = match log_file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(File::create(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(false),
        )
        .with(build_filter(debug)?)
        .init();
    Ok(())
}

fn fail(err: &RolloutError) -> ExitCode {
    eprintln!("error: {err}");
    eprintln!("hint: {}", err.remediation_hint());
    ExitCode::FAILURE
}

fn finish(report: RolloutReport) -> ExitCode {
    println!("{report}");
    match &report.failure {
        Some(err) => fail(err),
        None => ExitCode::SUCCESS,
    }
}

fn print_mesh(state: &MeshState) {
    println!("mesh:      {} {}", state.mode().symbol(), state.mode());
    println!("installed: {}", state.is_installed());
    if state.is_installed() {
        println!("source:    {}", state.source());
        println!("version:   {}", state.version().unwrap_or("unknown"));
        println!("healthy:   {}", state.is_healthy());
        println!("gateway:   {}", state.has_gateway());
    }
    println!("detail:    {}", state.detail());
}
