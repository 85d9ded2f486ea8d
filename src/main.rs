//! Keyway - bridges automation callers to EKS access entries and pod identity

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use keyway_access::{
    AccessEntryOrchestrator, EksAccessClient, EksClusterConnector, IamRoleClient,
    PodIdentityOrchestrator, RoleProvisioner,
};
use keyway_api::{AgentEvent, RequestRouter};
use keyway_auth::{ClusterMetadataResolver, EksClusterDescriber, StsTokenMinter};
use keyway_common::telemetry::{init_telemetry, TelemetryConfig};
use keyway_common::{ClusterCache, InMemoryClusterCache, KeywayConfig, OsEnvConfig};

/// Keyway - grant cluster and pod-level AWS access from operation events
#[derive(Parser, Debug)]
#[command(name = "keyway", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the invoke endpoint (default mode)
    Serve(ServeArgs),

    /// Handle a single event and print the response envelope
    Invoke(InvokeArgs),
}

/// Serve mode arguments
#[derive(Parser, Debug, Default)]
struct ServeArgs {
    /// Address to listen on (overrides KEYWAY_LISTEN_ADDR)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// AWS region (overrides AWS_REGION)
    #[arg(long)]
    region: Option<String>,

    /// Cluster whose metadata is resolved at startup (overrides KEYWAY_CLUSTER_NAME)
    #[arg(long)]
    prewarm_cluster: Option<String>,
}

/// Invoke mode arguments
#[derive(Parser, Debug)]
struct InvokeArgs {
    /// Path to the event JSON, or `-` for stdin
    #[arg(long, default_value = "-")]
    event: PathBuf,

    /// AWS region (overrides AWS_REGION)
    #[arg(long)]
    region: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's rustls client needs a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    init_telemetry(TelemetryConfig::default())?;

    let cli = Cli::parse();
    let mut config = KeywayConfig::from_env(&OsEnvConfig)?;

    match cli.command.unwrap_or_else(|| Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => {
            if let Some(listen) = args.listen {
                config.listen_addr = listen;
            }
            if args.region.is_some() {
                config.region = args.region;
            }
            if args.prewarm_cluster.is_some() {
                config.prewarm_cluster = args.prewarm_cluster;
            }
            run_server(config).await
        }
        Commands::Invoke(args) => {
            if args.region.is_some() {
                config.region = args.region;
            }
            run_invoke(config, args.event).await
        }
    }
}

async fn run_server(config: KeywayConfig) -> anyhow::Result<()> {
    let (router, connector) = build_router(&config).await?;

    if let Some(cluster) = &config.prewarm_cluster {
        match connector.prewarm(cluster).await {
            Ok(()) => info!(cluster = %cluster, "prewarmed cluster metadata"),
            Err(e) => warn!(cluster = %cluster, error = %e, "failed to prewarm cluster metadata"),
        }
    }

    keyway_api::start_server(config.listen_addr, Arc::new(router)).await?;
    Ok(())
}

async fn run_invoke(config: KeywayConfig, path: PathBuf) -> anyhow::Result<()> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read event from {}", path.display()))?
    };
    let event: AgentEvent = serde_json::from_str(&raw).context("event is not valid JSON")?;

    let (router, _) = build_router(&config).await?;
    let response = router.handle(&event).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn build_router(config: &KeywayConfig) -> anyhow::Result<(RequestRouter, EksClusterConnector)> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let sdk_config = loader.load().await;

    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .context("no AWS region configured; set AWS_REGION or pass --region")?;

    let eks = aws_sdk_eks::Client::new(&sdk_config);
    let iam = aws_sdk_iam::Client::new(&sdk_config);

    let cache: Arc<dyn ClusterCache> = match config.cluster_cache_ttl {
        Some(ttl) => Arc::new(InMemoryClusterCache::with_ttl(ttl)),
        None => Arc::new(InMemoryClusterCache::new()),
    };
    let resolver =
        ClusterMetadataResolver::new(Arc::new(EksClusterDescriber::new(eks.clone())), cache);
    let minter = StsTokenMinter::new(sdk_config.credentials_provider(), region.clone());
    let connector = EksClusterConnector::new(resolver, Arc::new(minter));

    let eks_access = Arc::new(EksAccessClient::new(eks));
    let router = RequestRouter::new(
        Arc::new(connector.clone()),
        AccessEntryOrchestrator::new(eks_access.clone()),
        PodIdentityOrchestrator::new(
            eks_access,
            RoleProvisioner::new(Arc::new(IamRoleClient::new(iam))),
        ),
    );

    info!(region = %region, "keyway initialized");
    Ok((router, connector))
}
