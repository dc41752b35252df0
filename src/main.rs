/// kubetest2-aks - AKS deployer for cloud-provider-azure end-to-end tests
///
/// Builds the cloud-provider-azure images, provisions an AKS cluster that runs
/// them, hands back a kubeconfig, and tears everything down afterwards.
mod azure;
mod build;
mod config;
mod deployer;
mod template;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::azure::{AzureCloud, CredentialKind};
use crate::build::BuildRequest;
use crate::config::Settings;
use crate::deployer::UpOptions;
use crate::utils::command::{check_tool_installed, ShellRunner};

#[derive(Parser)]
#[command(name = "kubetest2-aks")]
#[command(
    about = "Deploy AKS clusters running custom cloud-provider-azure images",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional YAML settings file; environment variables fill anything it leaves unset
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and push component images
    Build {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Provision an AKS cluster and fetch its kubeconfig
    Up(UpArgs),

    /// Delete the resource group holding the cluster
    Down,

    /// Print the kubeconfig path a test run should use
    Kubeconfig {
        /// Explicit kubeconfig path
        #[arg(long)]
        kubeconfig: Option<PathBuf>,
    },

    /// Print the deployer version
    Version,

    /// Generate an example settings file
    Init {
        /// Where to write the settings file
        #[arg(long, default_value = "kubetest2-aks.yaml")]
        output: PathBuf,
    },
}

#[derive(Args, Clone, Default)]
struct BuildArgs {
    /// Component to build (cloud-provider-azure, azure-file, azure-disk)
    #[arg(long)]
    target: Option<String>,

    /// Local source tree of the component
    #[arg(long, alias = "targetPath", conflicts_with = "target_tag")]
    target_path: Option<PathBuf>,

    /// Git tag of the component to clone and build
    #[arg(long, alias = "targetTag")]
    target_tag: Option<String>,
}

#[derive(Args)]
struct UpArgs {
    /// Name of the AKS cluster
    #[arg(long, alias = "clusterName")]
    cluster_name: String,

    /// Location of the resource group and cluster
    #[arg(long)]
    location: Option<String>,

    /// Cluster template file
    #[arg(long)]
    config: PathBuf,

    /// Custom configuration template file
    #[arg(long, alias = "customConfig")]
    custom_config: PathBuf,

    /// Tag of already pushed images, used when nothing is built
    #[arg(long, alias = "ccmImageTag")]
    ccm_image_tag: Option<String>,

    /// Kubernetes version substituted into the cluster template
    #[arg(long, alias = "kubernetesVersion")]
    kubernetes_version: Option<String>,

    /// Which cluster credential to fetch
    #[arg(long, value_enum, default_value = "admin")]
    credential_kind: CredentialKind,

    #[command(flatten)]
    build: BuildArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kubetest2_aks={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match &cli.command {
        Commands::Build { build } => build_images(&cli, build).await,
        Commands::Up(args) => up(&cli, args).await,
        Commands::Down => down(&cli).await,
        Commands::Kubeconfig { kubeconfig } => print_kubeconfig(kubeconfig.as_deref()),
        Commands::Version => {
            println!("kubetest2-aks {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Init { output } => init_settings(output).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    Settings::load(cli.settings.as_deref()).context("Failed to load settings")
}

/// Turn build flags into a request; `None` when no target was given
fn build_request(args: &BuildArgs, settings: &Settings) -> Result<Option<BuildRequest>> {
    let Some(target) = &args.target else {
        if args.target_path.is_some() || args.target_tag.is_some() {
            anyhow::bail!("--target-path and --target-tag require --target");
        }
        return Ok(None);
    };

    let path = match (&args.target_path, &args.target_tag) {
        (None, None) => {
            let fallback = settings.cloud_provider_azure_path.clone();
            if let Some(path) = &fallback {
                warn!(
                    "Neither --target-path nor --target-tag given; building from {} ({})",
                    path.display(),
                    config::ENV_CLOUD_PROVIDER_AZURE_PATH
                );
            }
            fallback
        }
        (path, _) => path.clone(),
    };
    let request = BuildRequest::new(target, path, args.target_tag.clone())?;
    Ok(Some(request))
}

async fn check_build_tools() -> Result<()> {
    check_tool_installed("git", &["--version"], "https://git-scm.com/downloads")
        .await
        .context("git is required")?;
    check_tool_installed("make", &["--version"], "https://www.gnu.org/software/make/")
        .await
        .context("make is required")?;
    Ok(())
}

async fn build_images(cli: &Cli, args: &BuildArgs) -> Result<()> {
    let settings = load_settings(cli)?;
    let request = build_request(args, &settings)?.context("--target is required")?;

    check_build_tools().await?;

    let tag = deployer::build(&ShellRunner, &settings, &request).await?;
    info!("Images built and pushed with tag {}", tag);
    println!("{}", tag);
    Ok(())
}

async fn up(cli: &Cli, args: &UpArgs) -> Result<()> {
    let settings = load_settings(cli)?;
    let build = build_request(&args.build, &settings)?;
    if build.is_some() {
        check_build_tools().await?;
    }

    let options = UpOptions {
        cluster_name: args.cluster_name.clone(),
        location: args.location.clone(),
        config_path: args.config.clone(),
        custom_config_path: args.custom_config.clone(),
        ccm_image_tag: args.ccm_image_tag.clone().filter(|t| !t.is_empty()),
        kubernetes_version: args.kubernetes_version.clone(),
        credential_kind: args.credential_kind,
        build,
    };

    let cloud = AzureCloud::new(&settings)?;
    let kubeconfig = deployer::up(&cloud, &ShellRunner, &settings, &options).await?;

    info!("Cluster {} is ready", options.cluster_name);
    println!("{}", kubeconfig.display());
    Ok(())
}

async fn down(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let cloud = AzureCloud::new(&settings)?;
    deployer::down(&cloud, &settings).await
}

fn print_kubeconfig(flag: Option<&Path>) -> Result<()> {
    let path = deployer::kubeconfig_location(
        flag,
        std::env::var("KUBECONFIG").ok().filter(|v| !v.is_empty()),
        std::env::var("HOME").ok(),
    )?;
    println!("{}", path.display());
    Ok(())
}

async fn init_settings(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists; refusing to overwrite", output.display());
    }

    let yaml = serde_yaml::to_string(&Settings::example())
        .context("Failed to serialize example settings")?;
    tokio::fs::write(output, yaml)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Example settings written to {}", output.display());
    info!("Set AZURE_CLIENT_SECRET in the environment rather than in the file");
    Ok(())
}
