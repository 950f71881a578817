use crate::config::RendererKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use deployer::ObjectKey;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bundlectl")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy release bundles and reconcile them against a cluster", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: <config dir>/bundlectl/config.toml)
    #[arg(long, global = true, env = "BUNDLECTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// State file holding BundleDeployment objects (overrides config)
    #[arg(long, global = true, env = "BUNDLECTL_STATE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List known release bundles
    Bundles,

    /// Print the content checksum of a release bundle
    Checksum {
        /// Bundle name
        bundle: String,
    },

    /// Render a release bundle with overrides and print the manifests
    Compile(CompileArgs),

    /// Create a BundleDeployment
    Create(CreateArgs),

    /// Change the spec of a BundleDeployment
    Edit(EditArgs),

    /// Request deletion of a BundleDeployment
    Delete {
        /// Object as namespace/name (bare names use "default")
        key: ObjectKey,
    },

    /// Reconcile objects until they settle
    Reconcile(ReconcileArgs),

    /// Show all BundleDeployments
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct CompileArgs {
    /// Bundle name
    pub bundle: String,

    /// Prefix every resource name with "<PREFIX>-"
    #[arg(long)]
    pub name_prefix: Option<String>,

    /// Override the target Deployment's replica count
    #[arg(long)]
    pub replicas: Option<u32>,

    /// Strategic-merge patch file (repeatable, applied in order)
    #[arg(long = "patch", value_name = "FILE")]
    pub patches: Vec<PathBuf>,

    /// Renderer to use (overrides config)
    #[arg(long, value_enum)]
    pub renderer: Option<RendererArg>,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Object as namespace/name (bare names use "default")
    pub key: ObjectKey,

    /// Release bundle to deploy
    #[arg(short, long)]
    pub bundle: String,

    /// Replica count
    #[arg(short, long, default_value = "1")]
    pub replicas: u32,
}

#[derive(Args)]
pub struct EditArgs {
    /// Object as namespace/name (bare names use "default")
    pub key: ObjectKey,

    /// New release bundle
    #[arg(short, long)]
    pub bundle: Option<String>,

    /// New replica count
    #[arg(short, long)]
    pub replicas: Option<u32>,
}

#[derive(Args)]
pub struct ReconcileArgs {
    /// Objects to reconcile (default: all)
    pub keys: Vec<ObjectKey>,

    /// Concurrent reconciles (overrides config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Render and record applies without running kpt; state is not saved
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RendererArg {
    /// kubectl kustomize
    Kustomize,
    /// In-process overlay renderer
    Builtin,
}

impl From<RendererArg> for RendererKind {
    fn from(arg: RendererArg) -> Self {
        match arg {
            RendererArg::Kustomize => Self::Kustomize,
            RendererArg::Builtin => Self::Builtin,
        }
    }
}
