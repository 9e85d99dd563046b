use clap::{Args, Parser, Subcommand, ValueEnum};
use devfeat_core::build::BackendMode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Resolves, fetches, and builds devcontainer features into a container image"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a workspace's devcontainer.json and build the image it declares
    Build(BuildArgs),
    /// Feature-authoring utilities
    Features {
        #[command(subcommand)]
        command: FeaturesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum FeaturesCommand {
    /// Generate a throwaway devcontainer project pinning a fixed feature list and build it
    Test(FeaturesTestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Workspace folder containing (or whose .devcontainer holds) devcontainer.json
    #[arg(long)]
    pub workspace_folder: PathBuf,

    /// Explicit path to a devcontainer.json/.devcontainer.json, overriding discovery
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tag to apply to the built image; may be given more than once
    #[arg(long = "image-name")]
    pub image_name: Vec<String>,

    #[arg(long, value_enum, default_value_t = BackendArg::Advanced)]
    pub backend: BackendArg,

    #[arg(long)]
    pub no_cache: bool,

    #[arg(long = "cache-from")]
    pub cache_from: Vec<String>,

    #[arg(long = "cache-to")]
    pub cache_to: Option<String>,

    #[arg(long)]
    pub builder: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct FeaturesTestArgs {
    /// Base image the generated test project builds from
    #[arg(long = "base-image")]
    pub base_image: String,

    /// Feature collection path prefix, e.g. "octocat/myfeatures"
    #[arg(long)]
    pub collection: String,

    /// Comma-separated feature ids to pin at "latest"
    #[arg(long)]
    pub features: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    Advanced,
    Legacy,
}

impl From<BackendArg> for BackendMode {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Advanced => BackendMode::Advanced,
            BackendArg::Legacy => BackendMode::Legacy,
        }
    }
}
