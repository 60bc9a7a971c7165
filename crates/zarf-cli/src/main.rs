//! zarf - the airgap Kubernetes package manager

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod exit_codes;

#[derive(Parser)]
#[command(name = "zarf")]
#[command(version)]
#[command(about = "Build and deploy self-contained Kubernetes packages across airgaps", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Package operations
    #[command(subcommand)]
    Package(PackageCommands),

    /// Tunnel to a named in-cluster service
    Connect {
        /// A connect target published by a package (REGISTRY, GIT, or a
        /// custom name); omit to use the flags directly
        target: Option<String>,

        /// Resource name to forward to
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long, default_value = zarf_kube::ZARF_NAMESPACE)]
        namespace: String,

        /// Resource type: svc or pod
        #[arg(long = "type", default_value = "svc")]
        resource_type: String,

        #[arg(long, default_value_t = 0)]
        local_port: u16,

        #[arg(long, default_value_t = 0)]
        remote_port: u16,

        /// Print the URL without launching a browser
        #[arg(long)]
        cli_only: bool,

        /// List the connect targets published in the cluster
        #[arg(long)]
        list: bool,
    },

    /// Developer utilities
    #[command(subcommand)]
    Dev(DevCommands),
}

#[derive(Subcommand)]
enum PackageCommands {
    /// Build a package archive from a manifest directory
    Create {
        /// Directory containing zarf.yaml
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Build-time variant to select among flavored components
        #[arg(long)]
        flavor: Option<String>,

        /// Skip confirmation prompts
        #[arg(long)]
        confirm: bool,

        /// Package variable overrides (KEY=VALUE)
        #[arg(long = "set")]
        set: Vec<String>,

        /// Output directory for the archive
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Target cluster architecture (amd64 or arm64)
        #[arg(short, long)]
        architecture: Option<String>,

        /// minisign secret key to sign the package with
        #[arg(long)]
        signing_key: Option<PathBuf>,

        /// Build a skeleton (manifest-only) package
        #[arg(long)]
        skeleton: bool,
    },

    /// Deploy a package archive into the connected cluster
    Deploy {
        package: PathBuf,

        /// Components to include (comma separated; prefix with - to exclude)
        #[arg(long, default_value = "")]
        components: String,

        #[arg(long)]
        confirm: bool,

        #[arg(long = "set")]
        set: Vec<String>,

        /// Override the registry address recorded in cluster state
        #[arg(long)]
        registry_url: Option<String>,

        /// Downgrade signature problems to warnings
        #[arg(long)]
        insecure: bool,

        /// minisign public key for signed packages
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Per-component wait budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show a package's manifest and provenance
    Inspect {
        package: PathBuf,

        /// minisign public key to verify the signature with
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Push a package's images and repos to external endpoints
    #[command(name = "mirror-resources")]
    Mirror {
        package: PathBuf,

        #[arg(long)]
        registry_url: Option<String>,

        #[arg(long)]
        git_url: Option<String>,

        #[arg(long)]
        insecure: bool,

        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Remove a deployed package
    Remove {
        /// Deployed package name or archive path
        target: String,

        #[arg(long, default_value = "")]
        components: String,

        #[arg(long)]
        confirm: bool,

        #[arg(long = "set")]
        set: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DevCommands {
    /// Migrate a manifest to the current schema in place
    UpdateSchema {
        /// Directory containing zarf.yaml
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = cli
        .log_level
        .as_deref()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Package(package) => match package {
            PackageCommands::Create {
                dir,
                flavor,
                confirm,
                set,
                output,
                architecture,
                signing_key,
                skeleton,
            } => {
                commands::create::run(
                    &dir,
                    flavor,
                    confirm,
                    &set,
                    &output,
                    architecture,
                    signing_key,
                    skeleton,
                )
                .await
            }
            PackageCommands::Deploy {
                package,
                components,
                confirm,
                set,
                registry_url,
                insecure,
                key,
                timeout,
            } => {
                commands::deploy::run(
                    &package,
                    &components,
                    confirm,
                    &set,
                    registry_url,
                    insecure,
                    key,
                    timeout,
                )
                .await
            }
            PackageCommands::Inspect { package, key } => {
                commands::inspect::run(&package, key).await
            }
            PackageCommands::Mirror {
                package,
                registry_url,
                git_url,
                insecure,
                key,
            } => commands::mirror::run(&package, registry_url, git_url, insecure, key).await,
            PackageCommands::Remove {
                target,
                components,
                confirm,
                set,
            } => commands::remove::run(&target, &components, confirm, &set).await,
        },
        Commands::Connect {
            target,
            name,
            namespace,
            resource_type,
            local_port,
            remote_port,
            cli_only,
            list,
        } => {
            commands::connect::run(
                target,
                &name,
                &namespace,
                &resource_type,
                local_port,
                remote_port,
                cli_only,
                list,
            )
            .await
        }
        Commands::Dev(dev) => match dev {
            DevCommands::UpdateSchema { dir } => commands::dev::update_schema(&dir),
        },
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
