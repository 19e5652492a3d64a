use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Machine image build orchestrator", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the build context a template needs
    Context {
        /// Path to the template (YAML or JSON)
        template: PathBuf,
    },

    /// Compile a template into a build graph and print it
    Compile {
        /// Path to the template (YAML or JSON)
        template: PathBuf,

        /// Write the graph to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render AMI component documents for a template
    Component {
        /// Path to the template (YAML or JSON)
        template: PathBuf,

        /// Directory to write one document per provisioner into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assemble per-architecture images into a multi-arch manifest and push it
    Manifest {
        /// Name to push the manifest under (e.g., "ghcr.io/org/app:1.0")
        name: String,

        /// Per-architecture image (IMAGE_REF=OS/ARCH[/VARIANT]@DIGEST)
        #[arg(short, long)]
        entry: Vec<String>,

        /// Take container builds from a build report and record the manifest in it
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Show a build report
    Report {
        /// Path to the report JSON file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = kiln_core::Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load kiln configuration, using defaults: {}", e);
        kiln_core::Config::default()
    });

    let level = if cli.verbose { tracing::Level::DEBUG } else { settings.tracing_level() };
    if let Err(e) = kiln_core::init_observability_with_level(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Context { template } => {
            commands::context(&template)?;
        }

        Commands::Compile { template, output } => {
            commands::compile(&template, output.as_deref(), &settings)?;
        }

        Commands::Component { template, output } => {
            commands::component(&template, output.as_deref(), &settings)?;
        }

        Commands::Manifest { name, entry, report } => {
            let mut entries = entry
                .iter()
                .map(|e| commands::manifest::parse_entry(e))
                .collect::<Result<Vec<_>>>()?;

            if let Some(report) = &report {
                entries.extend(commands::manifest::entries_from_report(report)?);
            }

            let digest = commands::manifest::push(&name, entries).await?;

            if let Some(report) = &report {
                commands::manifest::record_in_report(report, &name, &digest)?;
            }
        }

        Commands::Report { path } => {
            commands::report(&path)?;
        }
    }

    Ok(())
}
