//! 古建生成器命令行入口
//!
//! 读取参数模板与构建配置，运行分阶段构建并打印装配树摘要。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gujian_core::assembly::{AssemblyTree, NodeKind};
use gujian_core::builder::{AssemblyBuilder, BuildReport};
use gujian_core::combo::ComboRoot;
use gujian_core::config::BuildConfig;
use gujian_core::orchestrator::{BuildOrchestrator, BuildOutcome};
use gujian_core::params::{schema, ParameterSet, RoofStyle};
use gujian_core::progress::{watch_progress_file, WatchOutcome};
use gujian_core::resolver::ConstraintResolver;
use gujian_file::{Template, TemplateLibrary};

#[derive(Parser)]
#[command(name = "gujian")]
#[command(about = "Parametric generator for traditional Chinese timber-frame buildings", long_about = None)]
struct Cli {
    /// Build configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a template and print the assembly summary
    Build {
        /// Template file (.json or .gjt)
        template: PathBuf,
        /// Write progress to this file while building
        #[arg(long)]
        progress_file: Option<PathBuf>,
        /// Build as a double-eave combo
        #[arg(long, conflicts_with = "floors")]
        double_eave: bool,
        /// Build as a multi-floor combo
        #[arg(long)]
        floors: Option<u32>,
    },
    /// Create a template with default parameters
    New {
        /// Template name
        name: String,
        /// Output file (.json or .gjt)
        output: PathBuf,
        /// Roof style (e.g. hip, hipgable, gable, 歇山)
        #[arg(short, long)]
        style: Option<String>,
        /// Rooms along the width
        #[arg(long)]
        x_rooms: Option<u32>,
        /// Rooms along the depth
        #[arg(long)]
        y_rooms: Option<u32>,
    },
    /// Show a template and its resolved dimensions
    Info {
        /// Template file (.json or .gjt)
        template: PathBuf,
    },
    /// List the templates in a directory
    List {
        /// Template directory
        dir: PathBuf,
    },
    /// Print the parameter schema
    Schema,
    /// Follow a progress file until the build ends
    Watch {
        /// Progress file written by `build --progress-file`
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Build {
            template,
            progress_file,
            double_eave,
            floors,
        } => {
            let template = Template::load(&template)?;
            info!("Building template {}", template.name());
            let mut orchestrator = BuildOrchestrator::new(AssemblyBuilder::new(config));
            if let Some(path) = progress_file {
                orchestrator = orchestrator.with_progress_file(path);
            }

            let combo = if double_eave {
                Some(ComboRoot::double_eave(template.name(), &template.params)?)
            } else if let Some(floors) = floors {
                Some(ComboRoot::stacked(template.name(), &template.params, floors)?)
            } else {
                None
            };

            match combo {
                Some(combo) => build_combo(&orchestrator, &combo).await?,
                None => build_single(&orchestrator, template.name(), template.params.clone()).await?,
            }
        }
        Commands::New {
            name,
            output,
            style,
            x_rooms,
            y_rooms,
        } => {
            let mut params = ParameterSet::default();
            if let Some(style) = style {
                params.roof_style = RoofStyle::parse(&style)
                    .with_context(|| format!("Unknown roof style: {}", style))?;
            }
            params.x_rooms = x_rooms.unwrap_or(params.x_rooms);
            params.y_rooms = y_rooms.unwrap_or(params.y_rooms);
            ConstraintResolver::new().resolve(&params)?;

            Template::new(name, params).save(&output)?;
            println!("Saved template to {}", output.display());
        }
        Commands::Info { template } => {
            let template = Template::load(&template)?;
            let resolved = ConstraintResolver::new().resolve(&template.params)?;
            println!("{} ({})", template.name(), template.metadata.id);
            println!("  roof style : {}", resolved.roof_style.label());
            println!("  dk         : {:.4} m", resolved.dk);
            println!("  size       : {:.3} x {:.3} m", resolved.total_width, resolved.total_depth);
            println!("  rafter     : {} steps of {:.3} m", resolved.rafter_steps, resolved.rafter_span);
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Commands::List { dir } => {
            let library = TemplateLibrary::open(dir)?;
            for name in library.list()? {
                match library.load(&name) {
                    Ok(template) => println!("{:<24} {}", name, template.params.roof_style.label()),
                    Err(e) => println!("{:<24} <{}>", name, e),
                }
            }
        }
        Commands::Schema => {
            for field in schema() {
                println!("{:<16} [{}, {}]  {}", field.name, field.min, field.max, field.description);
            }
        }
        Commands::Watch { file } => match watch_progress_file(&file, &config).await? {
            WatchOutcome::Succeeded(message) => {
                println!("Build succeeded{}", message.map(|m| format!(": {}", m)).unwrap_or_default());
            }
            WatchOutcome::Cancelled => println!("Build cancelled"),
            WatchOutcome::Failed(message) => anyhow::bail!("Build failed: {}", message),
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BuildConfig> {
    let Some(path) = path else {
        return Ok(BuildConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = BuildConfig::from_json_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    info!("Loaded build config from {}", path.display());
    Ok(config)
}

async fn build_single(orchestrator: &BuildOrchestrator, name: &str, params: ParameterSet) -> Result<()> {
    let handle = orchestrator.submit(name, params).await?;
    match handle.wait().await? {
        BuildOutcome::Completed(report) => {
            let tree = orchestrator
                .snapshot(name)
                .await
                .context("Building disappeared after build")?;
            print_summary(name, &report, &tree);
        }
        BuildOutcome::Cancelled => println!("{}: build cancelled", name),
    }
    Ok(())
}

async fn build_combo(orchestrator: &BuildOrchestrator, combo: &ComboRoot) -> Result<()> {
    let handles = combo.submit(orchestrator).await?;
    for (member, handle) in combo.members().iter().zip(handles) {
        match handle.wait().await? {
            BuildOutcome::Completed(report) => {
                if let Some(tree) = orchestrator.snapshot(&member.building).await {
                    print_summary(&member.building, &report, &tree);
                    println!("  offset     : {:.3} m up", member.offset.z);
                }
            }
            BuildOutcome::Cancelled => println!("{}: build cancelled", member.building),
        }
    }
    println!("{}: {} solids in total", combo.name, combo.world_solids(orchestrator).await.len());
    Ok(())
}

fn print_summary(name: &str, report: &BuildReport, tree: &AssemblyTree) {
    let mut counts: BTreeMap<NodeKind, usize> = BTreeMap::new();
    for id in tree.descendants(tree.root()) {
        if let Some(node) = tree.get(id) {
            *counts.entry(node.kind).or_default() += node.instance_count();
        }
    }

    println!("{}: {} nodes in {:?}", name, report.node_count, report.elapsed);
    let stages: Vec<&str> = report.stages_built.iter().map(|s| s.label()).collect();
    println!("  stages     : {}", stages.join(" → "));
    for (kind, count) in counts {
        println!("  {:<16} {}", format!("{:?}", kind), count);
    }
}
