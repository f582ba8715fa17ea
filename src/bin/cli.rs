// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe QA CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use polyframe_qa::analysis::{AnomalyEvent, ConvergenceController};
use polyframe_qa::cli::Reporter;
use polyframe_qa::config::{AnalysisConfig, AnalysisFlags, SingleView};
use polyframe_qa::density::DensityTable;
use polyframe_qa::geometry::Scene;
use polyframe_qa::units::{parse_quantity, ReportUnits, UnitKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polyframe-qa")]
#[command(about = "Ray-sampling mass properties and geometry checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a scene file
    Analyze(AnalyzeArgs),

    /// Parse and print a density table
    Densities {
        /// Density file (`id density name` per line, g/cm³)
        file: PathBuf,
    },

    /// Show version information
    Version,
}

#[derive(clap::Args)]
struct AnalyzeArgs {
    /// Scene file (TOML)
    scene: PathBuf,

    /// Config file; `polyframe-qa.toml` is used when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Analyses as letters: A a b c e f g l m o p s u v w
    #[arg(short = 'A', long)]
    analyses: Option<String>,

    /// Initial grid spacing and optional floor, e.g. "5mm,0.5mm"
    #[arg(short = 'g', long)]
    spacing: Option<String>,

    /// Minimum samples across each model axis
    #[arg(short = 's', long)]
    samples_per_axis: Option<f64>,

    /// Number of views
    #[arg(short = 'n', long)]
    views: Option<usize>,

    /// Single view azimuth in degrees
    #[arg(short = 'a', long)]
    azimuth: Option<f64>,

    /// Single view elevation in degrees
    #[arg(short = 'e', long)]
    elevation: Option<f64>,

    /// Single view width
    #[arg(short = 'G', long)]
    view_size: Option<String>,

    /// Worker threads
    #[arg(short = 'P', long)]
    cpus: Option<usize>,

    /// Overlap tolerance
    #[arg(short = 't', long)]
    overlap_tolerance: Option<String>,

    /// Volume tolerance
    #[arg(long)]
    volume_tolerance: Option<String>,

    /// Mass tolerance
    #[arg(long)]
    mass_tolerance: Option<String>,

    /// Density file
    #[arg(short = 'd', long)]
    densities: Option<PathBuf>,

    /// Use the default density for every region
    #[arg(short = 'D', long)]
    default_density: bool,

    /// Report units as "length,volume,mass"
    #[arg(short = 'u', long)]
    units: Option<String>,

    /// Prefix for plot files
    #[arg(short = 'o', long)]
    plot: Option<PathBuf>,

    /// Seed for random view directions
    #[arg(short = 'S', long)]
    seed: Option<u64>,

    /// Print per-region results
    #[arg(short = 'r', long)]
    per_region: bool,

    /// Do not report regions that were never hit
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Drop air regions from the ray partitions
    #[arg(long)]
    no_air: bool,

    /// Restrict the analysis to these top-level objects
    #[arg(long = "object")]
    objects: Vec<String>,

    /// Write the report as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Show a progress spinner
    #[arg(long)]
    progress: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    match cli.command {
        Commands::Analyze(args) => {
            if let Err(e) = analyze_command(args, cli.verbose, cli.debug) {
                Reporter::report_error(&format!("{e:#}"));
                std::process::exit(1);
            }
        }
        Commands::Densities { file } => {
            let table = DensityTable::load(&file)
                .with_context(|| format!("Failed to load densities from {:?}", file))?;
            Reporter::report_densities(&file.display().to_string(), &table);
        }
        Commands::Version => {
            println!("Polyframe QA v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn analyze_command(args: AnalyzeArgs, verbose: bool, debug: bool) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::load()?,
    };
    apply_overrides(&mut config, &args)?;
    config.verbose |= verbose;
    config.debug |= debug;

    let scene = Scene::load(&args.scene)
        .with_context(|| format!("Failed to load scene {:?}", args.scene))?;

    let mut controller = ConvergenceController::new(&scene, config.clone()).on_all(Arc::new(
        |event: &AnomalyEvent| debug!(kind = %event.kind(), ?event, "anomaly"),
    ));

    if args.progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} views {msg}")
                .context("Invalid progress template")?,
        );
        controller = controller.with_progress(pb);
    }

    let report = controller.run().context("Analysis failed")?;

    Reporter::report_analysis(
        &args.scene.display().to_string(),
        &report,
        &config.units,
        config.verbose,
    );

    if let Some(path) = &args.json {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        Reporter::success(&format!("Report written to {}", path.display()));
    }

    Ok(())
}

fn apply_overrides(config: &mut AnalysisConfig, args: &AnalyzeArgs) -> Result<()> {
    let length = |text: &str| parse_quantity(text, UnitKind::Length);

    if let Some(letters) = &args.analyses {
        config.analyses = AnalysisFlags::from_letters(letters)?;
    }
    if let Some(spacing) = &args.spacing {
        let mut parts = spacing.split(',');
        if let Some(initial) = parts.next().filter(|s| !s.trim().is_empty()) {
            config.grid.spacing = Some(length(initial)?);
        }
        if let Some(floor) = parts.next().filter(|s| !s.trim().is_empty()) {
            config.grid.spacing_floor = length(floor)?;
        }
    }
    if let Some(samples) = args.samples_per_axis {
        config.grid.samples_per_axis = samples;
    }
    if let Some(views) = args.views {
        config.views = views;
    }
    if args.azimuth.is_some() || args.elevation.is_some() || args.view_size.is_some() {
        let mut view = config.single_view.clone().unwrap_or_else(SingleView::default);
        if let Some(az) = args.azimuth {
            view.azimuth = az;
        }
        if let Some(el) = args.elevation {
            view.elevation = el;
        }
        if let Some(size) = &args.view_size {
            view.view_size = Some(length(size)?);
        }
        config.single_view = Some(view);
    }
    if let Some(cpus) = args.cpus {
        config.cpus = Some(cpus);
    }
    if let Some(tol) = &args.overlap_tolerance {
        config.tolerances.overlap = length(tol)?;
    }
    if let Some(tol) = &args.volume_tolerance {
        config.tolerances.volume = Some(parse_quantity(tol, UnitKind::Volume)?);
    }
    if let Some(tol) = &args.mass_tolerance {
        config.tolerances.mass = Some(parse_quantity(tol, UnitKind::Mass)?);
    }
    if let Some(file) = &args.densities {
        config.density.file = Some(file.clone());
    }
    if args.default_density {
        config.density.use_default = true;
    }
    if let Some(units) = &args.units {
        config.units = ReportUnits::parse(units)?;
    }
    if let Some(prefix) = &args.plot {
        config.plot_prefix = Some(prefix.clone());
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if !args.objects.is_empty() {
        config.objects = args.objects.clone();
    }
    config.per_region |= args.per_region;
    config.quiet_missed |= args.quiet;
    if args.no_air {
        config.use_air = false;
    }
    Ok(())
}
