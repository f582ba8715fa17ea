// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! CLI output reporter with colored formatting

use crate::analysis::{AnalysisReport, Estimate, TargetReport};
use crate::density::DensityTable;
use crate::units::{ReportUnits, UnitKind};
use colored::*;
use std::time::Duration;

/// CLI reporter for formatted output
pub struct Reporter;

impl Reporter {
    /// Print an analysis report in the chosen units
    pub fn report_analysis(file: &str, report: &AnalysisReport, units: &ReportUnits, verbose: bool) {
        println!("\n{}", "━".repeat(80).bright_black());
        println!("{} {}", "Model:".bold(), file.cyan());
        println!("{}", "━".repeat(80).bright_black());

        if report.aborted {
            println!("{} {}", "❌".red(), "Analysis aborted, results are partial".red().bold());
        } else if report.converged {
            println!("{} {}", "✅".green(), "Estimates converged".green().bold());
        } else {
            println!(
                "{} {}",
                "⚠️".yellow(),
                "Spacing floor reached before the views agreed".yellow().bold()
            );
        }
        println!(
            "  {} {} | {} {} | {} {}",
            "Rounds:".bright_black(),
            report.rounds.to_string().cyan(),
            "Spacing:".bright_black(),
            Self::length(units, report.final_spacing).cyan(),
            "Time:".bright_black(),
            Self::format_duration(Duration::from_millis(report.elapsed_ms)).yellow()
        );
        if let Some(seed) = report.seed {
            println!("  {} {}", "Seed:".bright_black(), seed);
        }

        if let Some(bbox) = &report.bounding_box {
            println!("\n{}", "Bounding box:".bold());
            println!(
                "  {} ({}, {}, {})",
                "min".bright_black(),
                Self::length(units, bbox.bbox.min.x),
                Self::length(units, bbox.bbox.min.y),
                Self::length(units, bbox.bbox.min.z)
            );
            println!(
                "  {} ({}, {}, {})",
                "max".bright_black(),
                Self::length(units, bbox.bbox.max.x),
                Self::length(units, bbox.bbox.max.y),
                Self::length(units, bbox.bbox.max.z)
            );
            let [x, y, z] = bbox.axis_areas;
            println!(
                "  {} x {:.4}  y {:.4}  z {:.4}",
                "cross-section areas".bright_black(),
                x,
                y,
                z
            );
        }

        for object in &report.objects {
            Self::print_target(object, units, verbose);
        }
        if report.objects.len() > 1 {
            Self::print_target(&report.total, units, verbose);
        }

        if !report.regions.is_empty() {
            println!("\n{}", "Regions:".bold());
            for region in &report.regions {
                let mut line = format!("  {:<32} hits {:>8}", region.name, region.hits);
                if let Some(v) = &region.volume {
                    line.push_str(&format!("  volume {}", Self::estimate(units, UnitKind::Volume, v)));
                }
                if let Some(m) = &region.mass {
                    line.push_str(&format!("  mass {}", Self::estimate(units, UnitKind::Mass, m)));
                }
                println!("{line}");
            }
        }

        for anomaly in report.anomalies.iter().filter(|a| !a.entries.is_empty()) {
            println!("\n{} {}", "List".bold(), anomaly.kind.to_string().yellow().bold());
            for entry in &anomaly.entries {
                let [x, y, z] = entry.location;
                println!(
                    "  {} {} count:{} dist:{} @ ({:.4} {:.4} {:.4})",
                    entry.first.cyan(),
                    entry.second.as_deref().unwrap_or("").cyan(),
                    entry.count,
                    Self::length(units, entry.max_distance),
                    x,
                    y,
                    z
                );
            }
        }

        for missed in &report.missed {
            if missed.hits == 0 {
                Self::report_warning(&format!("{} was not hit", missed.name));
            } else {
                Self::report_warning(&format!("{} hit only {} times", missed.name, missed.hits));
            }
        }

        if verbose {
            for entry in &report.log {
                Self::report_info(&format!("{} (x{})", entry.message, entry.count));
            }
            for path in &report.plot_files {
                Self::report_info(&format!("plot written to {}", path.display()));
            }
        }

        println!("{}", "━".repeat(80).bright_black());
    }

    fn print_target(target: &TargetReport, units: &ReportUnits, verbose: bool) {
        println!("\n{} {}", "Object:".bold(), target.name.cyan());
        if let Some(volume) = &target.volume {
            Self::print_estimate("Volume", &Self::estimate(units, UnitKind::Volume, volume));
        }
        if let Some(mass) = &target.mass {
            Self::print_estimate("Mass", &Self::estimate(units, UnitKind::Mass, mass));
        }
        if let Some(area) = &target.surface_area {
            let scale = units.resolve(UnitKind::Length).factor.powi(2);
            let unit = units.resolve(UnitKind::Length).name;
            Self::print_estimate(
                "Surface area",
                &format!("{:.6} {unit}² ±{:.6}", area.average / scale, area.spread() / scale),
            );
        }
        if let Some([x, y, z]) = target.centroid {
            Self::print_estimate(
                "Centroid",
                &format!(
                    "({}, {}, {})",
                    Self::length(units, x),
                    Self::length(units, y),
                    Self::length(units, z)
                ),
            );
        }
        if let Some(rows) = target.inertia {
            let scale = units.resolve(UnitKind::Mass).factor
                * units.resolve(UnitKind::Length).factor.powi(2);
            println!("  {}", "Inertia tensor about the centroid:".bright_black());
            for row in rows {
                println!(
                    "    {:>14.6} {:>14.6} {:>14.6}",
                    row[0] / scale,
                    row[1] / scale,
                    row[2] / scale
                );
            }
        }
        if verbose {
            for (label, estimate) in [("volume", &target.volume), ("mass", &target.mass)] {
                if let Some(e) = estimate {
                    let views: Vec<String> = e.per_view.iter().map(|v| format!("{v:.6}")).collect();
                    println!("  {} {}", format!("per-view {label}:").bright_black(), views.join(" "));
                }
            }
        }
    }

    /// `average unit  +max-avg -avg-min`
    fn estimate(units: &ReportUnits, kind: UnitKind, estimate: &Estimate) -> String {
        let unit = units.resolve(kind).name;
        let scale = |v: f64| units.scale(kind, v);
        format!(
            "{:.6} {unit}  +{:.6} -{:.6}",
            scale(estimate.average),
            scale(estimate.max - estimate.average),
            scale(estimate.average - estimate.min)
        )
    }

    fn length(units: &ReportUnits, value: f64) -> String {
        format!(
            "{:.4} {}",
            units.scale(UnitKind::Length, value),
            units.resolve(UnitKind::Length).name
        )
    }

    fn print_estimate(name: &str, value: &str) {
        println!("  {} {}", format!("{}:", name).bright_black(), value.green());
    }

    /// Print a density table
    pub fn report_densities(file: &str, table: &DensityTable) {
        println!("\n{}", "━".repeat(80).bright_black());
        println!("{} {}", "Densities:".bold(), file.cyan());
        println!("{}", "━".repeat(80).bright_black());
        for (id, entry) in table.iter() {
            println!(
                "  {:>6}  {:>12.6} g/cm³  {}",
                id.to_string().cyan(),
                entry.density * 1000.0,
                entry.name
            );
        }
        println!("{}", "━".repeat(80).bright_black());
    }

    /// Report error
    pub fn report_error(message: &str) {
        eprintln!("\n{} {}", "❌ Error:".red().bold(), message);
    }

    /// Report warning
    pub fn report_warning(message: &str) {
        println!("{} {}", "⚠️  Warning:".yellow().bold(), message);
    }

    /// Report info
    pub fn report_info(message: &str) {
        println!("{} {}", "ℹ️".bright_blue(), message);
    }

    /// Format duration for display
    fn format_duration(duration: Duration) -> String {
        let micros = duration.as_micros();

        if micros < 1_000 {
            format!("{}µs", micros)
        } else if micros < 1_000_000 {
            format!("{:.2}ms", micros as f64 / 1_000.0)
        } else {
            format!("{:.2}s", micros as f64 / 1_000_000.0)
        }
    }

    /// Print success message
    pub fn success(message: &str) {
        println!("{} {}", "✅".green(), message.green());
    }
}
