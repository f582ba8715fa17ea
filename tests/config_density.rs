// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Configuration files, density sources, setup errors and plot output

use anyhow::Result;
use approx::assert_relative_eq;
use nalgebra::Point3;
use polyframe_qa::plot::{read_plot, PlotClass};
use polyframe_qa::{analyze, AnalysisConfig, AnalysisFlags, AnomalyKind, Primitive, QaError, Scene};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn slab(x0: f64, x1: f64) -> Primitive {
    Primitive::cuboid(Point3::new(x0, 0.0, 0.0), Point3::new(x1, 1.0, 1.0))
}

fn unit_cube(material: i32) -> Scene {
    let mut scene = Scene::new();
    scene.add_solid("part/cube", material, slab(0.0, 1.0));
    scene
}

#[test]
fn test_config_from_toml_file() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
analyses = "vw"
views = 2
cpus = 3
per_region = true

[grid]
spacing = 0.25
spacing_floor = 0.125

[tolerances]
overlap = 0.05
volume = 0.01

[density]
use_default = true
"#
    )?;

    let config = AnalysisConfig::from_file(file.path())?;
    assert_eq!(config.analyses, AnalysisFlags::VOLUME | AnalysisFlags::MASS);
    assert_eq!(config.views, 2);
    assert_eq!(config.cpus, Some(3));
    assert_eq!(config.grid.spacing, Some(0.25));
    assert_eq!(config.tolerances.volume, Some(0.01));
    assert!(config.density.use_default);
    // untouched sections keep their defaults
    assert!(config.use_air);
    assert_eq!(config.required_hits, 1);

    let (report, _) = analyze(&unit_cube(1), config)?;
    assert_eq!(report.views.len(), 2);
    assert_relative_eq!(report.total.volume.as_ref().unwrap().average, 1.0, epsilon = 1e-9);
    // 1 mm³ at 1 g/cm³
    assert_relative_eq!(report.total.mass.as_ref().unwrap().average, 0.001, epsilon = 1e-12);

    Ok(())
}

#[test]
fn test_density_file_sets_mass() -> Result<()> {
    let mut densities = NamedTempFile::new()?;
    writeln!(densities, "# id  g/cm3  name")?;
    writeln!(densities, "4  7.85  steel")?;
    writeln!(densities, "9  2.70  aluminium")?;

    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::MASS);
    config.grid.spacing = Some(0.25);
    config.grid.spacing_floor = 0.25;
    config.density.file = Some(densities.path().to_path_buf());

    let (report, _) = analyze(&unit_cube(4), config)?;
    let mass = report.total.mass.as_ref().expect("mass estimate");
    println!("Steel cube: {:.6} g", mass.average);

    assert_relative_eq!(mass.average, 0.00785, max_relative = 1e-9);
    assert!(report.log.is_empty());

    Ok(())
}

#[test]
fn test_unreadable_density_file_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::MASS);
    config.density.file = Some(dir.path().join("missing.density"));

    let result = analyze(&unit_cube(1), config);
    assert!(
        matches!(result, Err(QaError::DensitySource { .. })),
        "expected a density source error, got {result:?}"
    );
}

#[test]
fn test_material_without_density_weighs_nothing() -> Result<()> {
    let mut scene = Scene::new();
    scene.add_solid("part/known", 1, slab(0.0, 1.0));
    scene.add_solid("part/unknown", 5, slab(1.0, 2.0));

    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::MASS);
    config.views = 1;
    config.per_region = true;
    config.grid.spacing = Some(0.25);
    config.grid.spacing_floor = 0.25;

    let report = polyframe_qa::ConvergenceController::new(&scene, config)
        .with_density_table(polyframe_qa::DensityTable::parse("1 1.0 water\n"))
        .run()?;

    let unknown = report.region("part/unknown").expect("unknown region");
    assert_eq!(unknown.mass.as_ref().unwrap().average, 0.0);
    assert_relative_eq!(report.total.mass.as_ref().unwrap().average, 0.001, epsilon = 1e-12);

    let entry = report
        .log
        .iter()
        .find(|e| e.message.contains("has no density"))
        .expect("missing density is logged");
    assert!(entry.message.contains("part/unknown"));
    assert_eq!(entry.count, report.views[0].shots);

    Ok(())
}

#[test]
fn test_discarded_air_rejects_air_checks() {
    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::EXPOSED_AIR);
    config.use_air = false;

    let result = analyze(&unit_cube(1), config);
    assert!(matches!(result, Err(QaError::AirDiscarded)));
}

#[test]
fn test_empty_scene_has_no_geometry() {
    let result = analyze(&Scene::new(), AnalysisConfig::with_analyses(AnalysisFlags::VOLUME));
    assert!(matches!(result, Err(QaError::NoGeometry(_))));
}

#[test]
fn test_discarded_air_is_not_counted() -> Result<()> {
    let mut scene = Scene::new();
    scene.add_solid("hull/body", 1, slab(0.0, 1.0));
    scene.add_air("hull/vent", 1, slab(1.0, 2.0));

    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::VOLUME);
    config.views = 1;
    config.per_region = true;
    config.use_air = false;
    config.grid.spacing = Some(0.25);
    config.grid.spacing_floor = 0.25;

    let (report, _) = analyze(&scene, config)?;

    assert_relative_eq!(
        report.total.volume.as_ref().unwrap().per_view[0],
        1.0,
        epsilon = 1e-9
    );
    assert!(report.region("hull/body").is_some());
    assert!(report.region("hull/vent").is_none());
    assert!(report.missed.is_empty());

    Ok(())
}

#[test]
fn test_scene_file_round_trip() -> Result<()> {
    let text = r#"
[[region]]
name = "frame/left"
material_id = 2
shape = { type = "cube", min = [0.0, 0.0, 0.0], max = [1.0, 1.0, 1.0] }

[[region]]
name = "frame/void"
air_code = 1
shape = { type = "cube", min = [1.0, 0.0, 0.0], max = [2.0, 1.0, 1.0] }
"#;
    let scene = Scene::from_toml(text)?;
    let again = Scene::from_toml(&scene.to_toml()?)?;

    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::VOLUME);
    config.views = 1;
    config.grid.spacing = Some(0.25);
    config.grid.spacing_floor = 0.25;

    let (first, _) = analyze(&scene, config.clone())?;
    let (second, _) = analyze(&again, config)?;
    assert_relative_eq!(first.total.volume.as_ref().unwrap().average, 2.0, epsilon = 1e-9);
    assert_eq!(
        first.total.volume.as_ref().unwrap().per_view,
        second.total.volume.as_ref().unwrap().per_view
    );

    Ok(())
}

#[test]
fn test_gap_plot_file() -> Result<()> {
    let dir = TempDir::new()?;
    let prefix = dir.path().join("run_");

    let mut scene = Scene::new();
    scene.add_solid("part/left", 1, slab(0.0, 1.0));
    scene.add_solid("part/right", 1, slab(1.5, 2.5));

    let mut config = AnalysisConfig::with_analyses(AnalysisFlags::GAPS);
    config.views = 1;
    config.grid.spacing = Some(0.25);
    config.grid.spacing_floor = 0.25;
    config.plot_prefix = Some(prefix.clone());

    let (report, events) = analyze(&scene, config)?;
    let gaps_path = PlotClass::Gaps.path(&prefix);
    assert_eq!(report.plot_files, vec![gaps_path.clone()]);

    let segments = read_plot(&gaps_path)?;
    assert_eq!(segments.len(), events.count(AnomalyKind::Gap));
    for segment in &segments {
        assert_eq!(segment.color, PlotClass::Gaps.color());
        assert_relative_eq!(segment.start.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(segment.end.x, 1.5, epsilon = 1e-9);
    }

    Ok(())
}
