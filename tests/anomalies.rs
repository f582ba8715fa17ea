// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Gap and air anomaly detection along known ray sequences

use anyhow::Result;
use approx::assert_relative_eq;
use nalgebra::Point3;
use polyframe_qa::{
    analyze, AnalysisConfig, AnalysisFlags, AnomalyEvent, AnomalyKind, ConvergenceController,
    Primitive, QaError, Scene,
};

/// Unit-section slab between `x0` and `x1`
fn slab(x0: f64, x1: f64) -> Primitive {
    Primitive::cuboid(Point3::new(x0, 0.0, 0.0), Point3::new(x1, 1.0, 1.0))
}

/// Rays along +x only, nine per round at the first spacing
fn along_x(flags: AnalysisFlags) -> AnalysisConfig {
    let mut config = AnalysisConfig::with_analyses(flags);
    config.views = 1;
    config.grid.spacing = Some(0.25);
    config.grid.spacing_floor = 0.125;
    config.cpus = Some(2);
    config
}

fn two_blocks(gap: f64) -> Scene {
    let mut scene = Scene::new();
    scene.add_solid("part/left", 1, slab(0.0, 1.0));
    scene.add_solid("part/right", 1, slab(1.0 + gap, 2.0 + gap));
    scene
}

#[test]
fn test_gap_above_tolerance_is_reported_once_per_ray() -> Result<()> {
    let mut config = along_x(AnalysisFlags::GAPS);
    config.tolerances.overlap = 0.1;

    let (report, events) = analyze(&two_blocks(0.2), config)?;
    let shots = report.views[0].shots;

    assert_eq!(report.rounds, 1);
    assert_eq!(shots, 9);
    assert_eq!(events.count(AnomalyKind::Gap), shots as usize);

    let gaps = report.anomalies(AnomalyKind::Gap);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].first, "part/left");
    assert_eq!(gaps[0].second.as_deref(), Some("part/right"));
    assert_eq!(gaps[0].count, shots);
    assert_relative_eq!(gaps[0].max_distance, 0.2, epsilon = 1e-9);

    for event in events.events() {
        let AnomalyEvent::Gap { start, end, .. } = event else {
            panic!("unexpected event {event:?}");
        };
        assert_relative_eq!(start.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(end.x, 1.2, epsilon = 1e-9);
    }

    Ok(())
}

#[test]
fn test_gap_below_tolerance_is_ignored() -> Result<()> {
    let mut config = along_x(AnalysisFlags::GAPS);
    config.tolerances.overlap = 0.1;

    let (report, events) = analyze(&two_blocks(0.05), config)?;

    assert!(events.is_empty());
    assert!(report.anomalies(AnomalyKind::Gap).is_empty());
    // nothing found, so the run refined down to the floor
    assert_eq!(report.rounds, 2);

    Ok(())
}

#[test]
fn test_exposed_and_adjacent_air() -> Result<()> {
    let mut scene = Scene::new();
    scene.add_air("hull/air1", 1, slab(0.0, 1.0));
    scene.add_air("hull/air2", 2, slab(1.0, 2.0));
    scene.add_solid("hull/body", 1, slab(2.0, 3.0));

    let config = along_x(AnalysisFlags::EXPOSED_AIR | AnalysisFlags::ADJACENT_AIR);
    let (report, events) = analyze(&scene, config)?;
    let shots = report.views[0].shots as usize;

    // air1 starts the ray; air2 follows it directly, so only the change of
    // air code is reported for it
    assert_eq!(events.count(AnomalyKind::ExposedAir), shots);
    assert_eq!(events.count(AnomalyKind::AdjacentAir), shots);

    let exposed = report.anomalies(AnomalyKind::ExposedAir);
    assert_eq!(exposed.len(), 1);
    assert_eq!(exposed[0].first, "hull/air1");

    let adjacent = report.anomalies(AnomalyKind::AdjacentAir);
    assert_eq!(adjacent.len(), 1);
    assert_eq!(adjacent[0].first, "hull/air1");
    assert_eq!(adjacent[0].second.as_deref(), Some("hull/air2"));
    assert_relative_eq!(adjacent[0].location[0], 1.0, epsilon = 1e-9);

    Ok(())
}

#[test]
fn test_same_air_code_is_not_adjacent() -> Result<()> {
    let mut scene = Scene::new();
    scene.add_solid("hull/skin", 1, slab(0.0, 1.0));
    scene.add_air("hull/fore", 3, slab(1.0, 2.0));
    scene.add_air("hull/aft", 3, slab(2.0, 3.0));
    scene.add_solid("hull/back", 1, slab(3.0, 4.0));

    let mut config = along_x(AnalysisFlags::EXPOSED_AIR | AnalysisFlags::ADJACENT_AIR);
    config.grid.spacing_floor = 0.25;

    let (report, events) = analyze(&scene, config)?;

    assert!(events.is_empty());
    assert!(report.anomalies(AnomalyKind::AdjacentAir).is_empty());
    assert!(report.anomalies(AnomalyKind::ExposedAir).is_empty());

    Ok(())
}

#[test]
fn test_trailing_air_is_exposed() -> Result<()> {
    let mut scene = Scene::new();
    scene.add_solid("hull/body", 1, slab(0.0, 1.0));
    scene.add_air("hull/vent", 1, slab(1.0, 2.0));

    let config = along_x(AnalysisFlags::EXPOSED_AIR);
    let (report, events) = analyze(&scene, config)?;
    let shots = report.views[0].shots as usize;

    assert_eq!(events.count(AnomalyKind::ExposedAir), shots);
    for event in events.events() {
        let AnomalyEvent::ExposedAir { region, start, end } = event else {
            panic!("unexpected event {event:?}");
        };
        assert_eq!(region, 1);
        assert_eq!(start, end);
        assert_relative_eq!(start.x, 2.0, epsilon = 1e-9);
    }

    Ok(())
}

#[test]
fn test_first_last_and_unconfined_air() -> Result<()> {
    let mut scene = Scene::new();
    scene.add_air("hull/inlet", 1, slab(0.0, 1.0));
    scene.add_solid("hull/wall", 1, slab(1.0, 2.0));
    scene.add_air("hull/cavity", 1, slab(2.0, 3.0));
    scene.add_solid("hull/back", 1, slab(3.0, 4.0));

    let config = along_x(
        AnalysisFlags::FIRST_AIR | AnalysisFlags::LAST_AIR | AnalysisFlags::UNCONFINED_AIR,
    );
    let (report, events) = analyze(&scene, config)?;
    let shots = report.views[0].shots as usize;

    assert_eq!(events.count(AnomalyKind::FirstAir), shots);
    assert_eq!(events.count(AnomalyKind::UnconfinedAir), shots);
    assert_eq!(events.count(AnomalyKind::LastAir), 0);

    assert_eq!(report.anomalies(AnomalyKind::FirstAir)[0].first, "hull/inlet");
    assert_eq!(
        report.anomalies(AnomalyKind::UnconfinedAir)[0].first,
        "hull/cavity"
    );
    assert!(report.anomalies(AnomalyKind::LastAir).is_empty());

    Ok(())
}

#[test]
fn test_enabled_check_without_handler_fails_setup() {
    let config = along_x(AnalysisFlags::GAPS | AnalysisFlags::VOLUME);
    let result = ConvergenceController::new(&two_blocks(0.2), config).run();

    assert!(matches!(
        result,
        Err(QaError::MissingCallback(AnomalyKind::Gap))
    ));
}

#[test]
fn test_per_kind_handlers() -> Result<()> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let gaps = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&gaps);

    let mut config = along_x(AnalysisFlags::GAPS);
    config.tolerances.overlap = 0.1;

    let report = ConvergenceController::new(&two_blocks(0.2), config)
        .on(
            AnomalyKind::Gap,
            Arc::new(move |_: &AnomalyEvent| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .run()?;

    assert_eq!(gaps.load(Ordering::Relaxed) as u64, report.views[0].shots);

    Ok(())
}
