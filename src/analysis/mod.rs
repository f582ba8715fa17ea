// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Ray-sampling analysis engine

mod anomaly;
mod controller;
mod hit;
mod overlap;
mod report;
mod state;
mod worker;

pub use anomaly::{
    AnomalyCallbacks, AnomalyEvent, AnomalyHandler, AnomalyKind, AnomalyList, AnomalyLists,
    EventLog, PairEntry,
};
pub use controller::ConvergenceController;
pub use hit::{HitProcessor, ViewContext};
pub use overlap::OverlapResolver;
pub use report::{
    AnalysisReport, AnomalyReport, BoxReport, Estimate, LogEntry, MissedRegion, PairReport,
    RegionReport, TargetReport, ViewSummary,
};
pub use state::{
    AbortHandle, Accumulators, Diagnostics, Estimates, ObjectStats, RegionStats,
    ResolvedTolerances, RunInputs, RunState, SliceTally, Target, ViewStats,
};
pub use worker::WorkerPool;
