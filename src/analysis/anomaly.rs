// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Anomaly events, handlers and the per-kind handler table

use crate::config::AnalysisFlags;
use crate::error::{QaError, QaResult};
use crate::kernel::RegionId;
use ahash::AHashMap;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Class of geometric anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Overlap,
    Gap,
    ExposedAir,
    AdjacentAir,
    FirstAir,
    LastAir,
    UnconfinedAir,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 7] = [
        AnomalyKind::Overlap,
        AnomalyKind::Gap,
        AnomalyKind::ExposedAir,
        AnomalyKind::AdjacentAir,
        AnomalyKind::FirstAir,
        AnomalyKind::LastAir,
        AnomalyKind::UnconfinedAir,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Analysis flag that enables this check
    pub fn flag(self) -> AnalysisFlags {
        match self {
            AnomalyKind::Overlap => AnalysisFlags::OVERLAPS,
            AnomalyKind::Gap => AnalysisFlags::GAPS,
            AnomalyKind::ExposedAir => AnalysisFlags::EXPOSED_AIR,
            AnomalyKind::AdjacentAir => AnalysisFlags::ADJACENT_AIR,
            AnomalyKind::FirstAir => AnalysisFlags::FIRST_AIR,
            AnomalyKind::LastAir => AnalysisFlags::LAST_AIR,
            AnomalyKind::UnconfinedAir => AnalysisFlags::UNCONFINED_AIR,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AnomalyKind::Overlap => "overlaps",
            AnomalyKind::Gap => "gaps",
            AnomalyKind::ExposedAir => "exposed air",
            AnomalyKind::AdjacentAir => "adjacent air",
            AnomalyKind::FirstAir => "first air",
            AnomalyKind::LastAir => "last air",
            AnomalyKind::UnconfinedAir => "unconfined air",
        }
    }

    /// Kinds enabled by a flag set
    pub fn enabled(flags: AnalysisFlags) -> impl Iterator<Item = AnomalyKind> {
        Self::ALL.into_iter().filter(move |k| flags.contains(k.flag()))
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One anomaly found along one ray
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyEvent {
    Overlap {
        first: RegionId,
        second: RegionId,
        start: Point3<f64>,
        end: Point3<f64>,
        depth: f64,
    },
    Gap {
        region: RegionId,
        previous: RegionId,
        start: Point3<f64>,
        end: Point3<f64>,
        distance: f64,
    },
    ExposedAir {
        region: RegionId,
        start: Point3<f64>,
        end: Point3<f64>,
    },
    AdjacentAir {
        region: RegionId,
        previous: RegionId,
        at: Point3<f64>,
    },
    FirstAir {
        region: RegionId,
        start: Point3<f64>,
        end: Point3<f64>,
    },
    LastAir {
        region: RegionId,
        start: Point3<f64>,
        end: Point3<f64>,
    },
    UnconfinedAir {
        region: RegionId,
        start: Point3<f64>,
        end: Point3<f64>,
    },
}

impl AnomalyEvent {
    pub fn kind(&self) -> AnomalyKind {
        match self {
            AnomalyEvent::Overlap { .. } => AnomalyKind::Overlap,
            AnomalyEvent::Gap { .. } => AnomalyKind::Gap,
            AnomalyEvent::ExposedAir { .. } => AnomalyKind::ExposedAir,
            AnomalyEvent::AdjacentAir { .. } => AnomalyKind::AdjacentAir,
            AnomalyEvent::FirstAir { .. } => AnomalyKind::FirstAir,
            AnomalyEvent::LastAir { .. } => AnomalyKind::LastAir,
            AnomalyEvent::UnconfinedAir { .. } => AnomalyKind::UnconfinedAir,
        }
    }

    /// Primary region and, for pairwise anomalies, the other one
    pub fn regions(&self) -> (RegionId, Option<RegionId>) {
        match self {
            AnomalyEvent::Overlap { first, second, .. } => (*first, Some(*second)),
            AnomalyEvent::Gap {
                region, previous, ..
            }
            | AnomalyEvent::AdjacentAir {
                region, previous, ..
            } => (*previous, Some(*region)),
            AnomalyEvent::ExposedAir { region, .. }
            | AnomalyEvent::FirstAir { region, .. }
            | AnomalyEvent::LastAir { region, .. }
            | AnomalyEvent::UnconfinedAir { region, .. } => (*region, None),
        }
    }

    /// Segment suitable for plotting
    pub fn segment(&self) -> (Point3<f64>, Point3<f64>) {
        match self {
            AnomalyEvent::Overlap { start, end, .. }
            | AnomalyEvent::Gap { start, end, .. }
            | AnomalyEvent::ExposedAir { start, end, .. }
            | AnomalyEvent::FirstAir { start, end, .. }
            | AnomalyEvent::LastAir { start, end, .. }
            | AnomalyEvent::UnconfinedAir { start, end, .. } => (*start, *end),
            AnomalyEvent::AdjacentAir { at, .. } => (*at, *at),
        }
    }

    /// Distance recorded in the anomaly lists
    pub fn distance(&self) -> f64 {
        match self {
            AnomalyEvent::Overlap { depth, .. } => *depth,
            AnomalyEvent::Gap { distance, .. } => *distance,
            AnomalyEvent::AdjacentAir { .. } => 0.0,
            other => {
                let (a, b) = other.segment();
                (b - a).norm()
            }
        }
    }

    /// Point recorded in the anomaly lists
    pub fn location(&self) -> Point3<f64> {
        match self {
            AnomalyEvent::Gap { end, .. } => *end,
            other => other.segment().0,
        }
    }
}

/// Receives anomaly events on worker threads
pub trait AnomalyHandler: Send + Sync {
    fn handle(&self, event: &AnomalyEvent);
}

impl<F> AnomalyHandler for F
where
    F: Fn(&AnomalyEvent) + Send + Sync,
{
    fn handle(&self, event: &AnomalyEvent) {
        self(event)
    }
}

/// One handler slot per anomaly kind
#[derive(Clone, Default)]
pub struct AnomalyCallbacks {
    slots: [Option<Arc<dyn AnomalyHandler>>; 7],
}

impl fmt::Debug for AnomalyCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<AnomalyKind> = AnomalyKind::ALL
            .into_iter()
            .filter(|k| self.slots[k.index()].is_some())
            .collect();
        f.debug_struct("AnomalyCallbacks")
            .field("registered", &registered)
            .finish()
    }
}

impl AnomalyCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: AnomalyKind, handler: Arc<dyn AnomalyHandler>) {
        self.slots[kind.index()] = Some(handler);
    }

    /// Register one handler for every kind
    pub fn register_all(&mut self, handler: Arc<dyn AnomalyHandler>) {
        for kind in AnomalyKind::ALL {
            self.register(kind, Arc::clone(&handler));
        }
    }

    pub fn get(&self, kind: AnomalyKind) -> Option<&Arc<dyn AnomalyHandler>> {
        self.slots[kind.index()].as_ref()
    }

    /// Every kind enabled in `flags` must have a handler
    pub fn validate(&self, flags: AnalysisFlags) -> QaResult<()> {
        match AnomalyKind::enabled(flags).find(|k| self.get(*k).is_none()) {
            Some(kind) => Err(QaError::MissingCallback(kind)),
            None => Ok(()),
        }
    }

    pub fn dispatch(&self, event: &AnomalyEvent) {
        if let Some(handler) = self.get(event.kind()) {
            handler.handle(event);
        }
    }
}

/// Handler that keeps every event it is given
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<AnomalyEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AnomalyEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnomalyHandler for EventLog {
    fn handle(&self, event: &AnomalyEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Aggregate for one region pair in an anomaly list
#[derive(Debug, Clone, PartialEq)]
pub struct PairEntry {
    pub count: u64,
    pub max_distance: f64,
    pub location: Point3<f64>,
}

/// Deduplicated list of region pairs for one anomaly kind
#[derive(Debug, Clone, Default)]
pub struct AnomalyList {
    entries: AHashMap<(RegionId, Option<RegionId>), PairEntry>,
}

impl AnomalyList {
    /// Pairs are unordered
    pub fn add(&mut self, a: RegionId, b: Option<RegionId>, distance: f64, location: Point3<f64>) {
        let key = match b {
            Some(b) if b < a => (b, Some(a)),
            _ => (a, b),
        };
        let entry = self.entries.entry(key).or_insert(PairEntry {
            count: 0,
            max_distance: distance,
            location,
        });
        entry.count += 1;
        let further = distance > entry.max_distance
            || (distance == entry.max_distance && lexicographic_lt(&location, &entry.location));
        if further {
            entry.max_distance = distance;
            entry.location = location;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_region(&self, region: RegionId) -> bool {
        self.entries
            .keys()
            .any(|(a, b)| *a == region || *b == Some(region))
    }

    /// Entries ordered by region ids
    pub fn sorted(&self) -> Vec<((RegionId, Option<RegionId>), PairEntry)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        out.sort_by(|x, y| x.0.cmp(&y.0));
        out
    }
}

fn lexicographic_lt(a: &Point3<f64>, b: &Point3<f64>) -> bool {
    (a.x, a.y, a.z) < (b.x, b.y, b.z)
}

/// One list per anomaly kind
#[derive(Debug, Clone, Default)]
pub struct AnomalyLists {
    lists: [AnomalyList; 7],
}

impl AnomalyLists {
    pub fn record(&mut self, event: &AnomalyEvent) {
        let (a, b) = event.regions();
        self.lists[event.kind().index()].add(a, b, event.distance(), event.location());
    }

    pub fn get(&self, kind: AnomalyKind) -> &AnomalyList {
        &self.lists[kind.index()]
    }

    /// True when any enabled list has an entry
    pub fn any(&self, flags: AnalysisFlags) -> bool {
        AnomalyKind::enabled(flags).any(|k| !self.get(k).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_validate_requires_handlers() {
        let flags = AnalysisFlags::GAPS | AnalysisFlags::VOLUME;
        let mut callbacks = AnomalyCallbacks::new();
        assert!(matches!(
            callbacks.validate(flags),
            Err(QaError::MissingCallback(AnomalyKind::Gap))
        ));

        callbacks.register(AnomalyKind::Gap, Arc::new(|_: &AnomalyEvent| {}));
        assert!(callbacks.validate(flags).is_ok());
        assert!(callbacks.validate(AnalysisFlags::VOLUME).is_ok());
    }

    #[test]
    fn test_dispatch_reaches_only_matching_kind() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut callbacks = AnomalyCallbacks::new();
        callbacks.register(
            AnomalyKind::ExposedAir,
            Arc::new(move |_: &AnomalyEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let p = Point3::origin();
        callbacks.dispatch(&AnomalyEvent::ExposedAir {
            region: 0,
            start: p,
            end: p,
        });
        callbacks.dispatch(&AnomalyEvent::FirstAir {
            region: 0,
            start: p,
            end: p,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_list_deduplicates_unordered_pairs() {
        let mut list = AnomalyList::default();
        list.add(3, Some(1), 0.5, Point3::new(1.0, 0.0, 0.0));
        list.add(1, Some(3), 0.9, Point3::new(2.0, 0.0, 0.0));
        list.add(1, Some(2), 0.1, Point3::origin());

        assert_eq!(list.len(), 2);
        let sorted = list.sorted();
        assert_eq!(sorted[0].0, (1, Some(2)));
        assert_eq!(sorted[1].1.count, 2);
        assert_eq!(sorted[1].1.max_distance, 0.9);
        assert!(list.contains_region(3));
        assert!(!list.contains_region(7));
    }
}
