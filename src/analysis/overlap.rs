// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Arbitration of intervals claimed by two regions.
//!
//! The first claimant keeps a genuine overlap. This loses the second
//! region's contribution for the overlapped length, which is the behaviour
//! the reports have always had; changing it would shift every mass figure.

use super::anomaly::AnomalyEvent;
use super::state::RunState;
use crate::config::AnalysisFlags;
use crate::kernel::{OverlapClaim, OverlapInterval, Ray};

pub struct OverlapResolver<'a> {
    state: &'a RunState,
}

impl<'a> OverlapResolver<'a> {
    pub fn new(state: &'a RunState) -> Self {
        Self { state }
    }

    pub fn resolve(&self, ray: &Ray, overlap: &OverlapInterval) -> OverlapClaim {
        let state = self.state;

        // partitions the run drops never win
        match (state.keeps(overlap.first), state.keeps(overlap.second)) {
            (true, true) => {}
            (false, true) => return OverlapClaim::Second,
            _ => return OverlapClaim::First,
        }

        // air against solid is not an error, the solid owns the space
        match (
            state.region(overlap.first).is_air(),
            state.region(overlap.second).is_air(),
        ) {
            (true, false) => return OverlapClaim::Second,
            (false, true) => return OverlapClaim::First,
            _ => {}
        }

        let depth = overlap.depth();
        if depth <= state.tolerances.overlap {
            return OverlapClaim::First;
        }

        if state.flags.contains(AnalysisFlags::OVERLAPS) {
            state.report_anomaly(
                ray,
                AnomalyEvent::Overlap {
                    first: overlap.first,
                    second: overlap.second,
                    start: ray.at(overlap.in_dist),
                    end: ray.at(overlap.out_dist),
                    depth,
                },
            );
        }
        OverlapClaim::First
    }
}
