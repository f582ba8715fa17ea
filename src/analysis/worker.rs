// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Fixed-size worker pool that shoots one view's grid

use super::hit::{HitProcessor, ViewContext};
use super::overlap::OverlapResolver;
use super::state::{RunState, SliceTally};
use crate::error::{QaError, QaResult};
use crate::kernel::{OverlapClaim, OverlapInterval, Partition, Ray, RayHandler, RayKernel};
use crate::sampling::SamplingGrid;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::trace;

/// Threads reused for every view of every round
pub struct WorkerPool {
    pool: ThreadPool,
    cpus: usize,
}

impl WorkerPool {
    pub fn new(cpus: usize) -> QaResult<Self> {
        let cpus = cpus.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(cpus)
            .thread_name(|i| format!("qa-worker-{i}"))
            .build()
            .map_err(|e| QaError::invalid_config(format!("cannot start {cpus} workers: {e}")))?;
        Ok(Self { pool, cpus })
    }

    pub fn cpus(&self) -> usize {
        self.cpus
    }

    /// Shoot every ray of `grid`; returns once all workers have finished
    pub fn run_view(
        &self,
        kernel: &dyn RayKernel,
        state: &RunState,
        grid: &SamplingGrid,
        ctx: &ViewContext,
    ) {
        let chunk = grid.chunk_size(self.cpus);
        self.pool.scope(|scope| {
            for _ in 0..self.cpus {
                scope.spawn(move |_| worker_loop(kernel, state, grid, ctx, chunk));
            }
        });
    }
}

fn worker_loop(
    kernel: &dyn RayKernel,
    state: &RunState,
    grid: &SamplingGrid,
    ctx: &ViewContext,
    chunk: usize,
) {
    let processor = HitProcessor::new(state, ctx);
    let resolver = OverlapResolver::new(state);
    let mut kept = Vec::new();

    while !state.is_aborted() {
        let Some(slice) = grid.claim(chunk) else {
            break;
        };
        let mut tally = SliceTally::default();
        {
            let mut handler = RayContext {
                processor: &processor,
                resolver: &resolver,
                state,
                tally: &mut tally,
                kept: &mut kept,
                row: 0,
            };
            for index in slice.range.clone() {
                let Some((u, v)) = grid.lattice_point(index) else {
                    break;
                };
                let ray = grid.ray_at(u, v);
                handler.row = v;
                kernel.shoot(&ray, &mut handler);
                handler.tally.shots += 1;
                if state.is_aborted() {
                    break;
                }
            }
        }
        trace!(view = ctx.view, slice = slice.index, shots = tally.shots, "slice done");
        state.deposit(slice.index, tally);
    }
}

/// Kernel callbacks for the ray currently being shot
struct RayContext<'a, 'b> {
    processor: &'b HitProcessor<'a>,
    resolver: &'b OverlapResolver<'a>,
    state: &'a RunState,
    tally: &'b mut SliceTally,
    kept: &'b mut Vec<Partition>,
    row: u32,
}

impl RayHandler for RayContext<'_, '_> {
    fn on_hit(&mut self, ray: &Ray, partitions: &[Partition]) -> bool {
        let state = self.state;
        self.kept.clear();
        self.kept
            .extend(partitions.iter().filter(|p| state.keeps(p.region)).copied());
        if !self.kept.is_empty() {
            self.processor
                .process(ray, self.kept.as_slice(), self.row, self.tally);
        }
        true
    }

    fn on_miss(&mut self, _ray: &Ray) {}

    fn on_overlap(&mut self, ray: &Ray, overlap: &OverlapInterval) -> OverlapClaim {
        self.resolver.resolve(ray, overlap)
    }
}
