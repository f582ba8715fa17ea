// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! One round's ray lattice.
//!
//! A refined grid only contains the points that the previous lattice did not
//! already shoot: in rows that existed before, only the new columns.

use super::view::{Lattice, ViewFrame};
use crate::kernel::Ray;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fraction of an even per-worker share handed out per claim
const SLICE_FRACTION: f64 = 0.1;

/// A contiguous run of ray indices claimed by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    /// Position of the slice in claim order, stable for a given grid and chunk
    pub index: usize,
    pub range: Range<usize>,
}

/// Lattice of parallel rays for one view at one spacing
#[derive(Debug)]
pub struct SamplingGrid {
    frame: ViewFrame,
    spacing: f64,
    lattice: Lattice,
    /// Lattice index of every row, and whether it was shot before
    rows: Vec<(u32, bool)>,
    all_cols: Vec<u32>,
    new_cols: Vec<u32>,
    /// Prefix sums of per-row ray counts
    offsets: Vec<usize>,
    cursor: AtomicUsize,
}

impl SamplingGrid {
    /// Full lattice of a view at `spacing`
    pub fn new(frame: ViewFrame, spacing: f64) -> Self {
        Self::build(frame, spacing, None)
    }

    /// Grid at half the spacing holding only points not shot by `self`
    pub fn refined(&self) -> Self {
        Self::build(self.frame.clone(), self.spacing * 0.5, Some(&self.lattice))
    }

    fn build(frame: ViewFrame, spacing: f64, previous: Option<&Lattice>) -> Self {
        let lattice = frame.lattice(spacing);

        // an even index 2k existed before iff k was in the previous range
        let was_shot = |i: u32, prev: &Range<u32>| i % 2 == 0 && prev.contains(&(i / 2));

        let all_cols: Vec<u32> = lattice.cols.clone().collect();
        let new_cols: Vec<u32> = match previous {
            Some(prev) => all_cols
                .iter()
                .copied()
                .filter(|c| !was_shot(*c, &prev.cols))
                .collect(),
            None => all_cols.clone(),
        };

        let rows: Vec<(u32, bool)> = lattice
            .rows
            .clone()
            .map(|r| (r, previous.is_some_and(|prev| was_shot(r, &prev.rows))))
            .collect();

        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut total = 0usize;
        offsets.push(0);
        for (_, old) in &rows {
            total += if *old { new_cols.len() } else { all_cols.len() };
            offsets.push(total);
        }

        Self {
            frame,
            spacing,
            lattice,
            rows,
            all_cols,
            new_cols,
            offsets,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn frame(&self) -> &ViewFrame {
        &self.frame
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Number of rays in this round
    pub fn total(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Claim size for a pool of `cpus` workers
    pub fn chunk_size(&self, cpus: usize) -> usize {
        let share = self.total() as f64 / cpus.max(1) as f64;
        ((share * SLICE_FRACTION) as usize).max(1)
    }

    /// Atomically claim the next unclaimed run of at most `chunk` rays
    pub fn claim(&self, chunk: usize) -> Option<Slice> {
        let total = self.total();
        let start = self.cursor.fetch_add(chunk, Ordering::Relaxed);
        if start >= total {
            return None;
        }
        Some(Slice {
            index: start / chunk,
            range: start..(start + chunk).min(total),
        })
    }

    /// Rewind the cursor so the same grid can be shot again
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Lattice coordinates of ray `index`
    pub fn lattice_point(&self, index: usize) -> Option<(u32, u32)> {
        if index >= self.total() {
            return None;
        }
        let row = self.offsets.partition_point(|&o| o <= index) - 1;
        let within = index - self.offsets[row];
        let (v, old) = self.rows[row];
        let u = if old {
            self.new_cols[within]
        } else {
            self.all_cols[within]
        };
        Some((u, v))
    }

    /// Ray for `index`
    pub fn ray(&self, index: usize) -> Option<Ray> {
        let (u, v) = self.lattice_point(index)?;
        Some(self.ray_at(u, v))
    }

    /// Ray through lattice point (u, v)
    pub fn ray_at(&self, u: u32, v: u32) -> Ray {
        let [w, h] = self.frame.cell(self.spacing);
        let origin = self.frame.origin
            + self.frame.u_dir * (f64::from(u) * w)
            + self.frame.v_dir * (f64::from(v) * h);
        Ray::new(origin, self.frame.dir)
    }
}
