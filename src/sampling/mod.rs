// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sampling grids

mod grid;
mod view;

pub use grid::{SamplingGrid, Slice};
pub use view::{Lattice, ViewFrame};
