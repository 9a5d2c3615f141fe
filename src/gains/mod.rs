// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-antenna gain parameters on a subtiled (time, frequency) grid, and the
//! alternating least-squares solver that updates them.

mod smoothing;
mod solver;
#[cfg(test)]
mod tests;

pub use smoothing::GaussianKernel;
pub use solver::{GainConfig, IterationResult, SubtiledGainSolver};

use indexmap::IndexMap;
use log::warn;
use ndarray::prelude::*;

use crate::{
    c64,
    vis::{Antenna, Correlation, VisMap},
    Jones,
};

/// Which elements of each antenna's Jones matrix are free parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainModel {
    /// One complex gain per polarisation; the leakage terms are always zero.
    Diagonal,

    /// A full 2x2 complex Jones matrix.
    FullPolarisation,
}

/// How gains are initialised at the start of a domain.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialGains {
    /// The same value on the diagonal of every antenna's Jones matrix.
    Constant(c64),

    /// Per-antenna gains for each frequency subtile, e.g. the last time subtile
    /// of the previous domain. These are used for every time subtile.
    /// Antennas without an entry (or with a mismatched number of frequency
    /// subtiles) fall back to the solver's initial value.
    PerAntenna(IndexMap<Antenna, Array1<Jones>>),
}

impl Default for InitialGains {
    fn default() -> Self {
        InitialGains::Constant(c64::new(1.0, 0.0))
    }
}

impl InitialGains {
    /// Build the gain array for the given antennas and subtile grid. Antennas
    /// without a usable seed get `fallback` on the diagonal.
    pub(crate) fn to_array(
        &self,
        antennas: &[Antenna],
        num_subtiles: (usize, usize),
        model: GainModel,
        fallback: c64,
    ) -> Array3<Jones> {
        let shape = (antennas.len(), num_subtiles.0, num_subtiles.1);
        let mut gains = match self {
            InitialGains::Constant(v) => Array3::from_elem(shape, Jones::identity() * *v),

            InitialGains::PerAntenna(map) => {
                let mut gains = Array3::from_elem(shape, Jones::identity() * fallback);
                let mut num_missing = 0;
                for (antenna, mut gains) in antennas.iter().zip(gains.outer_iter_mut()) {
                    match map.get(antenna) {
                        Some(seed) if seed.len() == num_subtiles.1 => {
                            for mut row in gains.outer_iter_mut() {
                                row.assign(seed);
                            }
                        }
                        _ => num_missing += 1,
                    }
                }
                if num_missing > 0 {
                    warn!(
                        "{num_missing} antennas had no usable initial gains; using {fallback} for them"
                    );
                }
                gains
            }
        };

        if model == GainModel::Diagonal {
            gains.mapv_inplace(|j| Jones::diagonal(j[0], j[3]));
        }
        gains
    }
}

/// Which of the two polarisations take part in the fit. A correlation counts
/// when its data plane is present and, in the diagonal model, at least one of
/// the model sets has that correlation too; with full polarisation a missing
/// model plane is a zero model, so data alone are enough.
pub fn active_polarisations(data: &VisMap, models: &[VisMap], model: GainModel) -> [bool; 2] {
    let mut active = [false; 2];
    for (baseline, planes) in data {
        for corr in Correlation::ALL {
            if planes.get(corr).is_none() {
                continue;
            }
            let modelled = match model {
                GainModel::FullPolarisation => true,
                GainModel::Diagonal => models
                    .iter()
                    .filter_map(|m| m.get(baseline))
                    .any(|m| m.get(corr).is_some()),
            };
            if modelled {
                let (i, j) = corr.pols();
                active[i] = true;
                active[j] = true;
            }
        }
    }
    active
}

/// The free Jones elements for a gain model, given the active polarisations.
/// A leakage term is only free when both polarisations are.
pub(crate) fn active_elements(model: GainModel, active_pols: [bool; 2]) -> [bool; 4] {
    let [x, y] = active_pols;
    match model {
        GainModel::Diagonal => [x, false, false, y],
        GainModel::FullPolarisation => [x, x && y, x && y, y],
    }
}

/// The gain parameters and their convergence bookkeeping.
#[derive(Debug, Clone)]
pub struct GainState {
    /// The current gains. The first dimension is antenna, the second is time
    /// subtile, the third is frequency subtile.
    pub(crate) gains: Array3<Jones>,

    /// The magnitude of the last update of each parameter. The last dimension
    /// is the Jones matrix element.
    deltas: Array4<f64>,

    /// Whether each parameter's last update was below epsilon.
    converged: Array4<bool>,

    /// Which Jones matrix elements are free parameters.
    active: [bool; 4],

    num_converged: usize,
    delta_max: f64,
}

impl GainState {
    pub(crate) fn new(gains: Array3<Jones>, active: [bool; 4]) -> GainState {
        let (a, t, f) = gains.dim();
        GainState {
            gains,
            deltas: Array4::zeros((a, t, f, 4)),
            converged: Array4::from_elem((a, t, f, 4), false),
            active,
            num_converged: 0,
            delta_max: 0.0,
        }
    }

    pub fn gains(&self) -> ArrayView3<Jones> {
        self.gains.view()
    }

    /// The total number of free (complex) parameters.
    pub fn total_parms(&self) -> usize {
        self.gains.len() * self.active.iter().filter(|&&a| a).count()
    }

    pub fn num_converged(&self) -> usize {
        self.num_converged
    }

    /// The largest update magnitude of the last iteration.
    pub fn delta_max(&self) -> f64 {
        self.delta_max
    }

    /// Per-parameter update magnitudes of the last iteration. Inactive
    /// elements are always zero.
    pub fn deltas(&self) -> ArrayView4<f64> {
        self.deltas.view()
    }

    pub fn converged(&self) -> ArrayView4<bool> {
        self.converged.view()
    }

    pub fn active(&self) -> [bool; 4] {
        self.active
    }

    /// Replace the gains with a new estimate, recording how much each
    /// parameter moved and whether that movement was below `epsilon`.
    pub(crate) fn update(&mut self, new_gains: Array3<Jones>, epsilon: f64) {
        let mut num_converged = 0;
        let mut delta_max: f64 = 0.0;
        for ((a, t, f), new) in new_gains.indexed_iter() {
            let diff = *new - self.gains[(a, t, f)];
            for (i, _) in self.active.iter().enumerate().filter(|(_, &active)| active) {
                let delta = diff[i].norm();
                let is_converged = delta < epsilon;
                self.deltas[(a, t, f, i)] = delta;
                self.converged[(a, t, f, i)] = is_converged;
                delta_max = delta_max.max(delta);
                if is_converged {
                    num_converged += 1;
                }
            }
        }
        self.gains = new_gains;
        self.num_converged = num_converged;
        self.delta_max = delta_max;
    }
}
