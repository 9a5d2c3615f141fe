// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Direction-dependent ("differential") gains.
//!
//! Every model term beyond the first (direction-independent) one gets its own
//! [`SubtiledGainSolver`]. The corrupted models `E_i M_i E_i^H` are added into
//! the combined model that the direction-independent gains are solved against;
//! between direction-independent solves, each direction in turn has its
//! contribution taken out of the shared residual, re-solved, and put back.


use indexmap::IndexMap;
use log::{debug, trace};
use ndarray::prelude::*;

use crate::{
    gains::{GainConfig, InitialGains, SubtiledGainSolver},
    vis::{Antenna, Baseline, DomainGeometry, VisMap},
    Jones,
};

/// What happened while solving one direction during a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionSummary {
    pub num_iterations: usize,
    pub converged: bool,
    pub max_delta: f64,
}

pub struct DiffGainManager {
    config: GainConfig,

    /// The maximum number of sweeps per direction per pass.
    max_iter: usize,

    init_from_previous: bool,
    init_value: InitialGains,

    /// Gains injected by the host for the next domain, per direction.
    host_seeds: IndexMap<usize, InitialGains>,

    /// The last time subtile of the previous domain, per direction.
    previous: IndexMap<usize, InitialGains>,

    /// The solvers of the current domain.
    solvers: Vec<SubtiledGainSolver>,

    /// `E_i M_i E_i^H` for every direction and baseline under the current gain
    /// estimates.
    corrupted: Vec<VisMap>,
}

impl DiffGainManager {
    pub fn new(
        config: GainConfig,
        max_iter: usize,
        init_from_previous: bool,
        init_value: InitialGains,
    ) -> DiffGainManager {
        DiffGainManager {
            config,
            max_iter,
            init_from_previous,
            init_value,
            host_seeds: IndexMap::new(),
            previous: IndexMap::new(),
            solvers: vec![],
            corrupted: vec![],
        }
    }

    pub fn num_directions(&self) -> usize {
        self.solvers.len()
    }

    pub fn solvers(&self) -> &[SubtiledGainSolver] {
        &self.solvers
    }

    /// Solver settings depend on the data shape; these apply from the next
    /// [`DiffGainManager::start_domain`].
    pub fn set_config(&mut self, config: GainConfig) {
        self.config = config;
    }

    /// Use these gains for the given direction at the start of the next domain.
    pub fn seed(&mut self, direction: usize, gains: InitialGains) {
        self.host_seeds.insert(direction, gains);
    }

    /// Forget the gains carried over from previous domains, e.g. for a new
    /// dataset. Gains injected with [`DiffGainManager::seed`] are kept.
    pub fn reset(&mut self) {
        self.previous.clear();
        self.solvers.clear();
        self.corrupted.clear();
    }

    /// Set up a solver per direction model for a new domain and corrupt each
    /// model with its initial gains. The models must already be padded to the
    /// geometry's expanded shape.
    pub fn start_domain(
        &mut self,
        models: &[VisMap],
        antennas: &[Antenna],
        solvable: &[Baseline],
        geometry: DomainGeometry,
        active_pols: [bool; 2],
    ) {
        self.solvers.clear();
        for i in 0..models.len() {
            let init = match self.host_seeds.shift_remove(&i) {
                Some(seed) => seed,
                None => match self.previous.get(&i) {
                    Some(previous) if self.init_from_previous => previous.clone(),
                    _ => self.init_value.clone(),
                },
            };
            self.solvers.push(SubtiledGainSolver::new(
                self.config.clone(),
                antennas,
                solvable,
                geometry,
                active_pols,
                &init,
            ));
        }
        self.corrupted = self
            .solvers
            .iter()
            .zip(models)
            .map(|(solver, model)| corrupt_all(solver, model))
            .collect();
        debug!(
            "Set up {} direction-dependent gain solvers",
            self.solvers.len()
        );
    }

    /// Add every direction's corrupted model into `combined` for the given
    /// baselines.
    pub fn add_contributions<'a, I>(&self, combined: &mut VisMap, baselines: I)
    where
        I: IntoIterator<Item = &'a Baseline>,
    {
        for baseline in baselines {
            let Some(planes) = combined.get_mut(baseline) else {
                continue;
            };
            for corrupted in &self.corrupted {
                if let Some(c) = corrupted.get(baseline) {
                    planes.add_assign(c);
                }
            }
        }
    }

    /// Recompute each direction's corrupted model under its current gains.
    pub fn refresh(&mut self, models: &[VisMap]) {
        self.corrupted = self
            .solvers
            .iter()
            .zip(models)
            .map(|(solver, model)| corrupt_all(solver, model))
            .collect();
    }

    /// One sweep over all directions.
    ///
    /// `residual` holds the model-frame residual of every solvable baseline
    /// (corrected data minus the combined model) and `combined` the combined
    /// model. For each direction in turn, its current contribution is moved
    /// from the combined model into the residual, its gains are re-solved
    /// against the residual, and the new contribution is moved back. The
    /// residual is left alone after the last direction.
    pub fn solve_pass(
        &mut self,
        residual: &mut VisMap,
        combined: &mut VisMap,
        models: &[VisMap],
    ) -> Vec<DirectionSummary> {
        let num_directions = self.solvers.len();
        let mut summaries = Vec::with_capacity(num_directions);
        for (i, (solver, model)) in self.solvers.iter_mut().zip(models).enumerate() {
            let corrupted = &mut self.corrupted[i];

            for (baseline, r) in residual.iter_mut() {
                if let Some(c) = corrupted.get(baseline) {
                    r.add_assign(c);
                    if let Some(m) = combined.get_mut(baseline) {
                        m.sub_assign(c);
                    }
                }
            }

            let mut summary = DirectionSummary {
                num_iterations: 0,
                converged: false,
                max_delta: 0.0,
            };
            for niter in 0..self.max_iter {
                let result = solver.iterate(residual, model, niter == 0);
                summary.num_iterations = niter + 1;
                summary.converged = result.converged;
                summary.max_delta = result.max_delta;
                if result.converged {
                    break;
                }
            }
            trace!(
                "Direction {i}: {} iterations, converged: {}, last update {:e}",
                summary.num_iterations,
                summary.converged,
                summary.max_delta
            );

            for (baseline, r) in residual.iter_mut() {
                let Some(m) = model.get(baseline) else {
                    continue;
                };
                let c = solver.apply_inverse(m, baseline);
                if let Some(m) = combined.get_mut(baseline) {
                    m.add_assign(&c);
                }
                if i + 1 < num_directions {
                    r.sub_assign(&c);
                }
                corrupted.insert(baseline.clone(), c);
            }
            summaries.push(summary);
        }
        summaries
    }

    /// Remember the last time subtile of each direction's gains for the next
    /// domain.
    pub fn finish_domain(&mut self) {
        if self.init_from_previous {
            self.previous = self
                .solvers
                .iter()
                .enumerate()
                .map(|(i, solver)| (i, solver.get_last_timeslot()))
                .collect();
        }
    }

    /// Each direction's gains at the data resolution.
    pub fn get_2x2_gains(&self) -> Vec<IndexMap<Antenna, Array2<Jones>>> {
        self.solvers.iter().map(|s| s.get_2x2_gains()).collect()
    }
}

fn corrupt_all(solver: &SubtiledGainSolver, model: &VisMap) -> VisMap {
    model
        .iter()
        .map(|(baseline, planes)| (baseline.clone(), solver.apply_inverse(planes, baseline)))
        .collect()
}
