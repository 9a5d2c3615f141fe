// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The subtiled alternating least-squares gain solver.
//!
//! The measurement equation is `D_pq = G_p M_pq G_q^H`. Each sweep updates
//! every antenna's gain against all solvable baselines touching it, using the
//! previous sweep's gains for the other antennas (a Jacobi-style update, so the
//! antennas are solved in parallel).

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use ndarray::prelude::*;
use rayon::prelude::*;

use super::{active_elements, GainModel, GainState, GaussianKernel, InitialGains};
use crate::{
    c64,
    vis::{Antenna, Baseline, DomainGeometry, Planes, VisMap},
    Jones,
};

/// Settings for one [`SubtiledGainSolver`].
#[derive(Debug, Clone, PartialEq)]
pub struct GainConfig {
    pub model: GainModel,

    /// The (time, frequency) size of a subtile in samples. Must divide the
    /// expanded shape of the domain.
    pub subtiling: (usize, usize),

    /// A parameter is converged when its update is smaller than this.
    pub epsilon: f64,

    /// The fraction of parameters that must be converged for the whole solve
    /// to be converged.
    pub quota: f64,

    /// The standard deviations (in subtiles) of a Gaussian smoothing kernel
    /// applied to the gains after every sweep.
    pub smoothing: Option<[f64; 2]>,

    /// The diagonal value of antennas that a per-antenna seed doesn't cover.
    pub init_value: c64,
}

/// What happened during one sweep.
#[derive(Debug, Clone)]
pub struct IterationResult {
    /// Was the convergence quota met?
    pub converged: bool,

    pub num_converged: usize,

    /// The largest update of any parameter.
    pub max_delta: f64,

    /// Per-parameter update magnitudes, indexed by (antenna, time subtile,
    /// frequency subtile, Jones element).
    pub deltas: Array4<f64>,
}

/// A solvable baseline as seen by one of its antennas.
#[derive(Debug, Clone)]
struct Touch {
    /// Index into `SubtiledGainSolver::solvable`.
    baseline: usize,

    /// The antenna index at the other end of the baseline.
    other: usize,

    /// Is this antenna the first antenna (p) of the baseline?
    is_p: bool,
}

pub struct SubtiledGainSolver {
    config: GainConfig,
    antennas: IndexSet<Antenna>,
    solvable: Vec<Baseline>,

    /// For each antenna, the solvable baselines it is part of.
    touches: Vec<Vec<Touch>>,

    geometry: DomainGeometry,
    num_subtiles: (usize, usize),
    kernel: Option<GaussianKernel>,

    /// Gains used for antennas the solver doesn't know about.
    unity: Array2<Jones>,

    state: GainState,
}

impl SubtiledGainSolver {
    /// Set up a solver over the domain described by `geometry`.
    /// `active_pols` says which of the two polarisations take part in the fit
    /// (see [`super::active_polarisations`]); inactive polarisations have no
    /// parameters, nor do leakage terms unless both are active.
    pub fn new(
        config: GainConfig,
        antennas: &[Antenna],
        solvable: &[Baseline],
        geometry: DomainGeometry,
        active_pols: [bool; 2],
        init: &InitialGains,
    ) -> SubtiledGainSolver {
        let (st_t, st_f) = config.subtiling;
        debug_assert_eq!(geometry.expanded_shape.0 % st_t, 0);
        debug_assert_eq!(geometry.expanded_shape.1 % st_f, 0);
        let num_subtiles = (
            geometry.expanded_shape.0 / st_t,
            geometry.expanded_shape.1 / st_f,
        );

        let antennas: IndexSet<Antenna> = antennas.iter().cloned().collect();
        let mut touches = vec![vec![]; antennas.len()];
        let mut solvable_kept = vec![];
        for baseline in solvable {
            let (Some(p), Some(q)) = (
                antennas.get_index_of(baseline.p()),
                antennas.get_index_of(baseline.q()),
            ) else {
                continue;
            };
            if p == q {
                continue;
            }
            let i_bl = solvable_kept.len();
            solvable_kept.push(baseline.clone());
            touches[p].push(Touch {
                baseline: i_bl,
                other: q,
                is_p: true,
            });
            touches[q].push(Touch {
                baseline: i_bl,
                other: p,
                is_p: false,
            });
        }

        let active = active_elements(config.model, active_pols);
        let antenna_list: Vec<Antenna> = antennas.iter().cloned().collect();
        let mut gains = init.to_array(&antenna_list, num_subtiles, config.model, config.init_value);
        if !active[1] {
            // Leakage terms without parameters stay zero.
            gains.mapv_inplace(|j| Jones::diagonal(j[0], j[3]));
        }
        let kernel = config.smoothing.map(GaussianKernel::new);

        debug!(
            "Gain solver: {} antennas, {} solvable baselines, subtiling {:?}, {} x {} subtiles",
            antennas.len(),
            solvable_kept.len(),
            config.subtiling,
            num_subtiles.0,
            num_subtiles.1
        );

        SubtiledGainSolver {
            config,
            antennas,
            solvable: solvable_kept,
            touches,
            geometry,
            num_subtiles,
            kernel,
            unity: Array2::from_elem(num_subtiles, Jones::identity()),
            state: GainState::new(gains, active),
        }
    }

    pub fn state(&self) -> &GainState {
        &self.state
    }

    pub fn config(&self) -> &GainConfig {
        &self.config
    }

    pub fn geometry(&self) -> DomainGeometry {
        self.geometry
    }

    pub fn num_subtiles(&self) -> (usize, usize) {
        self.num_subtiles
    }

    pub fn antennas(&self) -> &IndexSet<Antenna> {
        &self.antennas
    }

    /// The baselines that take part in the least-squares fit.
    pub fn solvable(&self) -> &[Baseline] {
        &self.solvable
    }

    /// The number of converged parameters needed to meet the quota.
    pub fn convergence_target(&self) -> usize {
        let total = self.state.total_parms() as f64;
        // Guard against e.g. 0.9 * 10 = 9.000000000000002.
        (self.config.quota * total - 1e-9).ceil().max(0.0) as usize
    }

    /// Perform one least-squares sweep over all antennas. `data` and `model`
    /// must be on the expanded shape of the domain.
    pub fn iterate(&mut self, data: &VisMap, model: &VisMap, first_iteration: bool) -> IterationResult {
        let old = &self.state.gains;
        let mut new_gains = old.clone();
        let model_type = self.config.model;
        let active = self.state.active();
        let subtiling = self.config.subtiling;
        let num_subtiles = self.num_subtiles;
        let solvable = &self.solvable;

        new_gains
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(self.touches.par_iter())
            .for_each(|(mut gains_a, touches)| {
                let mut top = Array2::<Jones>::zeros(num_subtiles);
                let mut bot = Array2::<Jones>::zeros(num_subtiles);

                for touch in touches {
                    let baseline = &solvable[touch.baseline];
                    let (Some(d), Some(m)) = (data.get(baseline), model.get(baseline)) else {
                        continue;
                    };
                    let Some(shape) = d.shape() else {
                        continue;
                    };
                    let (d_mask, m_mask) = lsq_masks(d, m, model_type);
                    let g_other = old.index_axis(Axis(0), touch.other);

                    for t in 0..shape.0 {
                        let s_t = t / subtiling.0;
                        for f in 0..shape.1 {
                            let s = (s_t, f / subtiling.1);
                            let d = masked_jones(d, d_mask, t, f);
                            let m = masked_jones(m, m_mask, t, f);
                            let g = g_other[s];
                            let (top_s, bot_s) = (&mut top[s], &mut bot[s]);
                            if touch.is_p {
                                // For antenna p, ( D G M^H ) / ( (G M^H)^H (G M^H) )
                                let z = g.mul_hermitian(&m);
                                *top_s += d * z;
                                *bot_s += z.h() * z;
                            } else {
                                // For antenna q, ( D^H G M ) / ( (G M)^H (G M) )
                                let z = g * m;
                                *top_s += d.h() * z;
                                *bot_s += z.h() * z;
                            }
                        }
                    }
                }

                for ((g, top), bot) in gains_a.iter_mut().zip(top.iter()).zip(bot.iter()) {
                    solve_subtile(g, top, bot, model_type, active);
                }
            });

        if !first_iteration {
            new_gains.zip_mut_with(old, |new, old| *new = (*new + *old) * 0.5);
        }
        if let Some(kernel) = &self.kernel {
            for gains_a in new_gains.outer_iter_mut() {
                kernel.smooth(gains_a);
            }
        }

        self.state.update(new_gains, self.config.epsilon);
        let target = self.convergence_target();
        let num_converged = self.state.num_converged();
        let converged = num_converged >= target;
        trace!(
            "Sweep: {num_converged}/{} parameters converged (target {target}), max delta {:e}",
            self.state.total_parms(),
            self.state.delta_max()
        );

        IterationResult {
            converged,
            num_converged,
            max_delta: self.state.delta_max(),
            deltas: self.state.deltas().to_owned(),
        }
    }

    /// `D - G_p M G_q^H` for one baseline. A plane is null exactly where the
    /// data plane is null; null model planes count as zero.
    pub fn residual(&self, data: &Planes, model: &Planes, baseline: &Baseline) -> Planes {
        let mask = non_null(data);
        self.map_baseline(data, baseline, mask, |gp, gq, t, f| {
            data.jones_at(t, f) - Jones::sandwich(gp, &model.jones_at(t, f), gq)
        })
    }

    /// `G_p^-1 D G_q^-H - M` for one baseline: the residual in the frame of the
    /// model. A plane is null exactly where the data plane is null.
    pub fn corrected_residual(&self, data: &Planes, model: &Planes, baseline: &Baseline) -> Planes {
        let mask = non_null(data);
        self.map_baseline(data, baseline, mask, |gp, gq, t, f| {
            Jones::sandwich(&gp.inv(), &data.jones_at(t, f), &gq.inv()) - model.jones_at(t, f)
        })
    }

    /// Correct data: `G_p^-1 D G_q^-H`.
    pub fn apply(&self, data: &Planes, baseline: &Baseline) -> Planes {
        let mask = non_null(data);
        self.map_baseline(data, baseline, mask, |gp, gq, t, f| {
            Jones::sandwich(&gp.inv(), &data.jones_at(t, f), &gq.inv())
        })
    }

    /// Corrupt a model: `G_p M G_q^H`.
    pub fn apply_inverse(&self, model: &Planes, baseline: &Baseline) -> Planes {
        let mask = non_null(model);
        self.map_baseline(model, baseline, mask, |gp, gq, t, f| {
            Jones::sandwich(gp, &model.jones_at(t, f), gq)
        })
    }

    /// The gains of the last time subtile holding real (unpadded) data, for
    /// seeding the next domain.
    pub fn get_last_timeslot(&self) -> InitialGains {
        let last = self.geometry.data_shape.0.saturating_sub(1) / self.config.subtiling.0;
        InitialGains::PerAntenna(
            self.antennas
                .iter()
                .zip(self.state.gains.outer_iter())
                .map(|(antenna, gains)| (antenna.clone(), gains.row(last).to_owned()))
                .collect(),
        )
    }

    /// The gains of every antenna broadcast to the (unpadded) data resolution.
    pub fn get_2x2_gains(&self) -> IndexMap<Antenna, Array2<Jones>> {
        let (st_t, st_f) = self.config.subtiling;
        self.antennas
            .iter()
            .zip(self.state.gains.outer_iter())
            .map(|(antenna, gains)| {
                let full = Array2::from_shape_fn(self.geometry.data_shape, |(t, f)| {
                    gains[(t / st_t, f / st_f)]
                });
                (antenna.clone(), full)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn gains_mut(&mut self) -> ArrayViewMut3<Jones> {
        self.state.gains.view_mut()
    }

    fn antenna_gains(&self, antenna: &str) -> ArrayView2<Jones> {
        match self.antennas.get_index_of(antenna) {
            Some(i) => self.state.gains.index_axis(Axis(0), i),
            None => self.unity.view(),
        }
    }

    /// Evaluate `op(G_p, G_q, t, f)` at every sample of a baseline, keeping the
    /// elements where `mask` is set.
    fn map_baseline<F>(&self, planes: &Planes, baseline: &Baseline, mask: [bool; 4], op: F) -> Planes
    where
        F: Fn(&Jones, &Jones, usize, usize) -> Jones,
    {
        let Some(shape) = planes.shape() else {
            return Planes::null();
        };
        let (st_t, st_f) = self.config.subtiling;
        let gp = self.antenna_gains(baseline.p());
        let gq = self.antenna_gains(baseline.q());

        let mut out = Planes(mask.map(|m| m.then(|| Array2::zeros(shape))));
        for t in 0..shape.0 {
            for f in 0..shape.1 {
                let s = (t / st_t, f / st_f);
                let j = op(&gp[s], &gq[s], t, f);
                for (plane, v) in out.0.iter_mut().zip(j.iter()) {
                    if let Some(plane) = plane {
                        plane[(t, f)] = *v;
                    }
                }
            }
        }
        out
    }
}

fn non_null(planes: &Planes) -> [bool; 4] {
    [0, 1, 2, 3].map(|i| !planes.is_null(i))
}

/// Which data and model elements take part in the fit. A correlation without
/// data never contributes. In the diagonal model a correlation without a model
/// is skipped too; with full polarisation it is treated as a zero model.
fn lsq_masks(data: &Planes, model: &Planes, model_type: GainModel) -> ([bool; 4], [bool; 4]) {
    let mut d_mask = [false; 4];
    let mut m_mask = [false; 4];
    for i in 0..4 {
        let both = !data.is_null(i) && !model.is_null(i);
        m_mask[i] = both;
        d_mask[i] = match model_type {
            GainModel::Diagonal => both,
            GainModel::FullPolarisation => !data.is_null(i),
        };
    }
    (d_mask, m_mask)
}

#[inline(always)]
fn masked_jones(planes: &Planes, mask: [bool; 4], t: usize, f: usize) -> Jones {
    let mut j = Jones::zero();
    for ((elem, plane), &keep) in j.iter_mut().zip(planes.0.iter()).zip(mask.iter()) {
        if let (true, Some(plane)) = (keep, plane) {
            *elem = plane[(t, f)];
        }
    }
    j
}

/// Turn the accumulated sums for one subtile into a new gain. Parameters that
/// can't be determined (a zero denominator or a singular matrix) keep their
/// previous value.
///
/// The full 2x2 solve needs both polarisations. With only one of them active,
/// `bot` is singular, and the active diagonal element is solved on its own
/// like a diagonal gain.
fn solve_subtile(g: &mut Jones, top: &Jones, bot: &Jones, model: GainModel, active: [bool; 4]) {
    if model == GainModel::FullPolarisation && active == [true; 4] {
        let new = *top * bot.inv();
        if !new.any_nan() {
            *g = new;
        }
        return;
    }

    for i in [0, 3] {
        if !active[i] || bot[i].norm() == 0.0 {
            continue;
        }
        let new = top[i] / bot[i];
        if new.re.is_finite() && new.im.is_finite() {
            g[i] = new;
        }
    }
}
