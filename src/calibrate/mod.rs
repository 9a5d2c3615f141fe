// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration of one data domain at a time.
//!
//! The [`MajorCycleController`] alternates between solving the
//! direction-independent gains against the combined model and re-solving the
//! direction-dependent gains against what's left, then produces corrected or
//! residual visibilities. State carried between domains (starting gains and
//! the IFR gain sums) lives in the controller.

mod error;
mod variance;

pub use error::CalibrateError;

use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, log_enabled, trace, Level::Debug};
use ndarray::prelude::*;
use vec1::Vec1;

use crate::{
    constants::CHISQ_LOG_INTERVAL,
    diffgains::DiffGainManager,
    gains::{active_polarisations, GainModel, InitialGains, SubtiledGainSolver},
    ifr_gains::{BaselineGainEstimator, IfrGainStore, IfrGains},
    params::StefCalParams,
    vis::{resolve_subtiling, Antenna, Baseline, Correlation, DomainGeometry, Planes, VisMap},
    Jones,
};

/// The solved gains of a domain at data resolution, keyed by label ("G" for
/// the direction-independent gains, "dE:0", "dE:1", ... for the directions).
pub type GainImages = IndexMap<String, IndexMap<Antenna, Array2<Jones>>>;

/// One block of data to calibrate.
#[derive(Debug, Clone)]
pub struct Domain {
    /// Domains with a new dataset ID don't inherit anything from earlier
    /// domains.
    pub dataset_id: String,

    pub domain_index: usize,

    /// The index of the timestep after the end of this domain. When it reaches
    /// `num_time`, this is the last domain of the dataset.
    pub time1: usize,

    /// The number of timesteps in the dataset.
    pub num_time: usize,

    /// The data of every baseline.
    pub data: VisMap,

    /// Flagged samples (true) are zeroed in the data and all models.
    pub flags: IndexMap<Baseline, Array2<bool>>,

    /// The direction-independent model followed by each direction-dependent
    /// model. Baselines missing from a model have null model planes.
    pub models: Vec1<VisMap>,
}

impl Domain {
    pub fn is_last(&self) -> bool {
        self.time1 >= self.num_time
    }
}

/// The result of calibrating a domain.
#[derive(Debug, Clone)]
pub struct DomainOutput {
    /// Residuals or data (corrected or not), the same shape as the input.
    pub vis: VisMap,

    /// The largest absolute residual of any baseline.
    pub max_residual: f64,

    /// The chi-square of the last direction-independent solve.
    pub chisq: f64,

    /// The total number of direction-independent sweeps.
    pub num_iterations: usize,

    /// The number of major cycles performed.
    pub num_major: usize,

    /// Did the last direction-independent solve reach its convergence quota?
    pub converged: bool,

    /// The largest update in the last direction-independent sweep.
    pub last_delta: f64,

    /// Only populated when visualisation is requested.
    pub gains: GainImages,
}

pub struct MajorCycleController {
    params: StefCalParams,

    /// Every baseline that may have data.
    ifrs: IndexSet<Baseline>,

    /// The baselines used for solving.
    solvable: Vec<Baseline>,

    /// Derived from `ifrs`.
    antennas: Vec<Antenna>,

    dataset_id: Option<String>,

    /// Gains injected by the host for the next domain.
    seed: Option<InitialGains>,

    /// The last time subtile of the previous domain.
    previous: Option<InitialGains>,

    diffgains: DiffGainManager,
    ifr_gains: Option<BaselineGainEstimator>,
}

impl MajorCycleController {
    /// `solvable` is the subset of `ifrs` used for solving; `None` means all
    /// of them.
    pub fn new(
        params: StefCalParams,
        ifrs: Vec<Baseline>,
        solvable: Option<Vec<Baseline>>,
        ifr_gain_store: Box<dyn IfrGainStore>,
    ) -> Result<MajorCycleController, CalibrateError> {
        params.validate()?;
        let ifrs: IndexSet<Baseline> = ifrs.into_iter().collect();
        let solvable = match solvable {
            Some(solvable) => {
                for baseline in &solvable {
                    if !ifrs.contains(baseline) {
                        return Err(CalibrateError::UnknownSolvableBaseline(baseline.clone()));
                    }
                }
                solvable
            }
            None => ifrs.iter().cloned().collect(),
        };
        let antennas: IndexSet<Antenna> = ifrs
            .iter()
            .flat_map(|bl| [bl.0.clone(), bl.1.clone()])
            .collect();

        // The direction-dependent subtiling depends on the data shape, so it's
        // filled in for each domain.
        let diffgains = DiffGainManager::new(
            params.diffgain_config((1, 1)),
            params.diffgain_max_iter,
            params.init_from_previous,
            params.init_gains(),
        );
        let ifr_gains = (params.solve_ifr_gains || params.apply_ifr_gains)
            .then(|| BaselineGainEstimator::new(ifr_gain_store, params.apply_ifr_gains));

        Ok(MajorCycleController {
            params,
            ifrs,
            solvable,
            antennas: antennas.into_iter().collect(),
            dataset_id: None,
            seed: None,
            previous: None,
            diffgains,
            ifr_gains,
        })
    }

    pub fn params(&self) -> &StefCalParams {
        &self.params
    }

    pub fn antennas(&self) -> &[Antenna] {
        &self.antennas
    }

    /// Start the next domain from these gains rather than the previous
    /// domain's.
    pub fn seed_gains(&mut self, gains: InitialGains) {
        self.seed = Some(gains);
    }

    /// As [`MajorCycleController::seed_gains`], for a direction-dependent term.
    pub fn seed_diffgains(&mut self, direction: usize, gains: InitialGains) {
        self.diffgains.seed(direction, gains);
    }

    /// The IFR gains as they currently stand.
    pub fn ifr_gains(&self) -> Option<&IfrGains> {
        self.ifr_gains.as_ref().map(|e| e.gains())
    }

    /// Calibrate one domain.
    pub fn process(&mut self, domain: Domain) -> Result<DomainOutput, CalibrateError> {
        let start = Instant::now();
        let is_last = domain.is_last();
        let Domain {
            dataset_id,
            domain_index,
            mut data,
            flags,
            models,
            ..
        } = domain;

        if self.dataset_id.as_ref() != Some(&dataset_id) {
            info!("New dataset '{dataset_id}'");
            self.previous = None;
            self.diffgains.reset();
            if let Some(ifr_gains) = self.ifr_gains.as_mut() {
                ifr_gains.reset();
            }
            self.dataset_id = Some(dataset_id.clone());
        }

        let data_shape = self.check_shapes(&data, &flags, &models)?;
        let num_diffgains = models.len() - 1;
        let params = &self.params;
        let gain_config = params.gain_config(data_shape);
        let mut subtilings = vec![gain_config.subtiling];
        if num_diffgains > 0 {
            subtilings.push(resolve_subtiling(
                params.diffgain_subtiling.as_deref(),
                data_shape,
            ));
        }
        let geometry = DomainGeometry::new(data_shape, &subtilings);
        debug!(
            "Domain {domain_index}: data shape {data_shape:?}, subtilings {subtilings:?}, expanded shape {:?}",
            geometry.expanded_shape
        );

        if params.apply_ifr_gains {
            if let Some(ifr_gains) = self.ifr_gains.as_ref() {
                ifr_gains.apply(&mut data);
            }
        }
        if params.print_variance {
            variance::print_variance("Input", &data, &params.corr_names);
        }

        // Pad everything, null the models wherever the data are null, and zero
        // flagged samples.
        let mut models = models.into_vec();
        let mut padded_data = VisMap::with_capacity(data.len());
        for baseline in self.ifrs.iter() {
            let Some(d) = data.shift_remove(baseline) else {
                continue;
            };
            let mut d = pad_planes(&geometry, d);
            let flags = flags.get(baseline).map(|f| geometry.pad_flags(f.view()));
            if let Some(flags) = &flags {
                d.apply_flags(flags.view());
            }
            for model in models.iter_mut() {
                let m = model.shift_remove(baseline).unwrap_or_default();
                let mut m = pad_planes(&geometry, m);
                m.null_where(&d);
                if let Some(flags) = &flags {
                    m.apply_flags(flags.view());
                }
                model.insert(baseline.clone(), m);
            }
            // A diagonal model predicts nothing for a correlation that no
            // model set has, so such data are left out of the solve.
            if gain_config.model == GainModel::Diagonal {
                for (i, plane) in d.0.iter_mut().enumerate() {
                    if models.iter().all(|m| m[baseline].is_null(i)) {
                        *plane = None;
                    }
                }
            }
            padded_data.insert(baseline.clone(), d);
        }
        let data = padded_data;
        let baselines: Vec<Baseline> = data.keys().cloned().collect();
        let solvable: Vec<Baseline> = self
            .solvable
            .iter()
            .filter(|bl| data.contains_key(*bl))
            .cloned()
            .collect();
        let active_pols = active_polarisations(&data, &models, gain_config.model);

        let init = match self.seed.take() {
            Some(seed) => seed,
            None => match self.previous.take() {
                Some(previous) if params.init_from_previous => previous,
                _ => params.init_gains(),
            },
        };
        let mut gain = SubtiledGainSolver::new(
            gain_config,
            &self.antennas,
            &solvable,
            geometry,
            active_pols,
            &init,
        );
        debug!(
            "Solving with {} of {} interferometers; convergence target {} of {} parameters",
            solvable.len(),
            baselines.len(),
            gain.convergence_target(),
            gain.state().total_parms()
        );

        let model0 = models.remove(0);
        let dg_models = models;
        let mut combined = model0.clone();
        if num_diffgains > 0 {
            self.diffgains.set_config(params.diffgain_config(data_shape));
            self.diffgains
                .start_domain(&dg_models, &self.antennas, &solvable, geometry, active_pols);
            self.diffgains.add_contributions(&mut combined, &baselines);
            info!(
                "Also solving for {num_diffgains} direction-dependent gains with subtiling {:?}",
                subtilings[1]
            );
        }

        // The major loop alternates between the gains and the diffgains.
        let mut num_iterations = 0;
        let mut num_major = 0;
        let mut chisq = 0.0;
        let mut converged = false;
        for nmajor in 0..=params.max_major {
            num_major = nmajor + 1;
            let max_iter = if nmajor == 0 {
                params.max_iter
            } else {
                params.max_iter1
            };
            let mut max_deltas = Vec::with_capacity(max_iter);
            for niter in 0..max_iter {
                let result = gain.iterate(&data, &combined, niter == 0);
                num_iterations += 1;
                converged = result.converged;
                max_deltas.push(result.max_delta);
                if (niter > 0 && niter % CHISQ_LOG_INTERVAL == 0)
                    || niter + 1 >= max_iter
                    || result.converged
                {
                    chisq = compute_chisq(&gain, &data, &combined, &solvable);
                    trace!(
                        "Iteration {}: max gain update {:e}, {}/{} converged, chisq {chisq:e}",
                        niter + 1,
                        result.max_delta,
                        result.num_converged,
                        gain.state().total_parms()
                    );
                }
                if result.converged {
                    break;
                }
            }
            debug!(
                "Gains converged: {converged}, chisq {chisq:e} (last update {:e}) after {} iterations",
                gain.state().delta_max(),
                max_deltas.len()
            );
            if log_enabled!(Debug) {
                let deltas = max_deltas
                    .iter()
                    .map(|d| format!("{d:.2e}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                debug!("  convergence was {deltas}");
            }

            if num_diffgains == 0 || nmajor >= params.max_major {
                break;
            }
            // The gains were solved against M0 + sum of corrupted Mi; what the
            // corrected data don't explain is what the diffgains solve against.
            let mut residual: VisMap = solvable
                .iter()
                .map(|bl| {
                    let r = gain.corrected_residual(&data[bl], &combined[bl], bl);
                    (bl.clone(), r)
                })
                .collect();
            let summaries = self
                .diffgains
                .solve_pass(&mut residual, &mut combined, &dg_models);
            for (i, summary) in summaries.iter().enumerate() {
                trace!(
                    "Major cycle {num_major}: direction {i} took {} iterations (converged: {})",
                    summary.num_iterations,
                    summary.converged
                );
            }
        }

        // Only the solvable baselines have an up-to-date combined model; fill
        // in the rest.
        if num_diffgains > 0 {
            self.diffgains.refresh(&dg_models);
            let unsolved: Vec<&Baseline> = baselines
                .iter()
                .filter(|bl| !solvable.contains(*bl))
                .collect();
            for bl in &unsolved {
                combined.insert((*bl).clone(), model0[*bl].clone());
            }
            self.diffgains.add_contributions(&mut combined, unsolved);
        }

        let mut gain_images = GainImages::new();
        if params.visualize_gains {
            gain_images.insert(
                "G".to_string(),
                average_gains(gain.get_2x2_gains(), params.freq_average),
            );
        }
        if params.visualize_diffgains {
            for (i, images) in self.diffgains.get_2x2_gains().into_iter().enumerate() {
                gain_images.insert(format!("dE:{i}"), average_gains(images, params.freq_average));
            }
        }

        if params.init_from_previous {
            self.previous = Some(gain.get_last_timeslot());
            self.diffgains.finish_domain();
        }

        if params.solve_ifr_gains {
            if let Some(ifr_gains) = self.ifr_gains.as_mut() {
                let corrupted: VisMap = baselines
                    .iter()
                    .map(|bl| (bl.clone(), gain.apply_inverse(&combined[bl], bl)))
                    .collect();
                ifr_gains.accumulate(&data, &corrupted);
            }
        }

        let mut vis = VisMap::with_capacity(baselines.len());
        let mut max_residual: f64 = 0.0;
        for bl in &baselines {
            let d = &data[bl];
            let m = &combined[bl];
            let residual = gain.residual(d, m, bl);
            let out = match (params.residuals, params.correct) {
                (true, true) => gain.corrected_residual(d, m, bl),
                (true, false) => residual.clone(),
                (false, true) => gain.apply(d, bl),
                (false, false) => d.clone(),
            };
            max_residual = max_residual.max(geometry.crop_planes(residual).max_abs());
            vis.insert(bl.clone(), geometry.crop_planes(out));
        }
        if params.print_variance {
            variance::print_variance("Output", &vis, &params.corr_names);
        }

        if is_last && params.solve_ifr_gains {
            if let Some(ifr_gains) = self.ifr_gains.as_mut() {
                info!("Last domain of dataset '{dataset_id}'; updating IFR gains");
                ifr_gains.finalize();
            }
        }

        info!(
            "Domain {domain_index}: residual max {max_residual:e}, chisq {chisq:e} (last G update {:e}), {num_iterations} iterations, {num_major} major cycles, {:.2?}",
            gain.state().delta_max(),
            start.elapsed()
        );

        Ok(DomainOutput {
            vis,
            max_residual,
            chisq,
            num_iterations,
            num_major,
            converged,
            last_delta: gain.state().delta_max(),
            gains: gain_images,
        })
    }

    /// Check that all data, model and flag planes have the same shape, and
    /// return that shape.
    fn check_shapes(
        &self,
        data: &VisMap,
        flags: &IndexMap<Baseline, Array2<bool>>,
        models: &Vec1<VisMap>,
    ) -> Result<(usize, usize), CalibrateError> {
        for baseline in data.keys() {
            if !self.ifrs.contains(baseline) {
                return Err(CalibrateError::UnknownBaseline(baseline.clone()));
            }
        }
        let shape = data
            .values()
            .find_map(Planes::shape)
            .ok_or(CalibrateError::NoData)?;
        let corr_names = &self.params.corr_names;

        let check = |what: &'static str, baseline: &Baseline, planes: &Planes| {
            for corr in Correlation::ALL {
                if let Some(plane) = planes.get(corr) {
                    if plane.dim() != shape {
                        return Err(CalibrateError::ShapeMismatch {
                            what,
                            baseline: baseline.clone(),
                            corr: corr.label(corr_names),
                            expected: shape,
                            got: plane.dim(),
                        });
                    }
                }
            }
            Ok(())
        };
        for (baseline, planes) in data {
            check("data", baseline, planes)?;
        }
        for model in models {
            for (baseline, planes) in model {
                check("model", baseline, planes)?;
            }
        }
        for (baseline, f) in flags {
            if f.dim() != shape {
                return Err(CalibrateError::ShapeMismatch {
                    what: "flags",
                    baseline: baseline.clone(),
                    corr: "all".to_string(),
                    expected: shape,
                    got: f.dim(),
                });
            }
        }
        Ok(shape)
    }
}

fn pad_planes(geometry: &DomainGeometry, planes: Planes) -> Planes {
    Planes(planes.0.map(|p| p.map(|p| geometry.pad(p))))
}

/// The mean of |residual|^2 over the solvable baselines, within the unpadded
/// region of the domain.
fn compute_chisq(
    gain: &SubtiledGainSolver,
    data: &VisMap,
    model: &VisMap,
    solvable: &[Baseline],
) -> f64 {
    let geometry = gain.geometry();
    let (num_t, num_f) = geometry.data_shape;
    let mut sum = 0.0;
    let mut count = 0usize;
    for bl in solvable {
        let residual = gain.residual(&data[bl], &model[bl], bl);
        for plane in residual.0.iter().flatten() {
            let plane = plane.slice(s![..num_t, ..num_f]);
            sum += plane.iter().map(|r| r.norm_sqr()).sum::<f64>();
            count += plane.len();
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Optionally average gains over frequency.
fn average_gains(
    gains: IndexMap<Antenna, Array2<Jones>>,
    freq_average: bool,
) -> IndexMap<Antenna, Array2<Jones>> {
    if !freq_average {
        return gains;
    }
    gains
        .into_iter()
        .map(|(antenna, g)| {
            let num_freqs = g.len_of(Axis(1)).max(1) as f64;
            let averaged = g
                .outer_iter()
                .map(|row| row.iter().fold(Jones::zero(), |acc, j| acc + *j) * (1.0 / num_freqs))
                .collect::<Array1<Jones>>()
                .insert_axis(Axis(1));
            (antenna, averaged)
        })
        .collect()
}
