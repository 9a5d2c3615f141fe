// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration parameters.
//!
//! The code here is kind of "mirroring" the code within the `cli` module; the
//! idea is that `cli` is unparsed, user-facing code, whereas parameters have
//! been validated and are ready to be used directly.


use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    c64,
    constants::*,
    gains::{GainConfig, GainModel, InitialGains},
    vis::resolve_subtiling,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamsError {
    #[error("{what} must have 2 elements (time, frequency), but it has {got}")]
    SubtilingDimensions { what: &'static str, got: usize },

    #[error("{what} must be positive in every dimension, but got {got:?}")]
    InvalidSubtiling { what: &'static str, got: Vec<usize> },

    #[error("{what} must be 2 positive widths (time, frequency), but got {got:?}")]
    InvalidSmoothing { what: &'static str, got: Vec<f64> },

    #[error("The convergence quota must be in (0, 1], but got {0}")]
    InvalidQuota(f64),

    #[error("{what} must be positive, but got {got}")]
    InvalidEpsilon { what: &'static str, got: f64 },

    #[error("{0} must be at least 1")]
    ZeroIterations(&'static str),
}

/// Everything that controls a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StefCalParams {
    /// Gain parameters whose updates are smaller than this are converged.
    pub epsilon: f64,

    /// As `epsilon`, but for direction-dependent gains.
    pub diffgain_epsilon: f64,

    /// The maximum number of sweeps in the first major cycle.
    pub max_iter: usize,

    /// The maximum number of sweeps in every later major cycle.
    pub max_iter1: usize,

    /// The maximum number of sweeps per direction-dependent solve.
    pub diffgain_max_iter: usize,

    /// The maximum number of major cycles.
    pub max_major: usize,

    /// The fraction of parameters that must converge.
    pub convergence_quota: f64,

    /// The (time, frequency) size of a gain subtile.
    pub gain_subtiling: Vec<usize>,

    /// The (time, frequency) size of a direction-dependent gain subtile. If
    /// not given, one gain is solved over the whole domain.
    pub diffgain_subtiling: Option<Vec<usize>>,

    /// Gaussian smoothing widths, in subtiles, of the gains.
    pub gain_smoothing: Option<Vec<f64>>,

    /// Gaussian smoothing widths, in subtiles, of the direction-dependent gains.
    pub diffgain_smoothing: Option<Vec<f64>>,

    /// Start each domain from the previous domain's solution.
    pub init_from_previous: bool,

    /// The starting value of every gain when there is nothing better.
    pub init_value: f64,

    /// Output residuals rather than data.
    pub residuals: bool,

    /// Correct the output with the solved gains.
    pub correct: bool,

    pub solve_ifr_gains: bool,
    pub apply_ifr_gains: bool,
    pub ifr_gain_table: PathBuf,

    /// Solve for full 2x2 Jones matrices rather than diagonal gains.
    pub full_polarization: bool,

    /// Log noise estimates of the input and output.
    pub print_variance: bool,

    /// Return the solved gains with each domain's output.
    pub visualize_gains: bool,

    /// Return the solved direction-dependent gains with each domain's output.
    pub visualize_diffgains: bool,

    /// Average returned gains over frequency.
    pub freq_average: bool,

    /// The names of the two polarisations, used for labels.
    pub corr_names: [String; 2],
}

impl Default for StefCalParams {
    fn default() -> Self {
        StefCalParams {
            epsilon: DEFAULT_EPSILON,
            diffgain_epsilon: DEFAULT_DIFFGAIN_EPSILON,
            max_iter: DEFAULT_MAX_ITER,
            max_iter1: DEFAULT_MAX_ITER1,
            diffgain_max_iter: DEFAULT_DIFFGAIN_MAX_ITER,
            max_major: DEFAULT_MAX_MAJOR,
            convergence_quota: DEFAULT_CONVERGENCE_QUOTA,
            gain_subtiling: DEFAULT_GAIN_SUBTILING.to_vec(),
            diffgain_subtiling: None,
            gain_smoothing: None,
            diffgain_smoothing: None,
            init_from_previous: true,
            init_value: DEFAULT_INIT_VALUE,
            residuals: true,
            correct: true,
            solve_ifr_gains: true,
            apply_ifr_gains: true,
            ifr_gain_table: PathBuf::from(DEFAULT_IFR_GAIN_TABLE),
            full_polarization: false,
            print_variance: false,
            visualize_gains: false,
            visualize_diffgains: false,
            freq_average: false,
            corr_names: DEFAULT_CORR_NAMES.map(String::from),
        }
    }
}

impl StefCalParams {
    /// Check that the parameters make sense.
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_subtiling("gain_subtiling", Some(&self.gain_subtiling))?;
        check_subtiling("diffgain_subtiling", self.diffgain_subtiling.as_deref())?;
        check_smoothing("gain_smoothing", self.gain_smoothing.as_deref())?;
        check_smoothing("diffgain_smoothing", self.diffgain_smoothing.as_deref())?;

        if !(self.convergence_quota > 0.0 && self.convergence_quota <= 1.0) {
            return Err(ParamsError::InvalidQuota(self.convergence_quota));
        }
        for (what, got) in [
            ("epsilon", self.epsilon),
            ("diffgain_epsilon", self.diffgain_epsilon),
        ] {
            if !(got > 0.0 && got.is_finite()) {
                return Err(ParamsError::InvalidEpsilon { what, got });
            }
        }
        for (what, got) in [
            ("max_iter", self.max_iter),
            ("max_iter1", self.max_iter1),
            ("diffgain_max_iter", self.diffgain_max_iter),
        ] {
            if got == 0 {
                return Err(ParamsError::ZeroIterations(what));
            }
        }
        Ok(())
    }

    pub fn gain_model(&self) -> GainModel {
        if self.full_polarization {
            GainModel::FullPolarisation
        } else {
            GainModel::Diagonal
        }
    }

    /// The direction-independent solver's settings for data of this shape.
    pub fn gain_config(&self, data_shape: (usize, usize)) -> GainConfig {
        GainConfig {
            model: self.gain_model(),
            subtiling: resolve_subtiling(Some(&self.gain_subtiling), data_shape),
            epsilon: self.epsilon,
            quota: self.convergence_quota,
            smoothing: smoothing_widths(self.gain_smoothing.as_deref()),
            init_value: c64::new(self.init_value, 0.0),
        }
    }

    /// The direction-dependent solvers' settings for data of this shape.
    pub fn diffgain_config(&self, data_shape: (usize, usize)) -> GainConfig {
        GainConfig {
            model: self.gain_model(),
            subtiling: resolve_subtiling(self.diffgain_subtiling.as_deref(), data_shape),
            epsilon: self.diffgain_epsilon,
            quota: self.convergence_quota,
            smoothing: smoothing_widths(self.diffgain_smoothing.as_deref()),
            init_value: c64::new(self.init_value, 0.0),
        }
    }

    pub fn init_gains(&self) -> InitialGains {
        InitialGains::Constant(c64::new(self.init_value, 0.0))
    }
}

fn check_subtiling(what: &'static str, subtiling: Option<&[usize]>) -> Result<(), ParamsError> {
    let Some(subtiling) = subtiling else {
        return Ok(());
    };
    if subtiling.len() != 2 {
        return Err(ParamsError::SubtilingDimensions {
            what,
            got: subtiling.len(),
        });
    }
    if subtiling.contains(&0) {
        return Err(ParamsError::InvalidSubtiling {
            what,
            got: subtiling.to_vec(),
        });
    }
    Ok(())
}

fn check_smoothing(what: &'static str, smoothing: Option<&[f64]>) -> Result<(), ParamsError> {
    match smoothing {
        None => Ok(()),
        Some(s) if s.len() == 2 && s.iter().all(|&w| w > 0.0 && w.is_finite()) => Ok(()),
        Some(s) => Err(ParamsError::InvalidSmoothing {
            what,
            got: s.to_vec(),
        }),
    }
}

fn smoothing_widths(smoothing: Option<&[f64]>) -> Option<[f64; 2]> {
    match smoothing {
        Some(&[t, f]) => Some([t, f]),
        _ => None,
    }
}
