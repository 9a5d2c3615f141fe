// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all stefcal-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::{calibrate::CalibrateArgsError, simulate::SimulateArgsError};
use crate::{calibrate::CalibrateError, io::DomainFileError, params::ParamsError};

/// The *only* publicly visible error from stefcal.
#[derive(Error, Debug)]
pub enum StefcalError {
    /// An error related to calibration.
    #[error("{0}")]
    Calibrate(String),

    /// An error related to calibration parameters.
    #[error("{0}\n\nSee the output of `stefcal calibrate --help` for the allowed values.")]
    Params(String),

    /// An error related to simulating.
    #[error("{0}")]
    Simulate(String),

    /// An error related to reading or writing domain files.
    #[error("{0}")]
    DomainFile(String),

    /// An error related to argument files.
    #[error("{0}")]
    ArgFile(String),

    /// A generic error that can't be clarified further, e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<CalibrateArgsError> for StefcalError {
    fn from(e: CalibrateArgsError) -> Self {
        match e {
            CalibrateArgsError::CorrNames(_) => Self::Params(e.to_string()),
        }
    }
}

impl From<SimulateArgsError> for StefcalError {
    fn from(e: SimulateArgsError) -> Self {
        Self::Simulate(e.to_string())
    }
}

impl From<CalibrateError> for StefcalError {
    fn from(e: CalibrateError) -> Self {
        match e {
            CalibrateError::Params(e) => Self::from(e),
            CalibrateError::ShapeMismatch { .. }
            | CalibrateError::NoData
            | CalibrateError::UnknownBaseline(_)
            | CalibrateError::UnknownSolvableBaseline(_) => Self::Calibrate(e.to_string()),
        }
    }
}

impl From<ParamsError> for StefcalError {
    fn from(e: ParamsError) -> Self {
        Self::Params(e.to_string())
    }
}

impl From<DomainFileError> for StefcalError {
    fn from(e: DomainFileError) -> Self {
        Self::DomainFile(e.to_string())
    }
}

impl From<std::io::Error> for StefcalError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
