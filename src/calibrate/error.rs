// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that stop a domain from being calibrated.

use thiserror::Error;

use crate::{params::ParamsError, vis::Baseline};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrateError {
    #[error("{what} shape mismatch at {baseline}:{corr}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// "data", "model" or "flags".
        what: &'static str,
        baseline: Baseline,
        /// A correlation label like "xy".
        corr: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("The domain has no data")]
    NoData,

    #[error("Baseline {0} has data, but isn't in the list of interferometers")]
    UnknownBaseline(Baseline),

    #[error("Solvable baseline {0} isn't in the list of interferometers")]
    UnknownSolvableBaseline(Baseline),

    #[error(transparent)]
    Params(#[from] ParamsError),
}
