// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

These are the defaults of calibration parameters that aren't given by the user.
 */

pub const DEFAULT_EPSILON: f64 = 1e-5;
pub const DEFAULT_DIFFGAIN_EPSILON: f64 = 1e-5;

/// The maximum number of sweeps in the first major cycle.
pub const DEFAULT_MAX_ITER: usize = 50;

/// The maximum number of sweeps in later major cycles, where the gains are
/// already close.
pub const DEFAULT_MAX_ITER1: usize = 10;

pub const DEFAULT_DIFFGAIN_MAX_ITER: usize = 5;
pub const DEFAULT_MAX_MAJOR: usize = 10;
pub const DEFAULT_CONVERGENCE_QUOTA: f64 = 0.9;
pub const DEFAULT_GAIN_SUBTILING: [usize; 2] = [1, 1];
pub const DEFAULT_INIT_VALUE: f64 = 1.0;
pub const DEFAULT_IFR_GAIN_TABLE: &str = "ifrgains.json";
pub const DEFAULT_CORR_NAMES: [&str; 2] = ["x", "y"];

/// Log the chi-square at least this often (in sweeps) while solving.
pub(crate) const CHISQ_LOG_INTERVAL: usize = 100;
