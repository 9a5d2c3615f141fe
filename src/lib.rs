// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Subtiled alternating least-squares (StefCal) gain calibration for radio
interferometers.

Per-antenna complex gains are solved over (time, frequency) subtiles of a
domain of visibilities, optionally alongside direction-dependent gains and
per-baseline (IFR) gain corrections.
 */

pub mod calibrate;
mod cli;
pub mod constants;
pub mod diffgains;
pub mod gains;
pub mod ifr_gains;
pub mod io;
mod jones;
pub(crate) mod math;
pub mod params;
pub mod simulate;
pub mod vis;

use crossbeam_utils::atomic::AtomicCell;

lazy_static::lazy_static! {
    /// Are progress bars being drawn? This should only ever be enabled by CLI
    /// code.
    static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}

// Re-exports.
pub use calibrate::{CalibrateError, Domain, DomainOutput, MajorCycleController};
pub use cli::{Stefcal, StefcalError};
pub use jones::Jones;
pub use params::StefCalParams;

#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex64;
