// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-baseline visibility planes.
//!
//! Every baseline carries four correlation planes (xx, xy, yx, yy), each a
//! (time, frequency) array. A plane may be absent ("null"); unpolarised or
//! flagged-out correlations are represented this way rather than with zeros,
//! and null planes are skipped by all arithmetic.

mod geometry;

pub use geometry::{resolve_subtiling, DomainGeometry};

use std::str::FromStr;

use indexmap::IndexMap;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use thiserror::Error;

use crate::{c64, Jones};

/// An opaque antenna identifier.
pub type Antenna = String;

/// A mapping from baseline to its four correlation planes.
pub type VisMap = IndexMap<Baseline, Planes>;

/// An ordered pair of antennas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Baseline(pub Antenna, pub Antenna);

impl Baseline {
    pub fn new<P: Into<Antenna>, Q: Into<Antenna>>(p: P, q: Q) -> Baseline {
        Baseline(p.into(), q.into())
    }

    pub fn p(&self) -> &str {
        &self.0
    }

    pub fn q(&self) -> &str {
        &self.1
    }
}

impl std::fmt::Display for Baseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

#[derive(Error, Debug)]
#[error("Couldn't parse '{0}' as a baseline; expected the form 'p:q'")]
pub struct BaselineParseError(String);

impl FromStr for Baseline {
    type Err = BaselineParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((p, q)) if !p.is_empty() && !q.is_empty() && !q.contains(':') => {
                Ok(Baseline::new(p, q))
            }
            _ => Err(BaselineParseError(s.to_string())),
        }
    }
}

/// One of the four polarisation products.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correlation {
    #[strum(serialize = "xx")]
    XX,
    #[strum(serialize = "xy")]
    XY,
    #[strum(serialize = "yx")]
    YX,
    #[strum(serialize = "yy")]
    YY,
}

impl Correlation {
    pub const ALL: [Correlation; 4] = [
        Correlation::XX,
        Correlation::XY,
        Correlation::YX,
        Correlation::YY,
    ];

    /// The index of this correlation into a [`Planes`] or [`Jones`].
    pub fn index(self) -> usize {
        match self {
            Correlation::XX => 0,
            Correlation::XY => 1,
            Correlation::YX => 2,
            Correlation::YY => 3,
        }
    }

    /// The polarisation indices (i, j) of the two antennas involved.
    pub fn pols(self) -> (usize, usize) {
        let i = self.index();
        (i / 2, i % 2)
    }

    /// Get a name like "xy" given the names of the two polarisations.
    pub fn label(self, corr_names: &[String; 2]) -> String {
        let (i, j) = self.pols();
        format!("{}{}", corr_names[i], corr_names[j])
    }
}

/// The four correlation planes of a single baseline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Planes(pub [Option<Array2<c64>>; 4]);

impl Planes {
    /// All planes null.
    pub fn null() -> Planes {
        Planes::default()
    }

    pub fn new(
        xx: Option<Array2<c64>>,
        xy: Option<Array2<c64>>,
        yx: Option<Array2<c64>>,
        yy: Option<Array2<c64>>,
    ) -> Planes {
        Planes([xx, xy, yx, yy])
    }

    /// Only the parallel-hand planes are present.
    pub fn diagonal(xx: Array2<c64>, yy: Array2<c64>) -> Planes {
        Planes([Some(xx), None, None, Some(yy)])
    }

    pub fn get(&self, corr: Correlation) -> Option<&Array2<c64>> {
        self.0[corr.index()].as_ref()
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.0[i].is_none()
    }

    pub fn all_null(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// The shape of the first non-null plane.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.0.iter().flatten().next().map(|p| p.dim())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&Array2<c64>>> {
        self.0.iter().map(Option::as_ref)
    }

    /// Form the Jones matrix of a single sample. Null planes contribute zeros.
    #[inline]
    pub fn jones_at(&self, t: usize, f: usize) -> Jones {
        let mut j = Jones::zero();
        for (elem, plane) in j.iter_mut().zip(self.0.iter()) {
            if let Some(plane) = plane {
                *elem = plane[(t, f)];
            }
        }
        j
    }

    /// Add another set of planes into these ones. A null plane counts as zero;
    /// the result is null only if both sides are null.
    pub fn add_assign(&mut self, other: &Planes) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            match (mine.as_mut(), theirs) {
                (_, None) => (),
                (Some(m), Some(t)) => *m += t,
                (None, Some(t)) => *mine = Some(t.clone()),
            }
        }
    }

    /// Subtract another set of planes from these ones. A null plane counts as
    /// zero; the result is null only if both sides are null.
    pub fn sub_assign(&mut self, other: &Planes) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            match (mine.as_mut(), theirs) {
                (_, None) => (),
                (Some(m), Some(t)) => *m -= t,
                (None, Some(t)) => *mine = Some(t.mapv(|v| -v)),
            }
        }
    }

    /// Multiply each non-null plane by a per-correlation factor.
    pub fn scale(&mut self, factors: &[c64; 4]) {
        for (plane, &factor) in self.0.iter_mut().zip(factors.iter()) {
            if let Some(plane) = plane {
                plane.mapv_inplace(|v| v * factor);
            }
        }
    }

    /// Zero the flagged samples of all non-null planes.
    pub fn apply_flags(&mut self, flags: ArrayView2<bool>) {
        for plane in self.0.iter_mut().flatten() {
            plane.zip_mut_with(&flags, |v, &flagged| {
                if flagged {
                    *v = c64::new(0.0, 0.0);
                }
            });
        }
    }

    /// Null out planes wherever `mask` is null.
    pub fn null_where(&mut self, mask: &Planes) {
        for (plane, m) in self.0.iter_mut().zip(mask.0.iter()) {
            if m.is_none() {
                *plane = None;
            }
        }
    }

    /// The largest absolute value over all non-null planes.
    pub fn max_abs(&self) -> f64 {
        self.0
            .iter()
            .flatten()
            .flat_map(|p| p.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.norm()))
    }
}
