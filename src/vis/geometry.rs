// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The shape of a data domain, and how it is padded so that subtiles divide
//! it exactly.

use ndarray::prelude::*;

use super::Planes;
use crate::{
    c64,
    math::{lcm, next_multiple},
};

/// The (time, frequency) shape of a data domain before and after padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainGeometry {
    /// The shape of the input data.
    pub data_shape: (usize, usize),

    /// The shape the data are zero-padded to; each dimension is a multiple of
    /// every subtiling used in the domain.
    pub expanded_shape: (usize, usize),
}

impl DomainGeometry {
    /// Work out the padded shape for the given subtilings. Each subtiling must
    /// already be clamped to the data shape (see [`resolve_subtiling`]).
    pub fn new(data_shape: (usize, usize), subtilings: &[(usize, usize)]) -> DomainGeometry {
        let lcm_subtiling = subtilings
            .iter()
            .fold((1, 1), |acc, st| (lcm(acc.0, st.0), lcm(acc.1, st.1)));
        DomainGeometry {
            data_shape,
            expanded_shape: (
                next_multiple(data_shape.0, lcm_subtiling.0),
                next_multiple(data_shape.1, lcm_subtiling.1),
            ),
        }
    }

    pub fn is_padded(&self) -> bool {
        self.data_shape != self.expanded_shape
    }

    /// Zero-pad a plane to the expanded shape.
    pub fn pad(&self, plane: Array2<c64>) -> Array2<c64> {
        if !self.is_padded() {
            return plane;
        }
        let mut out = Array2::zeros(self.expanded_shape);
        out.slice_mut(s![..self.data_shape.0, ..self.data_shape.1])
            .assign(&plane);
        out
    }

    /// Zero-pad a flag plane to the expanded shape. Padding is never flagged.
    pub fn pad_flags(&self, flags: ArrayView2<bool>) -> Array2<bool> {
        let mut out = Array2::from_elem(self.expanded_shape, false);
        out.slice_mut(s![..self.data_shape.0, ..self.data_shape.1])
            .assign(&flags);
        out
    }

    /// Discard the padded region of a plane.
    pub fn crop(&self, plane: Array2<c64>) -> Array2<c64> {
        if plane.dim() == self.data_shape {
            return plane;
        }
        plane
            .slice(s![..self.data_shape.0, ..self.data_shape.1])
            .to_owned()
    }

    pub fn crop_planes(&self, planes: Planes) -> Planes {
        Planes(planes.0.map(|p| p.map(|p| self.crop(p))))
    }
}

/// Turn a requested subtiling into one usable with the data. No request means
/// a single subtile over the whole domain, and a subtile larger than the data
/// collapses to the data's extent.
pub fn resolve_subtiling(
    requested: Option<&[usize]>,
    data_shape: (usize, usize),
) -> (usize, usize) {
    match requested {
        Some(&[t, f]) => (
            t.clamp(1, data_shape.0.max(1)),
            f.clamp(1, data_shape.1.max(1)),
        ),
        _ => data_shape,
    }
}
