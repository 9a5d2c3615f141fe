// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gaussian smoothing of gains across the subtile grid.

use ndarray::prelude::*;

use crate::Jones;

/// A separable Gaussian kernel. The widths are standard deviations in units of
/// subtiles along (time, frequency); the kernel is truncated at 3 sigma.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    time: Vec<f64>,
    freq: Vec<f64>,
}

impl GaussianKernel {
    pub fn new(sigmas: [f64; 2]) -> GaussianKernel {
        GaussianKernel {
            time: weights_1d(sigmas[0]),
            freq: weights_1d(sigmas[1]),
        }
    }

    /// Smooth a (time subtile, frequency subtile) grid of gains in place. Near
    /// the edges of the grid the kernel is renormalised over the samples that
    /// exist.
    pub fn smooth(&self, mut grid: ArrayViewMut2<Jones>) {
        for lane in grid.lanes_mut(Axis(0)) {
            convolve(lane, &self.time);
        }
        for lane in grid.lanes_mut(Axis(1)) {
            convolve(lane, &self.freq);
        }
    }
}

fn weights_1d(sigma: f64) -> Vec<f64> {
    let half_width = (3.0 * sigma).ceil() as isize;
    (-half_width..=half_width)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect()
}

fn convolve(mut lane: ArrayViewMut1<Jones>, weights: &[f64]) {
    let n = lane.len() as isize;
    let half_width = (weights.len() / 2) as isize;
    if n < 2 || half_width == 0 {
        return;
    }
    let input = lane.to_owned();
    for (i, out) in lane.iter_mut().enumerate() {
        let mut sum = Jones::zero();
        let mut norm = 0.0;
        for (k, &w) in weights.iter().enumerate() {
            let j = i as isize + k as isize - half_width;
            if (0..n).contains(&j) {
                sum += input[j as usize] * w;
                norm += w;
            }
        }
        *out = sum * (1.0 / norm);
    }
}
