// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Noise estimates of visibilities, for diagnostics.

use indexmap::IndexMap;
use log::{debug, info, log_enabled, Level::Debug};
use ndarray::prelude::*;

use crate::{
    c64,
    math::{rms, std_dev},
    vis::{Antenna, Baseline, Correlation, VisMap},
};

/// Noise estimates per correlation of a baseline. Null planes have none.
pub(crate) type BaselineNoise = [Option<f64>; 4];

/// Estimate the noise of a plane from the scatter of differences between
/// adjacent timesteps: the mean of the standard deviations of the real and
/// imaginary parts. Non-finite differences are ignored. Returns `None` if
/// there is nothing to difference.
pub(crate) fn noise_estimate(plane: ArrayView2<c64>) -> Option<f64> {
    if plane.len_of(Axis(0)) < 2 {
        return None;
    }
    let diffs = &plane.slice(s![1.., ..]) - &plane.slice(s![..-1, ..]);
    let (re, im): (Vec<f64>, Vec<f64>) = diffs
        .iter()
        .filter(|d| d.re.is_finite() && d.im.is_finite())
        .map(|d| (d.re, d.im))
        .unzip();
    if re.is_empty() {
        return None;
    }
    Some((std_dev(&re) + std_dev(&im)) / 2.0)
}

pub(crate) fn baseline_noise(vis: &VisMap) -> IndexMap<Baseline, BaselineNoise> {
    vis.iter()
        .map(|(baseline, planes)| {
            let mut noise = [None; 4];
            for (n, plane) in noise.iter_mut().zip(planes.iter()) {
                *n = plane.and_then(|p| noise_estimate(p.view()));
            }
            (baseline.clone(), noise)
        })
        .collect()
}

/// Combine per-baseline noise into per-antenna and overall RMS values.
/// Zero estimates are left out.
pub(crate) fn summarise(
    noise: &IndexMap<Baseline, BaselineNoise>,
) -> (IndexMap<Antenna, f64>, f64) {
    let mut all = vec![];
    let mut per_antenna: IndexMap<Antenna, Vec<f64>> = IndexMap::new();
    for (baseline, n) in noise {
        let values: Vec<f64> = n.iter().flatten().copied().filter(|&v| v != 0.0).collect();
        all.extend_from_slice(&values);
        for antenna in [baseline.p(), baseline.q()] {
            per_antenna
                .entry(antenna.to_string())
                .or_default()
                .extend_from_slice(&values);
        }
    }
    let per_antenna = per_antenna
        .into_iter()
        .map(|(antenna, values)| (antenna, rms(values)))
        .collect();
    (per_antenna, rms(all))
}

/// Log noise estimates of some visibilities.
pub(crate) fn print_variance(label: &str, vis: &VisMap, corr_names: &[String; 2]) {
    let noise = baseline_noise(vis);
    if log_enabled!(Debug) {
        for (baseline, n) in &noise {
            let per_corr = Correlation::ALL
                .iter()
                .zip(n)
                .filter_map(|(corr, n)| n.map(|n| format!("{}={n:.4e}", corr.label(corr_names))))
                .collect::<Vec<_>>()
                .join(" ");
            debug!("{label} noise on {baseline}: {per_corr}");
        }
    }
    let (per_antenna, overall) = summarise(&noise);
    for (antenna, n) in &per_antenna {
        info!("{label} noise on antenna {antenna}: {n:.4e}");
    }
    info!("{label} overall noise: {overall:.4e}");
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::vis::Planes;

    #[test]
    fn test_constant_plane_has_no_noise() {
        let plane = Array2::from_elem((4, 3), c64::new(2.0, -1.0));
        assert_abs_diff_eq!(noise_estimate(plane.view()).unwrap(), 0.0);

        // One timestep can't be differenced.
        let plane = Array2::from_elem((1, 3), c64::new(2.0, -1.0));
        assert!(noise_estimate(plane.view()).is_none());
    }

    #[test]
    fn test_noise_from_alternating_steps() {
        // Differences along time alternate between +1 and -1 in the real part
        // and are zero in the imaginary part.
        let plane = Array2::from_shape_fn((5, 2), |(t, _)| c64::new((t % 2) as f64, 3.0));
        assert_abs_diff_eq!(noise_estimate(plane.view()).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_summary_skips_null_planes_and_zeros() {
        let noisy = Array2::from_shape_fn((5, 2), |(t, _)| c64::new((t % 2) as f64, 0.0));
        let quiet = Array2::from_elem((5, 2), c64::new(1.0, 0.0));
        let mut vis = VisMap::new();
        vis.insert(
            Baseline::new("a", "b"),
            Planes::diagonal(noisy.clone(), quiet.clone()),
        );
        vis.insert(Baseline::new("b", "c"), Planes::diagonal(quiet, noisy));

        let noise = baseline_noise(&vis);
        assert_eq!(noise[&Baseline::new("a", "b")][1], None);
        let (per_antenna, overall) = summarise(&noise);
        assert_abs_diff_eq!(overall, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(per_antenna["b"], 0.5, epsilon = 1e-12);
        assert_eq!(per_antenna.len(), 3);
    }
}
