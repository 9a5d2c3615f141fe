// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deterministic synthetic visibilities with known antenna gains.
//!
//! Used to demonstrate the calibration and to check that planted gains are
//! recovered.

use std::f64::consts::TAU;

use indexmap::IndexMap;
use ndarray::prelude::*;

use crate::{
    c64,
    vis::{Antenna, Baseline, Planes, VisMap},
    Jones,
};

/// Antenna names "0", "1", ...
pub fn antenna_names(num_antennas: usize) -> Vec<Antenna> {
    (0..num_antennas).map(|i| i.to_string()).collect()
}

/// All cross-correlation baselines (p < q) of the given antennas.
pub fn cross_baselines(antennas: &[Antenna]) -> Vec<Baseline> {
    let mut baselines = vec![];
    for (i, p) in antennas.iter().enumerate() {
        for q in &antennas[i + 1..] {
            baselines.push(Baseline::new(p.as_str(), q.as_str()));
        }
    }
    baselines
}

/// A sky model whose visibilities vary smoothly with time and frequency and
/// differ from baseline to baseline. Without `full_polarisation`, only the xx
/// and yy planes are present. `scale` multiplies every visibility.
pub fn sky_model(
    baselines: &[Baseline],
    shape: (usize, usize),
    full_polarisation: bool,
    scale: f64,
) -> VisMap {
    baselines
        .iter()
        .enumerate()
        .map(|(i_bl, baseline)| {
            let b = i_bl as f64;
            let plane = |amp: f64, phase: f64, t_rate: f64, f_rate: f64| {
                Array2::from_shape_fn(shape, |(t, f)| {
                    c64::from_polar(
                        scale * amp,
                        phase + t_rate * t as f64 + f_rate * f as f64,
                    )
                })
            };
            let xx = plane(1.0 + 0.3 * b, 0.7 * b, 0.10, 0.05);
            let yy = plane(0.8 + 0.2 * b, -0.4 * b + 1.0, 0.07, -0.03);
            let planes = if full_polarisation {
                Planes::new(
                    Some(xx),
                    Some(plane(0.15 + 0.02 * b, 1.3 * b, 0.02, 0.01)),
                    Some(plane(0.12 + 0.03 * b, -0.9 * b + 0.5, -0.01, 0.02)),
                    Some(yy),
                )
            } else {
                Planes::diagonal(xx, yy)
            };
            (baseline.clone(), planes)
        })
        .collect()
}

/// Gains to plant into a simulation. Every antenna gets a different gain; the
/// off-diagonal (leakage) terms are only non-zero with `full_polarisation`.
pub fn planted_gains(antennas: &[Antenna], full_polarisation: bool) -> IndexMap<Antenna, Jones> {
    let n = antennas.len().max(1) as f64;
    antennas
        .iter()
        .enumerate()
        .map(|(i, antenna)| {
            let x = i as f64 / n;
            let gx = c64::from_polar(0.8 + 0.4 * x, TAU * 0.3 * x);
            let gy = c64::from_polar(1.2 - 0.3 * x, -TAU * 0.2 * x);
            let mut j = Jones::diagonal(gx, gy);
            if full_polarisation {
                j[1] = c64::from_polar(0.05 + 0.05 * x, TAU * x);
                j[2] = c64::from_polar(0.08 - 0.04 * x, -TAU * x);
            }
            (antenna.clone(), j)
        })
        .collect()
}

/// Corrupt a model with antenna gains: `G_p M G_q^H` for every baseline.
/// Antennas without a gain are treated as having unity gain. Null model planes
/// stay null.
pub fn corrupt(model: &VisMap, gains: &IndexMap<Antenna, Jones>) -> VisMap {
    let unity = Jones::identity();
    model
        .iter()
        .map(|(baseline, planes)| {
            let gp = gains.get(baseline.p()).unwrap_or(&unity);
            let gq = gains.get(baseline.q()).unwrap_or(&unity);
            let mut out = Planes::null();
            if let Some(shape) = planes.shape() {
                for (i, plane) in planes.iter().enumerate() {
                    if plane.is_some() {
                        out.0[i] = Some(Array2::zeros(shape));
                    }
                }
                for t in 0..shape.0 {
                    for f in 0..shape.1 {
                        let j = Jones::sandwich(gp, &planes.jones_at(t, f), gq);
                        for (plane, v) in out.0.iter_mut().zip(j.iter()) {
                            if let Some(plane) = plane {
                                plane[(t, f)] = *v;
                            }
                        }
                    }
                }
            }
            (baseline.clone(), out)
        })
        .collect()
}
