// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use indexmap::IndexMap;
use ndarray::prelude::*;

use super::*;
use crate::{
    c64,
    simulate::{antenna_names, corrupt, cross_baselines, planted_gains, sky_model},
    vis::{Baseline, Correlation, DomainGeometry, Planes, VisMap},
    Jones,
};

fn config(model: GainModel, subtiling: (usize, usize), epsilon: f64) -> GainConfig {
    GainConfig {
        model,
        subtiling,
        epsilon,
        quota: 1.0,
        smoothing: None,
        init_value: c64::new(1.0, 0.0),
    }
}

fn solver(
    config: GainConfig,
    antennas: &[Antenna],
    solvable: &[Baseline],
    data_shape: (usize, usize),
    init: &InitialGains,
) -> SubtiledGainSolver {
    let geometry = DomainGeometry::new(data_shape, &[config.subtiling]);
    SubtiledGainSolver::new(config, antennas, solvable, geometry, [true, true], init)
}

/// Iterate until converged. Returns the number of iterations, or None if
/// `max_iter` was hit.
fn solve(
    solver: &mut SubtiledGainSolver,
    data: &VisMap,
    model: &VisMap,
    max_iter: usize,
) -> Option<usize> {
    for i in 0..max_iter {
        if solver.iterate(data, model, i == 0).converged {
            return Some(i + 1);
        }
    }
    None
}

#[test]
fn test_unity_gains_converge_in_one_iteration() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let model = sky_model(&baselines, (4, 3), false, 1.0);
    let data = model.clone();

    let mut solver = solver(
        config(GainModel::Diagonal, (1, 1), 1e-8),
        &antennas,
        &baselines,
        (4, 3),
        &InitialGains::default(),
    );
    let result = solver.iterate(&data, &model, true);
    assert!(result.converged);
    assert_abs_diff_eq!(result.max_delta, 0.0);
    assert_eq!(result.num_converged, solver.state().total_parms());

    let expected = Array3::from_elem(solver.state().gains().dim(), Jones::identity());
    assert_abs_diff_eq!(solver.state().gains(), expected.view(), epsilon = 1e-15);

    for baseline in &baselines {
        let residual = solver.residual(&data[baseline], &model[baseline], baseline);
        assert!(residual.is_null(1));
        assert!(residual.is_null(2));
        assert_abs_diff_eq!(residual.max_abs(), 0.0);
    }
}

#[test]
fn test_planted_gain_is_recovered() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let shape = (4, 3);
    let model = sky_model(&baselines, shape, false, 1.0);
    let c = c64::from_polar(2.0, 30f64.to_radians());
    let mut planted = IndexMap::new();
    planted.insert("1".to_string(), Jones::identity() * c);
    let data = corrupt(&model, &planted);

    let mut solver = solver(
        config(GainModel::Diagonal, shape, 1e-10),
        &antennas,
        &baselines,
        shape,
        &InitialGains::default(),
    );
    let num_iterations = solve(&mut solver, &data, &model, 2000);
    assert!(num_iterations.is_some());

    // Gains are only determined up to a common phase, so compare against
    // antenna 0.
    let gains = solver.state().gains();
    for i in [0, 3] {
        let g0 = gains[(0, 0, 0)][i];
        let g1 = gains[(1, 0, 0)][i];
        let g2 = gains[(2, 0, 0)][i];
        assert_relative_eq!(g0.norm(), 1.0, epsilon = 1e-7);
        assert_relative_eq!(g2.norm(), 1.0, epsilon = 1e-7);
        assert_relative_eq!(g1.norm(), 2.0, epsilon = 1e-7);
        assert_abs_diff_eq!(g1 / g0, c, epsilon = 1e-7);
        assert_abs_diff_eq!(g2 / g0, c64::new(1.0, 0.0), epsilon = 1e-7);
    }
    for baseline in &baselines {
        let residual = solver.residual(&data[baseline], &model[baseline], baseline);
        assert!(residual.max_abs() < 1e-6);
    }
}

#[test]
fn test_planted_full_polarisation_gains_fit_the_data() {
    let antennas = antenna_names(4);
    let baselines = cross_baselines(&antennas);
    let shape = (3, 2);
    let model = sky_model(&baselines, shape, true, 1.0);
    let data = corrupt(&model, &planted_gains(&antennas, true));

    let mut solver = solver(
        config(GainModel::FullPolarisation, shape, 1e-11),
        &antennas,
        &baselines,
        shape,
        &InitialGains::default(),
    );
    assert_eq!(solver.state().total_parms(), 4 * 4);
    solve(&mut solver, &data, &model, 3000);

    for baseline in &baselines {
        let residual = solver.residual(&data[baseline], &model[baseline], baseline);
        assert!(residual.max_abs() < 1e-6, "{baseline}: {}", residual.max_abs());
    }
}

/// With a single subtile covering the whole domain and unity starting gains,
/// the first sweep is a direct complex linear regression of each antenna's
/// data onto its model.
#[test]
fn test_single_subtile_first_sweep_is_global_regression() {
    let antennas = antenna_names(4);
    let baselines = cross_baselines(&antennas);
    let shape = (5, 4);
    let model = sky_model(&baselines, shape, false, 1.0);
    // Data that no set of gains explains exactly.
    let mut data = corrupt(&model, &planted_gains(&antennas, false));
    for (i, planes) in data.values_mut().enumerate() {
        planes.scale(&[c64::new(1.0 + 0.1 * i as f64, 0.2); 4]);
    }

    let mut solver = solver(
        config(GainModel::Diagonal, shape, 1e-8),
        &antennas,
        &baselines,
        shape,
        &InitialGains::default(),
    );
    solver.iterate(&data, &model, true);

    for (i_ant, antenna) in antennas.iter().enumerate() {
        for i in [0, 3] {
            let mut top = c64::new(0.0, 0.0);
            let mut bot = 0.0;
            for baseline in &baselines {
                let d = data[baseline].0[i].as_ref().unwrap();
                let m = model[baseline].0[i].as_ref().unwrap();
                if baseline.p() == antenna {
                    top += d.iter().zip(m).map(|(d, m)| d * m.conj()).sum::<c64>();
                } else if baseline.q() == antenna {
                    top += d.iter().zip(m).map(|(d, m)| d.conj() * m).sum::<c64>();
                } else {
                    continue;
                }
                bot += m.iter().map(|m| m.norm_sqr()).sum::<f64>();
            }
            let expected = top / bot;
            let got = solver.state().gains()[(i_ant, 0, 0)][i];
            assert_abs_diff_eq!(got, expected, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_null_correlations_have_no_parameters() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let shape = (2, 2);
    let xx_only = |v: f64| -> VisMap {
        baselines
            .iter()
            .map(|bl| {
                let plane = Array2::from_elem(shape, c64::new(v, 0.0));
                (bl.clone(), Planes::new(Some(plane), None, None, None))
            })
            .collect()
    };
    let model = xx_only(1.0);
    let data = xx_only(4.0);

    let active_pols =
        active_polarisations(&data, std::slice::from_ref(&model), GainModel::Diagonal);
    assert_eq!(active_pols, [true, false]);
    let geometry = DomainGeometry::new(shape, &[(1, 1)]);
    let mut solver = SubtiledGainSolver::new(
        config(GainModel::Diagonal, (1, 1), 1e-10),
        &antennas,
        &baselines,
        geometry,
        active_pols,
        &InitialGains::default(),
    );
    assert_eq!(solver.state().total_parms(), 3 * 4);
    assert_eq!(solver.state().active(), [true, false, false, false]);

    assert!(solve(&mut solver, &data, &model, 500).is_some());
    for baseline in &baselines {
        let d = &data[baseline];
        let m = &model[baseline];
        for out in [
            solver.residual(d, m, baseline),
            solver.corrected_residual(d, m, baseline),
            solver.apply(d, baseline),
            solver.apply_inverse(m, baseline),
        ] {
            assert!(!out.is_null(0));
            assert!(out.is_null(1));
            assert!(out.is_null(2));
            assert!(out.is_null(3));
        }
        let residual = solver.residual(d, m, baseline);
        assert!(residual.max_abs() < 1e-6);
    }
    // The amplitude of every xx gain is 2; the yy gains are untouched.
    for g in solver.state().gains() {
        assert_relative_eq!(g[0].norm(), 2.0, epsilon = 1e-7);
        assert_abs_diff_eq!(g[3], c64::new(1.0, 0.0));
    }
}

#[test]
fn test_zero_denominator_keeps_previous_gain() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let shape = (2, 1);
    let model = sky_model(&baselines, shape, false, 0.0);
    let data = sky_model(&baselines, shape, false, 1.0);

    let init = InitialGains::Constant(c64::new(2.0, 0.0));
    let mut solver = solver(
        config(GainModel::Diagonal, (1, 1), 1e-8),
        &antennas,
        &baselines,
        shape,
        &init,
    );
    for first in [true, false] {
        let result = solver.iterate(&data, &model, first);
        assert!(result.converged);
        assert!(!solver.state().gains().iter().any(Jones::any_nan));
        let expected = Array3::from_elem(solver.state().gains().dim(), Jones::identity() * 2.0);
        assert_abs_diff_eq!(solver.state().gains(), expected.view());
    }
}

#[test]
fn test_apply_and_apply_inverse_are_inverses() {
    let antennas = antenna_names(4);
    let baselines = cross_baselines(&antennas);
    let shape = (3, 4);
    let model = sky_model(&baselines, shape, true, 1.0);
    let seeds = planted_gains(&antennas, true)
        .into_iter()
        .map(|(a, j)| (a, Array1::from_elem(2, j)))
        .collect();

    let solver = solver(
        config(GainModel::FullPolarisation, (1, 2), 1e-8),
        &antennas,
        &baselines,
        shape,
        &InitialGains::PerAntenna(seeds),
    );
    for baseline in &baselines {
        let m = &model[baseline];
        let round_trip = solver.apply(&solver.apply_inverse(m, baseline), baseline);
        let other_way = solver.apply_inverse(&solver.apply(m, baseline), baseline);
        for i in 0..4 {
            let m = m.0[i].as_ref().unwrap();
            assert_abs_diff_eq!(round_trip.0[i].as_ref().unwrap(), m, epsilon = 1e-12);
            assert_abs_diff_eq!(other_way.0[i].as_ref().unwrap(), m, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_diagonal_model_discards_leakage_in_seeds() {
    let antennas = antenna_names(2);
    let seeds = planted_gains(&antennas, true)
        .into_iter()
        .map(|(a, j)| (a, Array1::from_elem(1, j)))
        .collect();
    let gains = InitialGains::PerAntenna(seeds).to_array(
        &antennas,
        (2, 1),
        GainModel::Diagonal,
        c64::new(1.0, 0.0),
    );
    for g in gains.iter() {
        assert_abs_diff_eq!(g[1], c64::new(0.0, 0.0));
        assert_abs_diff_eq!(g[2], c64::new(0.0, 0.0));
    }
}

#[test]
fn test_seeds_missing_antennas_use_the_initial_value() {
    let antennas = antenna_names(3);
    let mut seeds = IndexMap::new();
    seeds.insert("0".to_string(), array![Jones::identity() * 3.0]);
    // Two frequency subtiles where one is needed.
    seeds.insert("2".to_string(), array![Jones::identity(), Jones::identity()]);
    let init_value = c64::new(0.5, 0.0);
    let gains = InitialGains::PerAntenna(seeds).to_array(
        &antennas,
        (2, 1),
        GainModel::Diagonal,
        init_value,
    );
    assert_abs_diff_eq!(gains[(0, 1, 0)], Jones::identity() * 3.0);
    assert_abs_diff_eq!(gains[(1, 0, 0)], Jones::identity() * init_value);
    assert_abs_diff_eq!(gains[(2, 1, 0)], Jones::identity() * init_value);

    // The solver passes its configured initial value through.
    let baselines = cross_baselines(&antennas);
    let mut seeds = IndexMap::new();
    seeds.insert("1".to_string(), array![Jones::identity() * 3.0]);
    let solver = solver(
        GainConfig {
            init_value,
            ..config(GainModel::Diagonal, (1, 1), 1e-8)
        },
        &antennas,
        &baselines,
        (2, 1),
        &InitialGains::PerAntenna(seeds),
    );
    assert_abs_diff_eq!(solver.state().gains()[(0, 0, 0)], Jones::identity() * init_value);
    assert_abs_diff_eq!(solver.state().gains()[(1, 1, 0)], Jones::identity() * 3.0);
}

#[test]
fn test_quota_counts_converged_parameters() {
    // 5 antennas x 2 subtiles x xx only = 10 parameters.
    let mut state = GainState::new(
        Array3::from_elem((5, 2, 1), Jones::identity()),
        [true, false, false, false],
    );
    assert_eq!(state.total_parms(), 10);

    let mut new = state.gains().to_owned();
    new[(3, 1, 0)][0] += c64::new(1.0, 0.0);
    // A change in an inactive element is not counted.
    new[(2, 0, 0)][3] += c64::new(1.0, 0.0);
    state.update(new, 1e-5);
    assert_eq!(state.num_converged(), 9);
    assert_abs_diff_eq!(state.delta_max(), 1.0);
    assert!(!state.converged()[(3, 1, 0, 0)]);
    assert!(state.converged()[(2, 0, 0, 0)]);
    assert_abs_diff_eq!(state.deltas()[(2, 0, 0, 3)], 0.0);

    // The same parameter count through the solver, with a 0.9 quota.
    let antennas = antenna_names(5);
    let baselines = cross_baselines(&antennas);
    let geometry = DomainGeometry::new((2, 1), &[(1, 1)]);
    let solver = SubtiledGainSolver::new(
        GainConfig {
            quota: 0.9,
            ..config(GainModel::Diagonal, (1, 1), 1e-5)
        },
        &antennas,
        &baselines,
        geometry,
        [true, false],
        &InitialGains::default(),
    );
    assert_eq!(solver.state().total_parms(), 10);
    assert_eq!(solver.convergence_target(), 9);
}

#[test]
fn test_subtiles_are_solved_independently() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let shape = (4, 2);
    let model = sky_model(&baselines, shape, false, 1.0);
    // Antenna 2's gain is 3 in the first two timesteps and 0.5 in the last two.
    let mut data = model.clone();
    for (baseline, planes) in data.iter_mut() {
        if baseline.q() != "2" {
            continue;
        }
        for plane in planes.0.iter_mut().flatten() {
            plane.slice_mut(s![..2, ..]).mapv_inplace(|v| v * 3.0);
            plane.slice_mut(s![2.., ..]).mapv_inplace(|v| v * 0.5);
        }
    }

    let mut solver = solver(
        config(GainModel::Diagonal, (2, 2), 1e-11),
        &antennas,
        &baselines,
        shape,
        &InitialGains::default(),
    );
    assert_eq!(solver.num_subtiles(), (2, 1));
    assert!(solve(&mut solver, &data, &model, 2000).is_some());

    let gains = solver.state().gains();
    for i in [0, 3] {
        assert_relative_eq!(gains[(2, 0, 0)][i].norm(), 3.0, epsilon = 1e-7);
        assert_relative_eq!(gains[(2, 1, 0)][i].norm(), 0.5, epsilon = 1e-7);
        assert_relative_eq!(gains[(0, 0, 0)][i].norm(), 1.0, epsilon = 1e-7);
    }
}

#[test]
fn test_last_timeslot_skips_padding() {
    let antennas = antenna_names(2);
    let baselines = cross_baselines(&antennas);
    // 5 timesteps in subtiles of 2 pad to 6; the last real timestep is in
    // subtile 2.
    let mut solver = solver(
        config(GainModel::Diagonal, (2, 1), 1e-8),
        &antennas,
        &baselines,
        (5, 2),
        &InitialGains::default(),
    );
    assert_eq!(solver.num_subtiles(), (3, 2));
    for (t, mut gains) in solver.gains_mut().axis_iter_mut(Axis(1)).enumerate() {
        gains.fill(Jones::identity() * (t as f64 + 1.0));
    }

    let InitialGains::PerAntenna(last) = solver.get_last_timeslot() else {
        panic!("expected per-antenna gains");
    };
    assert_eq!(last.len(), 2);
    for gains in last.values() {
        assert_eq!(gains.len(), 2);
        assert_abs_diff_eq!(gains[0], Jones::identity() * 3.0);
    }

    let full = solver.get_2x2_gains();
    for gains in full.values() {
        assert_eq!(gains.dim(), (5, 2));
        assert_abs_diff_eq!(gains[(0, 1)], Jones::identity());
        assert_abs_diff_eq!(gains[(3, 0)], Jones::identity() * 2.0);
        assert_abs_diff_eq!(gains[(4, 1)], Jones::identity() * 3.0);
    }
}

#[test]
fn test_unknown_antennas_use_unity() {
    let antennas = antenna_names(2);
    let baselines = cross_baselines(&antennas);
    let solver = solver(
        config(GainModel::Diagonal, (1, 1), 1e-8),
        &antennas,
        &baselines,
        (1, 1),
        &InitialGains::Constant(c64::new(2.0, 0.0)),
    );
    let planes = Planes::diagonal(array![[c64::new(1.0, 0.0)]], array![[c64::new(1.0, 0.0)]]);
    let out = solver.apply_inverse(&planes, &Baseline::new("0", "99"));
    assert_abs_diff_eq!(out.0[0].as_ref().unwrap()[(0, 0)], c64::new(2.0, 0.0));
}

#[test]
fn test_smoothing_preserves_constants() {
    let kernel = GaussianKernel::new([1.0, 2.0]);
    let mut grid = Array2::from_elem((4, 7), Jones::identity() * c64::new(1.0, 2.0));
    kernel.smooth(grid.view_mut());
    for j in grid.iter() {
        assert_abs_diff_eq!(*j, Jones::identity() * c64::new(1.0, 2.0), epsilon = 1e-12);
    }
}

#[test]
fn test_smoothing_spreads_a_spike_symmetrically() {
    let kernel = GaussianKernel::new([1.0, 1.0]);
    let mut grid = Array2::from_elem((1, 9), Jones::zero());
    grid[(0, 4)] = Jones::identity();
    kernel.smooth(grid.view_mut());

    let centre = grid[(0, 4)][0].re;
    assert!(centre < 1.0);
    assert!(centre > grid[(0, 3)][0].re);
    assert_abs_diff_eq!(grid[(0, 3)], grid[(0, 5)], epsilon = 1e-15);
    assert_abs_diff_eq!(grid[(0, 1)], grid[(0, 7)], epsilon = 1e-15);
    // Off-diagonal elements stay zero.
    assert_abs_diff_eq!(grid[(0, 3)][1], c64::new(0.0, 0.0));
}

/// Keep only the `keep` planes of every baseline.
fn only_planes(vis: &VisMap, keep: [bool; 4]) -> VisMap {
    vis.iter()
        .map(|(baseline, planes)| {
            let mut planes = planes.clone();
            for (plane, keep) in planes.0.iter_mut().zip(keep) {
                if !keep {
                    *plane = None;
                }
            }
            (baseline.clone(), planes)
        })
        .collect()
}

#[test]
fn test_unmodelled_correlation_has_no_parameters() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let shape = (3, 2);
    let full = sky_model(&baselines, shape, false, 1.0);
    let c = c64::from_polar(2.0, 30f64.to_radians());
    let mut planted = IndexMap::new();
    planted.insert("2".to_string(), Jones::identity() * c);
    // xx is measured but not modelled.
    let data = corrupt(&full, &planted);
    let model = only_planes(&full, [false, false, false, true]);

    let active_pols =
        active_polarisations(&data, std::slice::from_ref(&model), GainModel::Diagonal);
    assert_eq!(active_pols, [false, true]);
    let config = config(GainModel::Diagonal, shape, 1e-10);
    let geometry = DomainGeometry::new(shape, &[config.subtiling]);
    let mut solver = SubtiledGainSolver::new(
        config,
        &antennas,
        &baselines,
        geometry,
        active_pols,
        &InitialGains::default(),
    );
    assert_eq!(solver.state().active(), [false, false, false, true]);
    assert_eq!(solver.state().total_parms(), 3);
    assert!(solve(&mut solver, &data, &model, 2000).is_some());

    let gains = solver.state().gains();
    for a in 0..3 {
        // xx has nothing to fit against, so it keeps its starting value.
        assert_abs_diff_eq!(gains[(a, 0, 0)][0], c64::new(1.0, 0.0));
    }
    assert_abs_diff_eq!(gains[(2, 0, 0)][3] / gains[(0, 0, 0)][3], c, epsilon = 1e-7);
    for baseline in &baselines {
        let residual = solver.residual(&data[baseline], &model[baseline], baseline);
        let yy = residual.get(Correlation::YY).unwrap();
        assert!(yy.iter().all(|v| v.norm() < 1e-6));
    }
}

#[test]
fn test_full_polarisation_with_one_polarisation() {
    let antennas = antenna_names(3);
    let baselines = cross_baselines(&antennas);
    let shape = (4, 2);
    let model = only_planes(
        &sky_model(&baselines, shape, true, 1.0),
        [true, false, false, false],
    );
    let c = c64::from_polar(2.0, 30f64.to_radians());
    let mut planted = IndexMap::new();
    planted.insert("1".to_string(), Jones::identity() * c);
    let data = corrupt(&model, &planted);

    let active_pols = active_polarisations(
        &data,
        std::slice::from_ref(&model),
        GainModel::FullPolarisation,
    );
    assert_eq!(active_pols, [true, false]);
    let config = config(GainModel::FullPolarisation, (2, 2), 1e-10);
    let geometry = DomainGeometry::new(shape, &[config.subtiling]);
    let mut solver = SubtiledGainSolver::new(
        config,
        &antennas,
        &baselines,
        geometry,
        active_pols,
        &InitialGains::default(),
    );
    assert_eq!(solver.state().active(), [true, false, false, false]);
    // One parameter per antenna per subtile.
    assert_eq!(solver.state().total_parms(), 3 * 2);
    let num_iterations = solve(&mut solver, &data, &model, 2000);
    assert!(num_iterations.is_some());
    assert!(num_iterations.unwrap() > 1);

    let gains = solver.state().gains();
    for s in 0..2 {
        let g0 = gains[(0, s, 0)];
        let g1 = gains[(1, s, 0)];
        assert_relative_eq!(g1[0].norm(), 2.0, epsilon = 1e-7);
        assert_abs_diff_eq!(g1[0] / g0[0], c, epsilon = 1e-7);
        for a in 0..3 {
            let g = gains[(a, s, 0)];
            assert_abs_diff_eq!(g[1], c64::new(0.0, 0.0));
            assert_abs_diff_eq!(g[2], c64::new(0.0, 0.0));
        }
    }
    for baseline in &baselines {
        let residual = solver.residual(&data[baseline], &model[baseline], baseline);
        assert!(residual.is_null(1));
        assert!(residual.max_abs() < 1e-6, "{}", residual.max_abs());
    }
}
