// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::*;

use stefcal::{
    c64,
    gains::{GainConfig, GainModel, InitialGains, SubtiledGainSolver},
    simulate::{antenna_names, corrupt, cross_baselines, planted_gains, sky_model},
    vis::DomainGeometry,
    Jones,
};

fn jones_operations(c: &mut Criterion) {
    let j = Jones::from([
        c64::new(1.0, -2.0),
        c64::new(5.0, -6.0),
        c64::new(3.0, -4.0),
        c64::new(7.0, -8.0),
    ]);
    let j2 = j * 2.0;

    c.bench_function("hermitian multiply", |b| b.iter(|| j.mul_hermitian(&j2)));
    c.bench_function("sandwich", |b| b.iter(|| Jones::sandwich(&j, &j2, &j)));
}

fn solver_sweep(c: &mut Criterion) {
    let shape = (16, 32);
    let antennas = antenna_names(32);
    let baselines = cross_baselines(&antennas);

    for (name, model, full_polarisation) in [
        ("diagonal", GainModel::Diagonal, false),
        ("full polarisation", GainModel::FullPolarisation, true),
    ] {
        let vis_model = sky_model(&baselines, shape, full_polarisation, 1.0);
        let data = corrupt(&vis_model, &planted_gains(&antennas, full_polarisation));
        let config = GainConfig {
            model,
            subtiling: (4, 4),
            epsilon: 1e-10,
            quota: 1.0,
            smoothing: None,
            init_value: c64::new(1.0, 0.0),
        };
        let geometry = DomainGeometry::new(shape, &[config.subtiling]);

        c.bench_function(&format!("solver sweep ({name})"), |b| {
            b.iter_batched(
                || {
                    SubtiledGainSolver::new(
                        config.clone(),
                        &antennas,
                        &baselines,
                        geometry,
                        [true, true],
                        &InitialGains::default(),
                    )
                },
                |mut solver| solver.iterate(&data, &vis_model, true),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, jones_operations, solver_sweep);
criterion_main!(benches);
