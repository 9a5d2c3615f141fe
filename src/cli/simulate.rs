// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Write domain files of synthetic visibilities.

use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::ARG_FILE_HELP;
use crate::{
    io::{vis_to_file, DomainFile, DomainRecord},
    simulate::{antenna_names, corrupt, cross_baselines, planted_gains, sky_model},
    vis::{Antenna, Planes, VisMap},
    Jones, StefcalError,
};

const DEFAULT_OUTPUT_FILENAME: &str = "stefcal_domains.json";
const DEFAULT_NUM_ANTENNAS: usize = 5;
const DEFAULT_NUM_TIMESTEPS: usize = 8;
const DEFAULT_NUM_FREQS: usize = 4;
const DEFAULT_DOMAIN_LENGTH: usize = 4;

lazy_static::lazy_static! {
    static ref OUTPUT_HELP: String =
        format!("The path to the domain file to write. Default: {DEFAULT_OUTPUT_FILENAME}");

    static ref NUM_ANTENNAS_HELP: String =
        format!("The number of antennas. Default: {DEFAULT_NUM_ANTENNAS}");

    static ref NUM_TIMESTEPS_HELP: String =
        format!("The number of timesteps in the dataset. Default: {DEFAULT_NUM_TIMESTEPS}");

    static ref NUM_FREQS_HELP: String =
        format!("The number of frequency channels. Default: {DEFAULT_NUM_FREQS}");

    static ref DOMAIN_LENGTH_HELP: String =
        format!("The number of timesteps per domain. Default: {DEFAULT_DOMAIN_LENGTH}");
}

#[derive(Error, Debug)]
pub(super) enum SimulateArgsError {
    #[error("At least 2 antennas are needed, but {0} were asked for")]
    TooFewAntennas(usize),

    #[error("The number of {0} must be at least 1")]
    Zero(&'static str),
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct SimulateArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    #[clap(short, long, help = OUTPUT_HELP.as_str(), help_heading = "OUTPUT FILES")]
    output: Option<PathBuf>,

    #[clap(short = 'n', long, help = NUM_ANTENNAS_HELP.as_str(), help_heading = "SIMULATION")]
    num_antennas: Option<usize>,

    #[clap(long, help = NUM_TIMESTEPS_HELP.as_str(), help_heading = "SIMULATION")]
    num_timesteps: Option<usize>,

    #[clap(long, help = NUM_FREQS_HELP.as_str(), help_heading = "SIMULATION")]
    num_freqs: Option<usize>,

    #[clap(long, help = DOMAIN_LENGTH_HELP.as_str(), help_heading = "SIMULATION")]
    domain_length: Option<usize>,

    /// The number of direction-dependent model terms, each corrupted by its
    /// own gains. Default: 0
    #[clap(long, help_heading = "SIMULATION")]
    num_directions: Option<usize>,

    /// Simulate all four correlations and plant leakage terms.
    #[clap(long, help_heading = "SIMULATION")]
    #[serde(default)]
    full_polarization: bool,

    /// The dataset ID written into the domain file. Default: "sim"
    #[clap(long, help_heading = "SIMULATION")]
    dataset_id: Option<String>,
}

impl SimulateArgs {
    pub(super) fn merge(self) -> Result<SimulateArgs, StefcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let SimulateArgs {
                args_file: _,
                output,
                num_antennas,
                num_timesteps,
                num_freqs,
                domain_length,
                num_directions,
                full_polarization,
                dataset_id,
            } = unpack_arg_file!(arg_file);

            Ok(SimulateArgs {
                args_file: None,
                output: cli_args.output.or(output),
                num_antennas: cli_args.num_antennas.or(num_antennas),
                num_timesteps: cli_args.num_timesteps.or(num_timesteps),
                num_freqs: cli_args.num_freqs.or(num_freqs),
                domain_length: cli_args.domain_length.or(domain_length),
                num_directions: cli_args.num_directions.or(num_directions),
                full_polarization: cli_args.full_polarization || full_polarization,
                dataset_id: cli_args.dataset_id.or(dataset_id),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), StefcalError> {
        debug!("{:#?}", self);

        let SimulateArgs {
            args_file: _,
            output,
            num_antennas,
            num_timesteps,
            num_freqs,
            domain_length,
            num_directions,
            full_polarization,
            dataset_id,
        } = self;
        let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILENAME));
        let num_antennas = num_antennas.unwrap_or(DEFAULT_NUM_ANTENNAS);
        let num_timesteps = num_timesteps.unwrap_or(DEFAULT_NUM_TIMESTEPS);
        let num_freqs = num_freqs.unwrap_or(DEFAULT_NUM_FREQS);
        let domain_length = domain_length.unwrap_or(DEFAULT_DOMAIN_LENGTH);
        let num_directions = num_directions.unwrap_or(0);
        if num_antennas < 2 {
            return Err(SimulateArgsError::TooFewAntennas(num_antennas).into());
        }
        for (what, n) in [
            ("timesteps", num_timesteps),
            ("frequencies", num_freqs),
            ("timesteps per domain", domain_length),
        ] {
            if n == 0 {
                return Err(SimulateArgsError::Zero(what).into());
            }
        }

        info!(
            "Simulating {num_antennas} antennas, {num_timesteps} timesteps x {num_freqs} channels in domains of {domain_length} timesteps, {num_directions} direction-dependent terms"
        );
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let antennas = antenna_names(num_antennas);
        let baselines = cross_baselines(&antennas);
        let gains = planted_gains(&antennas, full_polarization);
        let direction_gains: Vec<IndexMap<Antenna, Jones>> = (0..num_directions)
            .map(|i| rotated_gains(&antennas, full_polarization, i + 1))
            .collect();

        let mut domains = vec![];
        let mut time0 = 0;
        while time0 < num_timesteps {
            let time1 = (time0 + domain_length).min(num_timesteps);
            let shape = (time1 - time0, num_freqs);
            let m0 = sky_model(&baselines, shape, full_polarization, 1.0);
            let directions: Vec<VisMap> = (0..num_directions)
                .map(|i| {
                    // Each direction gets a distinct, fainter sky.
                    let scale = 0.5 / (i + 1) as f64;
                    let mut planes: Vec<Planes> =
                        sky_model(&baselines, shape, full_polarization, scale)
                            .into_iter()
                            .map(|(_, p)| p)
                            .collect();
                    let len = planes.len();
                    planes.rotate_left((i + 1) % len);
                    baselines.iter().cloned().zip(planes).collect()
                })
                .collect();

            let mut apparent = m0.clone();
            for (m, e) in directions.iter().zip(&direction_gains) {
                for (baseline, planes) in corrupt(m, e) {
                    apparent[&baseline].add_assign(&planes);
                }
            }
            let data = corrupt(&apparent, &gains);

            let mut models = vec![vis_to_file(&m0)];
            models.extend(directions.iter().map(vis_to_file));
            domains.push(DomainRecord {
                time1,
                data: vis_to_file(&data),
                flags: IndexMap::new(),
                models,
            });
            time0 = time1;
        }

        let domain_file = DomainFile {
            dataset_id: dataset_id.unwrap_or_else(|| "sim".to_string()),
            num_time: num_timesteps,
            interferometers: baselines.iter().map(|b| b.to_string()).collect(),
            solvable: None,
            domains,
        };
        domain_file.write(&output)?;
        info!(
            "Wrote {} domains to {}",
            domain_file.domains.len(),
            output.display()
        );
        Ok(())
    }
}

/// Planted gains shuffled between antennas, so that every direction differs.
fn rotated_gains(
    antennas: &[Antenna],
    full_polarization: bool,
    shift: usize,
) -> IndexMap<Antenna, Jones> {
    let mut gains: Vec<Jones> = planted_gains(antennas, full_polarization)
        .into_iter()
        .map(|(_, j)| j)
        .collect();
    let len = gains.len();
    gains.rotate_left(shift % len);
    antennas.iter().cloned().zip(gains).collect()
}
