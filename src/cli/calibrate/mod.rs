// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parse calibration arguments into parameters, and calibrate.


use std::path::PathBuf;

use clap::Parser;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{progress_bar, ARG_FILE_HELP};
use crate::{
    calibrate::MajorCycleController,
    constants::*,
    ifr_gains::IfrGainTable,
    io::{DomainFile, DomainResult, OutputFile},
    params::StefCalParams,
    StefcalError,
};

const DEFAULT_OUTPUT_FILENAME: &str = "stefcal_output.json";

lazy_static::lazy_static! {
    static ref OUTPUT_HELP: String =
        format!("The path to the output file of residuals (or data) and diagnostics. Default: {DEFAULT_OUTPUT_FILENAME}");

    static ref EPSILON_HELP: String =
        format!("Gain parameters whose updates are smaller than this are converged. Default: {DEFAULT_EPSILON:e}");

    static ref DIFFGAIN_EPSILON_HELP: String =
        format!("As --epsilon, but for direction-dependent gains. Default: {DEFAULT_DIFFGAIN_EPSILON:e}");

    static ref MAX_ITER_HELP: String =
        format!("The maximum number of sweeps in the first major cycle. Default: {DEFAULT_MAX_ITER}");

    static ref MAX_ITER1_HELP: String =
        format!("The maximum number of sweeps in later major cycles. Default: {DEFAULT_MAX_ITER1}");

    static ref DIFFGAIN_MAX_ITER_HELP: String =
        format!("The maximum number of sweeps per direction-dependent solve. Default: {DEFAULT_DIFFGAIN_MAX_ITER}");

    static ref MAX_MAJOR_HELP: String =
        format!("The maximum number of major cycles. Default: {DEFAULT_MAX_MAJOR}");

    static ref QUOTA_HELP: String =
        format!("The fraction of gain parameters that must converge. Default: {DEFAULT_CONVERGENCE_QUOTA}");

    static ref GAIN_SUBTILING_HELP: String =
        format!("The time and frequency size of a gain subtile. Default: {} {}", DEFAULT_GAIN_SUBTILING[0], DEFAULT_GAIN_SUBTILING[1]);

    static ref INIT_VALUE_HELP: String =
        format!("The starting value of every gain. Default: {DEFAULT_INIT_VALUE}");

    static ref IFR_GAIN_TABLE_HELP: String =
        format!("The file that IFR gains are read from and saved to. Default: {DEFAULT_IFR_GAIN_TABLE}");

    static ref CORR_NAMES_HELP: String =
        format!("The names of the two polarisations. Default: {} {}", DEFAULT_CORR_NAMES[0], DEFAULT_CORR_NAMES[1]);
}

#[derive(Error, Debug)]
pub(super) enum CalibrateArgsError {
    #[error("Expected 2 correlation names, but got {0}")]
    CorrNames(usize),
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
struct CalibrateCliArgs {
    #[clap(long, help = EPSILON_HELP.as_str(), help_heading = "CONVERGENCE")]
    epsilon: Option<f64>,

    #[clap(long, help = DIFFGAIN_EPSILON_HELP.as_str(), help_heading = "CONVERGENCE")]
    diffgain_epsilon: Option<f64>,

    #[clap(long, help = MAX_ITER_HELP.as_str(), help_heading = "CONVERGENCE")]
    max_iter: Option<usize>,

    #[clap(long, help = MAX_ITER1_HELP.as_str(), help_heading = "CONVERGENCE")]
    max_iter1: Option<usize>,

    #[clap(long, help = DIFFGAIN_MAX_ITER_HELP.as_str(), help_heading = "CONVERGENCE")]
    diffgain_max_iter: Option<usize>,

    #[clap(long, help = MAX_MAJOR_HELP.as_str(), help_heading = "CONVERGENCE")]
    max_major: Option<usize>,

    #[clap(long, help = QUOTA_HELP.as_str(), help_heading = "CONVERGENCE")]
    convergence_quota: Option<f64>,

    #[clap(long, multiple_values(true), help = GAIN_SUBTILING_HELP.as_str(), help_heading = "GAINS")]
    gain_subtiling: Option<Vec<usize>>,

    /// The time and frequency size of a direction-dependent gain subtile. The
    /// default is one subtile over the whole domain.
    #[clap(long, multiple_values(true), help_heading = "GAINS")]
    diffgain_subtiling: Option<Vec<usize>>,

    /// Gaussian smoothing widths (time, frequency) of the gains, in subtiles.
    /// No smoothing by default.
    #[clap(long, multiple_values(true), help_heading = "GAINS")]
    gain_smoothing: Option<Vec<f64>>,

    /// Gaussian smoothing widths (time, frequency) of the direction-dependent
    /// gains, in subtiles. No smoothing by default.
    #[clap(long, multiple_values(true), help_heading = "GAINS")]
    diffgain_smoothing: Option<Vec<f64>>,

    #[clap(long, help = INIT_VALUE_HELP.as_str(), help_heading = "GAINS")]
    init_value: Option<f64>,

    /// Start every domain from the initial value rather than the previous
    /// domain's solution.
    #[clap(long, help_heading = "GAINS")]
    #[serde(default)]
    no_init_from_previous: bool,

    /// Solve for full 2x2 Jones matrices rather than diagonal gains.
    #[clap(long, help_heading = "GAINS")]
    #[serde(default)]
    full_polarization: bool,

    /// Don't solve for IFR gains.
    #[clap(long, help_heading = "IFR GAINS")]
    #[serde(default)]
    no_solve_ifr_gains: bool,

    /// Don't apply stored IFR gains to the data.
    #[clap(long, help_heading = "IFR GAINS")]
    #[serde(default)]
    no_apply_ifr_gains: bool,

    #[clap(long, help = IFR_GAIN_TABLE_HELP.as_str(), help_heading = "IFR GAINS")]
    ifr_gain_table: Option<PathBuf>,

    /// Output data rather than residuals.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    output_data: bool,

    /// Don't correct the output with the solved gains.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    no_correct: bool,

    /// Log noise estimates of the input and output.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    print_variance: bool,

    /// Write the solved gains into the output.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    visualize_gains: bool,

    /// Write the solved direction-dependent gains into the output.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    visualize_diffgains: bool,

    /// Average written gains over frequency.
    #[clap(long, help_heading = "OUTPUT")]
    #[serde(default)]
    freq_average: bool,

    #[clap(long, multiple_values(true), help = CORR_NAMES_HELP.as_str(), help_heading = "OUTPUT")]
    corr_names: Option<Vec<String>>,
}

impl CalibrateCliArgs {
    fn merge(self, other: Self) -> Self {
        CalibrateCliArgs {
            epsilon: self.epsilon.or(other.epsilon),
            diffgain_epsilon: self.diffgain_epsilon.or(other.diffgain_epsilon),
            max_iter: self.max_iter.or(other.max_iter),
            max_iter1: self.max_iter1.or(other.max_iter1),
            diffgain_max_iter: self.diffgain_max_iter.or(other.diffgain_max_iter),
            max_major: self.max_major.or(other.max_major),
            convergence_quota: self.convergence_quota.or(other.convergence_quota),
            gain_subtiling: self.gain_subtiling.or(other.gain_subtiling),
            diffgain_subtiling: self.diffgain_subtiling.or(other.diffgain_subtiling),
            gain_smoothing: self.gain_smoothing.or(other.gain_smoothing),
            diffgain_smoothing: self.diffgain_smoothing.or(other.diffgain_smoothing),
            init_value: self.init_value.or(other.init_value),
            no_init_from_previous: self.no_init_from_previous || other.no_init_from_previous,
            full_polarization: self.full_polarization || other.full_polarization,
            no_solve_ifr_gains: self.no_solve_ifr_gains || other.no_solve_ifr_gains,
            no_apply_ifr_gains: self.no_apply_ifr_gains || other.no_apply_ifr_gains,
            ifr_gain_table: self.ifr_gain_table.or(other.ifr_gain_table),
            output_data: self.output_data || other.output_data,
            no_correct: self.no_correct || other.no_correct,
            print_variance: self.print_variance || other.print_variance,
            visualize_gains: self.visualize_gains || other.visualize_gains,
            visualize_diffgains: self.visualize_diffgains || other.visualize_diffgains,
            freq_average: self.freq_average || other.freq_average,
            corr_names: self.corr_names.or(other.corr_names),
        }
    }

    /// Fill in defaults and check the parameters.
    fn parse(self) -> Result<StefCalParams, StefcalError> {
        let CalibrateCliArgs {
            epsilon,
            diffgain_epsilon,
            max_iter,
            max_iter1,
            diffgain_max_iter,
            max_major,
            convergence_quota,
            gain_subtiling,
            diffgain_subtiling,
            gain_smoothing,
            diffgain_smoothing,
            init_value,
            no_init_from_previous,
            full_polarization,
            no_solve_ifr_gains,
            no_apply_ifr_gains,
            ifr_gain_table,
            output_data,
            no_correct,
            print_variance,
            visualize_gains,
            visualize_diffgains,
            freq_average,
            corr_names,
        } = self;

        let defaults = StefCalParams::default();
        let corr_names = match corr_names {
            None => defaults.corr_names,
            Some(names) => {
                let num_names = names.len();
                <[String; 2]>::try_from(names)
                    .map_err(|_| CalibrateArgsError::CorrNames(num_names))?
            }
        };
        let params = StefCalParams {
            epsilon: epsilon.unwrap_or(defaults.epsilon),
            diffgain_epsilon: diffgain_epsilon.unwrap_or(defaults.diffgain_epsilon),
            max_iter: max_iter.unwrap_or(defaults.max_iter),
            max_iter1: max_iter1.unwrap_or(defaults.max_iter1),
            diffgain_max_iter: diffgain_max_iter.unwrap_or(defaults.diffgain_max_iter),
            max_major: max_major.unwrap_or(defaults.max_major),
            convergence_quota: convergence_quota.unwrap_or(defaults.convergence_quota),
            gain_subtiling: gain_subtiling.unwrap_or(defaults.gain_subtiling),
            diffgain_subtiling: diffgain_subtiling.or(defaults.diffgain_subtiling),
            gain_smoothing: gain_smoothing.or(defaults.gain_smoothing),
            diffgain_smoothing: diffgain_smoothing.or(defaults.diffgain_smoothing),
            init_from_previous: !no_init_from_previous,
            init_value: init_value.unwrap_or(defaults.init_value),
            residuals: !output_data,
            correct: !no_correct,
            solve_ifr_gains: !no_solve_ifr_gains,
            apply_ifr_gains: !no_apply_ifr_gains,
            ifr_gain_table: ifr_gain_table.unwrap_or(defaults.ifr_gain_table),
            full_polarization,
            print_variance,
            visualize_gains,
            visualize_diffgains,
            freq_average,
            corr_names,
        };
        params.validate()?;
        Ok(params)
    }
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct CalibrateArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    /// The domain file to calibrate.
    #[clap(short, long, help_heading = "INPUT FILES")]
    domains: Option<PathBuf>,

    #[clap(short, long, help = OUTPUT_HELP.as_str(), help_heading = "OUTPUT FILES")]
    output: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "calibration")]
    #[serde(default)]
    calibration_args: CalibrateCliArgs,
}

impl CalibrateArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<CalibrateArgs, StefcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let CalibrateArgs {
                args_file: _,
                domains,
                output,
                calibration_args,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(CalibrateArgs {
                args_file: None,
                domains: cli_args.domains.or(domains),
                output: cli_args.output.or(output),
                calibration_args: cli_args.calibration_args.merge(calibration_args),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), StefcalError> {
        debug!("{:#?}", self);

        let CalibrateArgs {
            args_file: _,
            domains,
            output,
            calibration_args,
        } = self;
        let params = calibration_args.parse()?;
        let domains = domains.ok_or_else(|| {
            StefcalError::Calibrate("No domain file was supplied (use --domains)".to_string())
        })?;
        let output = output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILENAME));

        let domain_file = DomainFile::read(&domains)?;
        let ifrs = domain_file.interferometers()?;
        let solvable = domain_file.solvable()?;
        info!(
            "Dataset '{}': {} domains, {} interferometers ({} solvable)",
            domain_file.dataset_id,
            domain_file.domains.len(),
            ifrs.len(),
            solvable.as_ref().map(|s| s.len()).unwrap_or(ifrs.len())
        );
        info!(
            "Solving for {} gains with subtiling {:?}; {} direction-dependent terms",
            if params.full_polarization {
                "full-polarisation"
            } else {
                "diagonal"
            },
            params.gain_subtiling,
            domain_file.domains[0].models.len().saturating_sub(1)
        );
        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        let store = IfrGainTable::new(params.ifr_gain_table.clone());
        let mut controller = MajorCycleController::new(params, ifrs, solvable, Box::new(store))?;

        let pb = progress_bar(domain_file.domains.len(), "domains", "Calibrating");
        let mut results = Vec::with_capacity(domain_file.domains.len());
        for index in 0..domain_file.domains.len() {
            let domain = domain_file.domain(index)?;
            let result = controller.process(domain)?;
            if !result.converged {
                warn!(
                    "Domain {index} didn't converge (last gain update {:e})",
                    result.last_delta
                );
            }
            results.push(DomainResult::new(index, &result));
            pb.inc(1);
        }
        pb.abandon_with_message("Finished calibrating");

        OutputFile {
            dataset_id: domain_file.dataset_id.clone(),
            domains: results,
        }
        .write(&output)?;
        info!("Wrote {}", output.display());
        Ok(())
    }
}
