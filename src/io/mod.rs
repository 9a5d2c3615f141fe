// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! JSON files of domains to calibrate and of calibration results.
//!
//! Baselines are keyed by "p:q" strings and correlation planes by "xx", "xy",
//! "yx" and "yy"; absent planes are null. Each plane is stored as its
//! (time, frequency) shape and row-major real and imaginary parts.

mod error;

pub use error::DomainFileError;

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use indexmap::IndexMap;
use log::debug;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use crate::{
    c64,
    calibrate::{Domain, DomainOutput, GainImages},
    vis::{Antenna, Baseline, Planes, VisMap},
    Jones,
};

/// A single (time, frequency) plane of complex values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneFile {
    pub shape: [usize; 2],
    pub re: Vec<f64>,
    pub im: Vec<f64>,
}

impl PlaneFile {
    pub fn from_array(plane: ArrayView2<c64>) -> PlaneFile {
        let (num_t, num_f) = plane.dim();
        PlaneFile {
            shape: [num_t, num_f],
            re: plane.iter().map(|v| v.re).collect(),
            im: plane.iter().map(|v| v.im).collect(),
        }
    }

    /// `what` describes the plane in error messages.
    pub fn to_array(&self, what: &str) -> Result<Array2<c64>, DomainFileError> {
        let expected = num_elements(self.shape, what)?;
        for got in [self.re.len(), self.im.len()] {
            if got != expected {
                return Err(DomainFileError::BadPlane {
                    what: what.to_string(),
                    shape: self.shape,
                    expected,
                    got,
                });
            }
        }
        let values = self
            .re
            .iter()
            .zip(&self.im)
            .map(|(&re, &im)| c64::new(re, im))
            .collect();
        Array2::from_shape_vec((self.shape[0], self.shape[1]), values).map_err(|_| {
            DomainFileError::BadPlane {
                what: what.to_string(),
                shape: self.shape,
                expected,
                got: self.re.len(),
            }
        })
    }
}

/// The four correlation planes of a baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanesFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xx: Option<PlaneFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy: Option<PlaneFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yx: Option<PlaneFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yy: Option<PlaneFile>,
}

impl PlanesFile {
    pub fn from_planes(planes: &Planes) -> PlanesFile {
        let [xx, xy, yx, yy] = &planes.0;
        let convert = |p: &Option<Array2<c64>>| p.as_ref().map(|p| PlaneFile::from_array(p.view()));
        PlanesFile {
            xx: convert(xx),
            xy: convert(xy),
            yx: convert(yx),
            yy: convert(yy),
        }
    }

    pub fn to_planes(&self, what: &str) -> Result<Planes, DomainFileError> {
        let convert = |p: &Option<PlaneFile>, corr: &str| {
            p.as_ref()
                .map(|p| p.to_array(&format!("{what}:{corr}")))
                .transpose()
        };
        Ok(Planes::new(
            convert(&self.xx, "xx")?,
            convert(&self.xy, "xy")?,
            convert(&self.yx, "yx")?,
            convert(&self.yy, "yy")?,
        ))
    }

    /// The four elements of a (time, frequency) grid of Jones matrices.
    pub fn from_jones(jones: ArrayView2<Jones>) -> PlanesFile {
        let planes = Planes(std::array::from_fn(|i| Some(jones.mapv(|j| j[i]))));
        PlanesFile::from_planes(&planes)
    }
}

fn num_elements(shape: [usize; 2], what: &str) -> Result<usize, DomainFileError> {
    shape[0]
        .checked_mul(shape[1])
        .ok_or_else(|| DomainFileError::PlaneTooLarge {
            what: what.to_string(),
            shape,
        })
}

/// A boolean (time, frequency) plane, `true` meaning flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagFile {
    pub shape: [usize; 2],
    pub flags: Vec<bool>,
}

impl FlagFile {
    pub fn from_array(flags: ArrayView2<bool>) -> FlagFile {
        let (num_t, num_f) = flags.dim();
        FlagFile {
            shape: [num_t, num_f],
            flags: flags.iter().copied().collect(),
        }
    }

    pub fn to_array(&self, what: &str) -> Result<Array2<bool>, DomainFileError> {
        let expected = num_elements(self.shape, what)?;
        Array2::from_shape_vec((self.shape[0], self.shape[1]), self.flags.clone()).map_err(|_| {
            DomainFileError::BadPlane {
                what: what.to_string(),
                shape: self.shape,
                expected,
                got: self.flags.len(),
            }
        })
    }
}

pub type VisFile = IndexMap<String, PlanesFile>;

pub fn vis_to_file(vis: &VisMap) -> VisFile {
    vis.iter()
        .map(|(baseline, planes)| (baseline.to_string(), PlanesFile::from_planes(planes)))
        .collect()
}

/// `what` describes the visibilities in error messages.
pub fn vis_from_file(vis: &VisFile, what: &str) -> Result<VisMap, DomainFileError> {
    vis.iter()
        .map(|(key, planes)| -> Result<_, DomainFileError> {
            let baseline: Baseline = key.parse()?;
            let planes = planes.to_planes(&format!("{what} {key}"))?;
            Ok((baseline, planes))
        })
        .collect()
}

/// One domain in a [`DomainFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// The index of the timestep after the end of this domain.
    pub time1: usize,

    pub data: VisFile,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub flags: IndexMap<String, FlagFile>,

    /// The direction-independent model first, then any direction-dependent
    /// models.
    pub models: Vec<VisFile>,
}

/// A sequence of domains from a single dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainFile {
    pub dataset_id: String,

    /// The number of timesteps in the dataset.
    pub num_time: usize,

    /// Every baseline ("p:q") that may have data.
    pub interferometers: Vec<String>,

    /// The baselines used for solving. All of them if not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solvable: Option<Vec<String>>,

    pub domains: Vec<DomainRecord>,
}

impl DomainFile {
    pub fn read(file: &Path) -> Result<DomainFile, DomainFileError> {
        debug!("Reading domain file {}", file.display());
        let fh = File::open(file).map_err(|err| DomainFileError::IO {
            file: file.to_path_buf(),
            err,
        })?;
        let domain_file: DomainFile =
            serde_json::from_reader(BufReader::new(fh)).map_err(|err| DomainFileError::Parse {
                file: file.to_path_buf(),
                err,
            })?;
        if domain_file.domains.is_empty() {
            return Err(DomainFileError::NoDomains(file.to_path_buf()));
        }
        Ok(domain_file)
    }

    pub fn write(&self, file: &Path) -> Result<(), DomainFileError> {
        write_json(file, self)
    }

    pub fn interferometers(&self) -> Result<Vec<Baseline>, DomainFileError> {
        parse_baselines(&self.interferometers)
    }

    pub fn solvable(&self) -> Result<Option<Vec<Baseline>>, DomainFileError> {
        self.solvable.as_deref().map(parse_baselines).transpose()
    }

    /// Convert the record at `index` into a [`Domain`].
    pub fn domain(&self, index: usize) -> Result<Domain, DomainFileError> {
        let record = &self.domains[index];
        let data = vis_from_file(&record.data, "data")?;
        let flags = record
            .flags
            .iter()
            .map(|(key, flags)| -> Result<_, DomainFileError> {
                let baseline: Baseline = key.parse()?;
                Ok((baseline, flags.to_array(&format!("flags {key}"))?))
            })
            .collect::<Result<IndexMap<_, _>, DomainFileError>>()?;
        let models = record
            .models
            .iter()
            .enumerate()
            .map(|(i, m)| vis_from_file(m, &format!("model {i}")))
            .collect::<Result<Vec<_>, _>>()?;
        let models = Vec1::try_from_vec(models).map_err(|_| DomainFileError::NoModels(index))?;
        Ok(Domain {
            dataset_id: self.dataset_id.clone(),
            domain_index: index,
            time1: record.time1,
            num_time: self.num_time,
            data,
            flags,
            models,
        })
    }
}

fn parse_baselines(keys: &[String]) -> Result<Vec<Baseline>, DomainFileError> {
    keys.iter()
        .map(|k| k.parse().map_err(DomainFileError::from))
        .collect()
}

/// The calibration result of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainResult {
    pub domain_index: usize,
    pub max_residual: f64,
    pub chisq: f64,
    pub num_iterations: usize,
    pub num_major: usize,
    pub converged: bool,
    pub last_delta: f64,
    pub vis: VisFile,

    /// Solved gains by label ("G", "dE:0", ...) and antenna, with each
    /// Jones element as a plane.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub gains: IndexMap<String, IndexMap<Antenna, PlanesFile>>,
}

impl DomainResult {
    pub fn new(domain_index: usize, output: &DomainOutput) -> DomainResult {
        DomainResult {
            domain_index,
            max_residual: output.max_residual,
            chisq: output.chisq,
            num_iterations: output.num_iterations,
            num_major: output.num_major,
            converged: output.converged,
            last_delta: output.last_delta,
            vis: vis_to_file(&output.vis),
            gains: gains_to_file(&output.gains),
        }
    }
}

fn gains_to_file(gains: &GainImages) -> IndexMap<String, IndexMap<Antenna, PlanesFile>> {
    gains
        .iter()
        .map(|(label, per_antenna)| {
            let per_antenna = per_antenna
                .iter()
                .map(|(antenna, g)| (antenna.clone(), PlanesFile::from_jones(g.view())))
                .collect();
            (label.clone(), per_antenna)
        })
        .collect()
}

/// The results of a whole calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub dataset_id: String,
    pub domains: Vec<DomainResult>,
}

impl OutputFile {
    pub fn write(&self, file: &Path) -> Result<(), DomainFileError> {
        write_json(file, self)
    }

    pub fn read(file: &Path) -> Result<OutputFile, DomainFileError> {
        let fh = File::open(file).map_err(|err| DomainFileError::IO {
            file: file.to_path_buf(),
            err,
        })?;
        serde_json::from_reader(BufReader::new(fh)).map_err(|err| DomainFileError::Parse {
            file: file.to_path_buf(),
            err,
        })
    }
}

fn write_json<T: Serialize>(file: &Path, value: &T) -> Result<(), DomainFileError> {
    let io_err = |err: std::io::Error| DomainFileError::IO {
        file: file.to_path_buf(),
        err,
    };
    let mut writer = BufWriter::new(File::create(file).map_err(io_err)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(io_err)?;
    debug!("Wrote {}", file.display());
    Ok(())
}
