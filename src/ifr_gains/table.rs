// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistence of IFR gains.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::debug;

use super::{IfrGainTableError, IfrGains};
use crate::{c64, vis::Baseline};

/// Somewhere IFR gains are kept between runs.
pub trait IfrGainStore: Send {
    /// Read the stored gains. `Ok(None)` means nothing has been stored yet.
    fn load(&self) -> Result<Option<IfrGains>, IfrGainTableError>;

    fn save(&self, gains: &IfrGains) -> Result<(), IfrGainTableError>;
}

/// IFR gains kept in a JSON file, as an object mapping "p:q" to four
/// `[re, im]` pairs (xx, xy, yx, yy).
#[derive(Debug, Clone)]
pub struct IfrGainTable {
    path: PathBuf,
}

impl IfrGainTable {
    pub fn new<P: Into<PathBuf>>(path: P) -> IfrGainTable {
        IfrGainTable { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

type TableFile = IndexMap<String, [[f64; 2]; 4]>;

impl IfrGainStore for IfrGainTable {
    fn load(&self) -> Result<Option<IfrGains>, IfrGainTableError> {
        if !self.path.exists() {
            debug!("IFR gain table {} doesn't exist", self.path.display());
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|err| IfrGainTableError::IO {
            file: self.path.clone(),
            err,
        })?;
        let table: TableFile =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| {
                IfrGainTableError::Parse {
                    file: self.path.clone(),
                    err,
                }
            })?;

        let mut gains = IfrGains::with_capacity(table.len());
        for (key, values) in table {
            let baseline: Baseline =
                key.parse()
                    .map_err(|err| IfrGainTableError::BadBaseline {
                        file: self.path.clone(),
                        err,
                    })?;
            gains.insert(baseline, values.map(|[re, im]| c64::new(re, im)));
        }
        debug!(
            "Read IFR gains for {} baselines from {}",
            gains.len(),
            self.path.display()
        );
        Ok(Some(gains))
    }

    fn save(&self, gains: &IfrGains) -> Result<(), IfrGainTableError> {
        let table: TableFile = gains
            .iter()
            .map(|(baseline, values)| (baseline.to_string(), values.map(|v| [v.re, v.im])))
            .collect();
        let io_err = |err: std::io::Error| IfrGainTableError::IO {
            file: self.path.clone(),
            err,
        };
        let mut writer = BufWriter::new(File::create(&self.path).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut writer, &table)?;
        writer.flush().map_err(io_err)?;
        debug!(
            "Wrote IFR gains for {} baselines to {}",
            gains.len(),
            self.path.display()
        );
        Ok(())
    }
}
