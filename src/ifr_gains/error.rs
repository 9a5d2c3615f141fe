// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading or writing IFR gain tables.

use std::path::PathBuf;

use thiserror::Error;

use crate::vis::BaselineParseError;

#[derive(Error, Debug)]
pub enum IfrGainTableError {
    #[error("When reading IFR gain table {file}: {err}")]
    Parse {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error("IFR gain table {file} has a bad baseline key: {err}")]
    BadBaseline {
        file: PathBuf,
        err: BaselineParseError,
    },

    #[error("Couldn't serialise IFR gains: {0}")]
    Serialise(#[from] serde_json::Error),

    #[error("IO error on IFR gain table {file}: {err}")]
    IO { file: PathBuf, err: std::io::Error },
}
