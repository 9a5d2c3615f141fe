// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from reading and writing domain files.

use std::path::PathBuf;

use thiserror::Error;

use crate::vis::BaselineParseError;

#[derive(Error, Debug)]
pub enum DomainFileError {
    #[error("Couldn't decode json structure from {file}: {err}")]
    Parse {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error(transparent)]
    BadBaseline(#[from] BaselineParseError),

    #[error("{what} has shape {shape:?} ({expected} elements), but {got} values were supplied")]
    BadPlane {
        what: String,
        shape: [usize; 2],
        expected: usize,
        got: usize,
    },

    #[error("{what} has shape {shape:?}, which is too large to hold in memory")]
    PlaneTooLarge { what: String, shape: [usize; 2] },

    #[error("Domain {0} has no model; at least the direction-independent model is required")]
    NoModels(usize),

    #[error("The domain file {0} contains no domains")]
    NoDomains(PathBuf),

    #[error("Couldn't serialise output: {0}")]
    Serialise(#[from] serde_json::Error),

    #[error("IO error with {file}: {err}")]
    IO { file: PathBuf, err: std::io::Error },
}
