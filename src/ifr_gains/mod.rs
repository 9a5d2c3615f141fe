// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-baseline ("interferometer", IFR) gains.
//!
//! These are closure errors that antenna-based gains can't absorb: one complex
//! factor per baseline and correlation. They are estimated by regressing the
//! data of every domain of a dataset onto the gain-corrupted model, and are
//! only updated (and saved) once the last domain of the dataset has been seen.

mod error;
mod table;

pub use error::IfrGainTableError;
pub use table::{IfrGainStore, IfrGainTable};

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::{
    c64,
    vis::{Baseline, VisMap},
};

/// One complex factor per correlation for every baseline.
pub type IfrGains = IndexMap<Baseline, [c64; 4]>;

const UNITY: [c64; 4] = [c64::new(1.0, 0.0); 4];

pub struct BaselineGainEstimator {
    store: Box<dyn IfrGainStore>,

    /// Start from the stored gains? Otherwise start from unity.
    load_existing: bool,

    /// The gains read from (and written back to) the store.
    gains: IfrGains,

    /// Running sums of `model * conj(data)` per baseline and correlation.
    sum_reim: IndexMap<Baseline, [c64; 4]>,

    /// Running sums of `|data|^2` per baseline and correlation.
    sum_sq: IndexMap<Baseline, [f64; 4]>,
}

impl BaselineGainEstimator {
    /// Set up an estimator, starting from whatever the store holds if
    /// `load_existing` is set.
    pub fn new(store: Box<dyn IfrGainStore>, load_existing: bool) -> BaselineGainEstimator {
        let mut estimator = BaselineGainEstimator {
            store,
            load_existing,
            gains: IfrGains::new(),
            sum_reim: IndexMap::new(),
            sum_sq: IndexMap::new(),
        };
        estimator.load();
        estimator
    }

    /// Forget the running sums and re-read the store, e.g. for a new dataset.
    pub fn reset(&mut self) {
        self.sum_reim.clear();
        self.sum_sq.clear();
        self.load();
    }

    fn load(&mut self) {
        if !self.load_existing {
            self.gains = IfrGains::new();
            return;
        }
        self.gains = match self.store.load() {
            Ok(Some(gains)) => {
                info!("Loaded IFR gains for {} baselines", gains.len());
                gains
            }
            Ok(None) => IfrGains::new(),
            Err(e) => {
                warn!("Couldn't load IFR gains, using unity instead: {e}");
                IfrGains::new()
            }
        };
    }

    /// The stored gains. Baselines without an entry have unity gain.
    pub fn gains(&self) -> &IfrGains {
        &self.gains
    }

    pub fn gain(&self, baseline: &Baseline) -> [c64; 4] {
        self.gains.get(baseline).copied().unwrap_or(UNITY)
    }

    /// Multiply data by the stored gains.
    pub fn apply(&self, data: &mut VisMap) {
        for (baseline, planes) in data.iter_mut() {
            if let Some(gains) = self.gains.get(baseline) {
                planes.scale(gains);
            }
        }
    }

    /// Add a domain's data and gain-corrupted model into the running sums.
    /// Correlations where either plane is null are skipped.
    pub fn accumulate(&mut self, data: &VisMap, corrupted_model: &VisMap) {
        for (baseline, d) in data {
            let Some(m) = corrupted_model.get(baseline) else {
                continue;
            };
            let sum_reim = self
                .sum_reim
                .entry(baseline.clone())
                .or_insert([c64::new(0.0, 0.0); 4]);
            let sum_sq = self.sum_sq.entry(baseline.clone()).or_insert([0.0; 4]);
            for (i, (d, m)) in d.iter().zip(m.iter()).enumerate() {
                let (Some(d), Some(m)) = (d, m) else {
                    continue;
                };
                for (d, m) in d.iter().zip(m.iter()) {
                    sum_reim[i] += m * d.conj();
                    sum_sq[i] += d.norm_sqr();
                }
            }
        }
    }

    /// The current estimate of the update to the stored gains. Correlations
    /// without any data power get unity.
    pub fn update(&self) -> IfrGains {
        self.sum_reim
            .iter()
            .map(|(baseline, sum_reim)| {
                let sum_sq = &self.sum_sq[baseline];
                let mut update = UNITY;
                for i in 0..4 {
                    if sum_sq[i] > 0.0 {
                        update[i] = sum_reim[i] / sum_sq[i];
                    }
                }
                (baseline.clone(), update)
            })
            .collect()
    }

    /// Fold the accumulated update into the stored gains and save them. Failing
    /// to save is reported, but not an error. The running sums are cleared.
    pub fn finalize(&mut self) {
        for (baseline, update) in self.update() {
            let gains = self.gains.entry(baseline).or_insert(UNITY);
            for (g, u) in gains.iter_mut().zip(update) {
                *g *= u;
            }
        }
        self.sum_reim.clear();
        self.sum_sq.clear();

        match self.store.save(&self.gains) {
            Ok(()) => debug!("Saved IFR gains for {} baselines", self.gains.len()),
            Err(e) => warn!("Couldn't save IFR gains: {e}"),
        }
    }
}
