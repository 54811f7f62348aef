use std::collections::BTreeMap;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::SplitConfig;
use crate::error::{PrepError, Result};
use crate::record::FeatureRow;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    pub train: Vec<FeatureRow>,
    pub validation: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Train / validation / test partitioning stratified on the joint
/// `(label, label_category)` pair, reproducible from the configured seed.
pub struct DatasetSplitter {
    config: SplitConfig,
}

impl DatasetSplitter {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    pub fn train_valid_test_split(&self, rows: Vec<FeatureRow>) -> Result<Split> {
        let c = &self.config;
        let holdout_ratio = c.validation_size + c.testing_size;
        if !(0.0..=1.0).contains(&holdout_ratio) {
            return Err(PrepError::Config(format!("holdout ratio {} out of range", holdout_ratio)));
        }
        let mut rng = StdRng::seed_from_u64(c.seed);

        let (mut train, holdout) = stratified_split(rows, holdout_ratio, &mut rng);

        let test_ratio = if holdout_ratio > 0.0 { c.testing_size / holdout_ratio } else { 0.0 };
        let (mut validation, mut test) = if c.stratify_holdout {
            stratified_split(holdout, test_ratio, &mut rng)
        } else {
            random_split(holdout, test_ratio, &mut rng)
        };

        train.shuffle(&mut rng);
        validation.shuffle(&mut rng);
        test.shuffle(&mut rng);
        debug!(
            "split into {} train / {} validation / {} test rows",
            train.len(),
            validation.len(),
            test.len()
        );
        Ok(Split { train, validation, test })
    }
}

fn holdout_count(n: usize, ratio: f64) -> usize {
    ((ratio * n as f64).ceil() as usize).min(n)
}

/// Returns `(kept, taken)` with `ceil(ratio * n)` rows taken overall,
/// distributed across strata by largest remainder. Strata with a single
/// row stay in `kept`.
fn stratified_split(rows: Vec<FeatureRow>, ratio: f64, rng: &mut StdRng) -> (Vec<FeatureRow>, Vec<FeatureRow>) {
    let total = rows.len();
    let mut strata: BTreeMap<(String, String), Vec<FeatureRow>> = BTreeMap::new();
    for row in rows {
        let key = (row.label.clone(), row.label_category.clone());
        strata.entry(key).or_default().push(row);
    }

    let target = holdout_count(total, ratio);
    let mut quotas: Vec<(usize, f64)> = strata
        .values()
        .map(|group| {
            let exact = ratio * group.len() as f64;
            (exact.floor() as usize, exact - exact.floor())
        })
        .collect();
    let assigned: usize = quotas.iter().map(|q| q.0).sum();
    let mut by_remainder: Vec<usize> = (0..quotas.len()).collect();
    by_remainder.sort_by(|a, b| quotas[*b].1.total_cmp(&quotas[*a].1));
    for i in by_remainder.into_iter().take(target.saturating_sub(assigned)) {
        quotas[i].0 += 1;
    }

    let mut kept = Vec::new();
    let mut taken = Vec::new();
    for ((key, mut group), (quota, _)) in strata.into_iter().zip(quotas) {
        let quota = if group.len() < 2 {
            if quota > 0 {
                warn!("stratum {:?} has a single row, keeping it out of the holdout", key);
            }
            0
        } else {
            quota.min(group.len() - 1)
        };
        group.shuffle(rng);
        let tail = group.split_off(group.len() - quota);
        kept.extend(group);
        taken.extend(tail);
    }
    (kept, taken)
}

fn random_split(mut rows: Vec<FeatureRow>, ratio: f64, rng: &mut StdRng) -> (Vec<FeatureRow>, Vec<FeatureRow>) {
    rows.shuffle(rng);
    let taken = rows.split_off(rows.len() - holdout_count(rows.len(), ratio));
    (rows, taken)
}
