//! Globally consistent encoding of feature rows into model input.
//!
//! Output column layout, identical for every device:
//! decoded flag bits | one-hot categorical blocks | standardized numerics.
//! Only the numeric scaler is fitted on device data; every categorical and
//! label mapping comes from the shared `GlobalVocabulary`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};
use crate::flags::{FlagDecoder, FLAG_WIDTH};
use crate::record::{FeatureRow, CATEGORICAL_FEATURES, NUMERIC_FEATURE_COUNT};
use crate::vocab::{GlobalVocabulary, Vocabulary};

#[derive(Debug, Clone)]
pub struct EncodedSplit {
    pub features: Array2<f64>,
    pub labels: Array1<usize>,
    pub categories: Array1<usize>,
}

impl EncodedSplit {
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }
}

pub struct DatasetEncoder {
    vocabulary: GlobalVocabulary,
    flags: FlagDecoder,
    drop_first: bool,
}

impl DatasetEncoder {
    pub fn new(vocabulary: GlobalVocabulary, drop_first: bool) -> Self {
        Self {
            vocabulary,
            flags: FlagDecoder::new(),
            drop_first,
        }
    }

    pub fn feature_names(&self) -> Result<Vec<String>> {
        let mut names = self.flags.feature_names();
        for column in CATEGORICAL_FEATURES {
            let vocab = self.vocabulary.column(column)?;
            let skip = if self.drop_first { 1 } else { 0 };
            names.extend(vocab.values().iter().skip(skip).map(|v| format!("{}={}", column, v)));
        }
        names.extend(FeatureRow::numeric_names().into_iter().map(str::to_string));
        Ok(names)
    }

    /// Fits the standard scaler on the training rows. Zero-variance columns
    /// get a scale of 1 so they encode to 0 rather than NaN.
    pub fn fit(&self, train: &[FeatureRow]) -> Result<FittedEncoder> {
        if train.is_empty() {
            return Err(PrepError::Schema("cannot fit encoder on an empty training split".to_string()));
        }
        let n = train.len() as f64;
        let mut means = [0.0; NUMERIC_FEATURE_COUNT];
        for row in train {
            for (m, v) in means.iter_mut().zip(row.numeric_values()) {
                *m += v;
            }
        }
        for m in means.iter_mut() {
            *m /= n;
        }
        let mut scales = [0.0; NUMERIC_FEATURE_COUNT];
        for row in train {
            for ((s, v), m) in scales.iter_mut().zip(row.numeric_values()).zip(means.iter()) {
                *s += (v - m).powi(2);
            }
        }
        for s in scales.iter_mut() {
            let std = (*s / n).sqrt();
            *s = if std == 0.0 { 1.0 } else { std };
        }

        Ok(FittedEncoder {
            feature_names: self.feature_names()?,
            means: means.to_vec(),
            scales: scales.to_vec(),
            drop_first: self.drop_first,
            vocabulary: self.vocabulary.clone(),
        })
    }
}

/// Fitted encoder state. Persisted next to the encoded splits so the same
/// transformation can be replayed at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedEncoder {
    pub feature_names: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub drop_first: bool,
    pub vocabulary: GlobalVocabulary,
}

impl FittedEncoder {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    fn one_hot(&self, out: &mut [f64], vocab: &Vocabulary, column: &str, value: &str) -> Result<usize> {
        let index = vocab.index_of(value).ok_or_else(|| PrepError::UnseenCategoricalValue {
            column: column.to_string(),
            value: value.to_string(),
        })?;
        let width = if self.drop_first { vocab.len().saturating_sub(1) } else { vocab.len() };
        match (self.drop_first, index) {
            (true, 0) => {}
            (true, i) => out[i - 1] = 1.0,
            (false, i) => out[i] = 1.0,
        }
        Ok(width)
    }

    pub fn transform_features(&self, rows: &[FeatureRow]) -> Result<Array2<f64>> {
        let decoder = FlagDecoder::new();
        let width = self.n_features();
        let mut features = Array2::<f64>::zeros((rows.len(), width));

        for (i, row) in rows.iter().enumerate() {
            let mut view = features.row_mut(i);
            let Some(out) = view.as_slice_mut() else {
                return Err(PrepError::Schema("feature matrix is not contiguous".to_string()));
            };
            let flags = decoder.decode_f64(&row.ip_flags, &row.tcp_flags)?;
            out[..FLAG_WIDTH].copy_from_slice(&flags);

            let mut offset = FLAG_WIDTH;
            for column in CATEGORICAL_FEATURES {
                let vocab = self.vocabulary.column(column)?;
                let value = row.categorical_value(column).unwrap_or_default();
                offset += self.one_hot(&mut out[offset..], vocab, column, value)?;
            }

            for (j, v) in row.numeric_values().iter().enumerate() {
                out[offset + j] = (v - self.means[j]) / self.scales[j];
            }
        }
        Ok(features)
    }

    pub fn encode_labels(&self, rows: &[FeatureRow]) -> Result<(Array1<usize>, Array1<usize>)> {
        let labels = rows
            .iter()
            .map(|r| self.vocabulary.label_index(&r.label))
            .collect::<Result<Vec<_>>>()?;
        let categories = rows
            .iter()
            .map(|r| self.vocabulary.category_index(&r.label_category))
            .collect::<Result<Vec<_>>>()?;
        Ok((Array1::from(labels), Array1::from(categories)))
    }

    pub fn transform(&self, rows: &[FeatureRow]) -> Result<EncodedSplit> {
        let features = self.transform_features(rows)?;
        let (labels, categories) = self.encode_labels(rows)?;
        Ok(EncodedSplit {
            features,
            labels,
            categories,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("Saved encoder state to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
