//! Column-level quality gate applied to each device's raw features before
//! a shared feature set is fixed across devices.

use std::collections::BTreeSet;

use log::{debug, info};
use ndarray::{Array2, Axis};

use crate::config::CleanerConfig;
use crate::error::Result;
use crate::table::{Column, ColumnData, Schema, SemanticType, Table};

pub struct FeatureCleaner {
    config: CleanerConfig,
}

impl FeatureCleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    /// Drops numeric columns whose population variance is not above the
    /// threshold. Missing cells are ignored.
    pub fn remove_low_variance(&self, mut table: Table) -> Table {
        let to_drop: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| c.is_numeric())
            .filter(|c| population_variance(&c.present_values()) <= self.config.variance_threshold)
            .map(|c| c.name.clone())
            .collect();
        log_dropped("low variance", &to_drop);
        table.drop_columns(&to_drop);
        table
    }

    /// Drops every numeric column whose absolute Pearson correlation with an
    /// earlier numeric column exceeds the threshold.
    pub fn remove_high_correlation(&self, mut table: Table) -> Table {
        let (names, matrix) = numeric_matrix(&table);
        let corr = correlation_matrix(&matrix);
        let n = names.len();

        let mut to_drop = Vec::new();
        for j in 0..n {
            if (0..j).any(|i| corr[[i, j]].abs() > self.config.correlation_threshold) {
                to_drop.push(names[j].clone());
            }
        }
        log_dropped("high correlation", &to_drop);
        table.drop_columns(&to_drop);
        table
    }

    pub fn handle_missing_values(&self, mut table: Table) -> Table {
        let to_drop: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| c.missing_fraction() > self.config.missing_threshold)
            .map(|c| c.name.clone())
            .collect();
        log_dropped("missing values", &to_drop);
        table.drop_columns(&to_drop);
        table
    }

    pub fn replace_missing_values(&self, mut table: Table) -> Table {
        for column in table.columns_mut() {
            match &mut column.data {
                ColumnData::Numeric(values) => {
                    for v in values.iter_mut().filter(|v| v.is_none()) {
                        *v = Some(self.config.num_replacement);
                    }
                }
                ColumnData::Text(values) => {
                    for v in values.iter_mut().filter(|v| v.is_none()) {
                        *v = Some(self.config.cat_replacement.clone());
                    }
                }
            }
        }
        table
    }

    /// Missing-column pruning, replacement, low variance, correlation.
    pub fn clean_features(&self, table: Table) -> Table {
        let before = table.n_columns();
        let table = self.handle_missing_values(table);
        let table = self.replace_missing_values(table);
        let table = self.remove_low_variance(table);
        let table = self.remove_high_correlation(table);
        info!("Cleaned features: {} -> {} columns", before, table.n_columns());
        table
    }

    /// Projects a device table onto the consolidated feature set, adding
    /// sentinel-filled columns for features this device never produced.
    pub fn apply_global_features(&self, table: &Table, global_features: &[String], schema: &Schema) -> Result<Table> {
        let rows = table.n_rows();
        let mut columns = Vec::with_capacity(global_features.len());
        for name in global_features {
            let column = match table.column(name) {
                Some(column) => column.clone(),
                None => {
                    debug!("feature '{}' absent, filling with sentinel", name);
                    match schema.kind_of(name) {
                        Some(SemanticType::Numeric) => {
                            Column::numeric(name, vec![Some(self.config.num_replacement); rows])
                        }
                        kind => Column::text(
                            name,
                            kind.unwrap_or(SemanticType::Categorical),
                            vec![Some(self.config.cat_replacement.clone()); rows],
                        ),
                    }
                }
            };
            columns.push(column);
        }
        Table::new(columns)
    }
}

/// Union of every device's surviving columns, sorted.
pub fn consolidate_union<S: AsRef<str>>(feature_sets: &[Vec<S>]) -> Vec<String> {
    let union: BTreeSet<String> = feature_sets
        .iter()
        .flat_map(|set| set.iter().map(|s| s.as_ref().to_string()))
        .collect();
    union.into_iter().collect()
}

fn log_dropped(reason: &str, columns: &[String]) {
    if !columns.is_empty() {
        debug!("dropping {} column(s) for {}: {:?}", columns.len(), reason, columns);
    }
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Numeric columns as an (n_rows, n_numeric) matrix; missing cells become NaN.
fn numeric_matrix(table: &Table) -> (Vec<String>, Array2<f64>) {
    let numeric: Vec<&Column> = table.columns().iter().filter(|c| c.is_numeric()).collect();
    let mut matrix = Array2::<f64>::from_elem((table.n_rows(), numeric.len()), f64::NAN);
    for (j, column) in numeric.iter().enumerate() {
        if let ColumnData::Numeric(values) = &column.data {
            for (i, v) in values.iter().enumerate() {
                if let Some(v) = v {
                    matrix[[i, j]] = *v;
                }
            }
        }
    }
    (numeric.iter().map(|c| c.name.clone()).collect(), matrix)
}

/// Pairwise Pearson correlation over rows where both columns are present.
/// Undefined correlations (constant columns) are NaN and never exceed a
/// threshold.
fn correlation_matrix(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.len_of(Axis(1));
    let mut corr = Array2::<f64>::from_elem((n, n), f64::NAN);
    for i in 0..n {
        for j in i..n {
            let a = matrix.column(i);
            let b = matrix.column(j);
            let pairs: Vec<(f64, f64)> = a
                .iter()
                .zip(b.iter())
                .filter(|(x, y)| !x.is_nan() && !y.is_nan())
                .map(|(x, y)| (*x, *y))
                .collect();
            let r = pearson(&pairs);
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}
