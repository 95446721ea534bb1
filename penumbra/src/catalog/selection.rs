use serde::{Deserialize, Serialize};

use super::{Catalog, Column};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// Keep rows with `value > threshold`.
    Min,
    /// Keep rows with `value < threshold`.
    Max,
}

/// One cut on a named column. A rule without a threshold is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRule {
    pub field: String,
    pub bound: Bound,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl SelectionRule {
    pub fn min(field: impl Into<String>, threshold: f64) -> Self {
        Self {
            field: field.into(),
            bound: Bound::Min,
            threshold: Some(threshold),
        }
    }

    pub fn max(field: impl Into<String>, threshold: f64) -> Self {
        Self {
            field: field.into(),
            bound: Bound::Max,
            threshold: Some(threshold),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub catalog: Catalog,
    pub mask: Vec<bool>,
    pub before: usize,
    pub after: usize,
}

/// Keep rows passing every active rule. Comparisons are strict, so NaN
/// values fail any rule that inspects them.
pub fn apply_selection(catalog: &Catalog, rules: &[SelectionRule]) -> Result<Selection> {
    let active: Vec<(Column, Bound, f64)> = rules
        .iter()
        .filter_map(|rule| rule.threshold.map(|t| (rule, t)))
        .map(|(rule, t)| Ok((catalog.column(&rule.field)?, rule.bound, t)))
        .collect::<Result<_>>()?;

    let before = catalog.len();
    let mask: Vec<bool> = (0..before)
        .map(|row| {
            active.iter().all(|&(column, bound, threshold)| {
                let value = catalog.value(row, column);
                match bound {
                    Bound::Min => value > threshold,
                    Bound::Max => value < threshold,
                }
            })
        })
        .collect();

    let selected = catalog.filter_rows(&mask);
    let after = selected.len();

    for rule in rules.iter().filter(|r| r.threshold.is_some()) {
        tracing::debug!("Cutting {} at {:?} {:?}", rule.field, rule.bound, rule.threshold);
    }
    tracing::info!("Selection: {} rows before cuts, {} after", before, after);

    Ok(Selection {
        catalog: selected,
        mask,
        before,
        after,
    })
}
