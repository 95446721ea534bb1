//! Detection catalogs: typed rows, named columns, merging and the CSV sink.

mod dedup;
mod selection;
mod tabular;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{Error, Result};

pub use dedup::{deduplicate, DedupConfig, Deduplicated, MatchSpace};
pub use selection::{apply_selection, Bound, Selection, SelectionRule};

/// Detection pass that produced a row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    High,
    Low,
    Detect,
    Hot,
    Cold,
}

/// Built-in catalog columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    Id,
    X,
    Y,
    XPeak,
    YPeak,
    Peak,
    Flux,
    Npix,
    A,
    B,
    Theta,
    RCirc,
    Ra,
    Dec,
    Tract,
}

/// One detected object.
///
/// Positions are local pixel coordinates of the image the row was measured
/// on; `a`/`b` are RMS semi-axes in pixels and `theta` is radians
/// counter-clockwise from +x.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub x_peak: f64,
    pub y_peak: f64,
    pub peak: f64,
    pub flux: f64,
    /// Footprint pixel count. Fractional after hot/cold rescaling.
    pub npix: f64,
    pub a: f64,
    pub b: f64,
    pub theta: f64,
    /// Area-equivalent radius `sqrt(npix / π)`.
    pub r_circ: f64,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub tract: Option<u32>,
    pub patch: Option<String>,
    pub pass: Option<Pass>,
    /// Values of the catalog's extra columns, in column order.
    pub extra: Vec<f64>,
}

impl Source {
    /// Numeric value of a built-in field; absent values read as NaN.
    pub fn field(&self, field: Field) -> f64 {
        match field {
            Field::Id => self.id as f64,
            Field::X => self.x,
            Field::Y => self.y,
            Field::XPeak => self.x_peak,
            Field::YPeak => self.y_peak,
            Field::Peak => self.peak,
            Field::Flux => self.flux,
            Field::Npix => self.npix,
            Field::A => self.a,
            Field::B => self.b,
            Field::Theta => self.theta,
            Field::RCirc => self.r_circ,
            Field::Ra => self.ra.unwrap_or(f64::NAN),
            Field::Dec => self.dec.unwrap_or(f64::NAN),
            Field::Tract => self.tract.map_or(f64::NAN, f64::from),
        }
    }

    pub fn sky(&self) -> Option<(f64, f64)> {
        Some((self.ra?, self.dec?))
    }
}

/// Resolved reference to a catalog column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Builtin(Field),
    Extra(usize),
}

/// Ordered rows plus the names of any extra numeric columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Catalog {
    pub sources: Vec<Source>,
    pub extra_columns: Vec<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: Vec<Source>) -> Self {
        Self {
            sources,
            extra_columns: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Source> {
        self.sources.iter()
    }

    /// Resolve a column name, failing with `UnknownField`.
    pub fn column(&self, name: &str) -> Result<Column> {
        if let Ok(field) = name.parse::<Field>() {
            return Ok(Column::Builtin(field));
        }
        self.extra_columns
            .iter()
            .position(|c| c == name)
            .map(Column::Extra)
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Value of `column` in `row`; missing values read as NaN.
    pub fn value(&self, row: usize, column: Column) -> f64 {
        let source = &self.sources[row];
        match column {
            Column::Builtin(field) => source.field(field),
            Column::Extra(i) => source.extra.get(i).copied().unwrap_or(f64::NAN),
        }
    }

    /// Append a numeric column with one value per row.
    pub fn add_extra_column(&mut self, name: impl Into<String>, values: &[f64]) -> Result<()> {
        let name = name.into();
        if values.len() != self.sources.len() {
            return Err(Error::invalid(
                "values",
                format!("column '{name}' has {} values for {} rows", values.len(), self.sources.len()),
            ));
        }
        if self.column(&name).is_ok() {
            return Err(Error::invalid("name", format!("column '{name}' already exists")));
        }
        self.extra_columns.push(name);
        for (source, &v) in self.sources.iter_mut().zip(values) {
            source.extra.push(v);
        }
        Ok(())
    }

    /// Rows where `keep` is true, in order.
    pub fn filter_rows(&self, keep: &[bool]) -> Catalog {
        Catalog {
            sources: self
                .sources
                .iter()
                .zip(keep)
                .filter(|(_, &k)| k)
                .map(|(s, _)| s.clone())
                .collect(),
            extra_columns: self.extra_columns.clone(),
        }
    }

    /// Tag every row with where it came from.
    pub fn set_provenance(&mut self, tract: Option<u32>, patch: Option<&str>, pass: Option<Pass>) {
        for source in &mut self.sources {
            if tract.is_some() {
                source.tract = tract;
            }
            if let Some(patch) = patch {
                source.patch = Some(patch.to_string());
            }
            if pass.is_some() {
                source.pass = pass;
            }
        }
    }

    /// Stack catalogs in order. All must share the same extra columns.
    pub fn concat<'a>(catalogs: impl IntoIterator<Item = &'a Catalog>) -> Result<Catalog> {
        let mut iter = catalogs.into_iter();
        let Some(first) = iter.next() else {
            return Ok(Catalog::new());
        };
        let mut merged = first.clone();
        for catalog in iter {
            if catalog.extra_columns != merged.extra_columns {
                return Err(Error::SchemaMismatch {
                    expected: merged.extra_columns.clone(),
                    actual: catalog.extra_columns.clone(),
                });
            }
            merged.sources.extend(catalog.sources.iter().cloned());
        }
        Ok(merged)
    }
}
