//! CSV sink for catalogs.
//!
//! Built-in columns come first in a fixed order, followed by the extra
//! columns. Absent optional values are written as empty cells.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use strum::IntoEnumIterator;

use super::{Catalog, Field, Pass, Source};
use crate::error::{Error, Result};

const PATCH: &str = "patch";
const PASS: &str = "pass";

enum Slot {
    Builtin(Field),
    Patch,
    Pass,
    Extra(usize),
}

impl Catalog {
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);

        let mut header: Vec<String> = Field::iter().map(|f| f.to_string()).collect();
        header.push(PATCH.to_string());
        header.push(PASS.to_string());
        header.extend(self.extra_columns.iter().cloned());
        out.write_record(&header)?;

        for source in &self.sources {
            let mut record: Vec<String> = Field::iter().map(|f| format_field(source, f)).collect();
            record.push(source.patch.clone().unwrap_or_default());
            record.push(source.pass.map(|p| p.to_string()).unwrap_or_default());
            record.extend(source.extra.iter().map(|v| format_float(*v)));
            out.write_record(&record)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Parse a catalog written by [`Catalog::write_csv`]. Unknown headers
    /// become extra columns; missing built-in columns keep default values.
    pub fn read_csv<R: Read>(reader: R) -> Result<Catalog> {
        let mut input = csv::Reader::from_reader(reader);
        let headers = input.headers()?.clone();

        let mut extra_columns = Vec::new();
        let slots: Vec<Slot> = headers
            .iter()
            .map(|name| match name {
                PATCH => Slot::Patch,
                PASS => Slot::Pass,
                _ => match name.parse::<Field>() {
                    Ok(field) => Slot::Builtin(field),
                    Err(_) => {
                        extra_columns.push(name.to_string());
                        Slot::Extra(extra_columns.len() - 1)
                    }
                },
            })
            .collect();

        let mut sources = Vec::new();
        for (row, record) in input.records().enumerate() {
            let record = record?;
            let mut source = Source {
                extra: vec![f64::NAN; extra_columns.len()],
                ..Source::default()
            };
            for ((slot, name), cell) in slots.iter().zip(headers.iter()).zip(record.iter()) {
                let malformed = || Error::MalformedValue {
                    row,
                    column: name.to_string(),
                    value: cell.to_string(),
                };
                match slot {
                    Slot::Patch => source.patch = (!cell.is_empty()).then(|| cell.to_string()),
                    Slot::Pass => {
                        source.pass = if cell.is_empty() {
                            None
                        } else {
                            Some(cell.parse::<Pass>().map_err(|_| malformed())?)
                        }
                    }
                    Slot::Extra(i) => source.extra[*i] = parse_float(cell).ok_or_else(malformed)?,
                    Slot::Builtin(field) => {
                        set_field(&mut source, *field, cell).ok_or_else(malformed)?
                    }
                }
            }
            sources.push(source);
        }

        Ok(Catalog {
            sources,
            extra_columns,
        })
    }

    pub fn write_csv_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_csv(File::create(path)?)
    }

    pub fn read_csv_path(path: impl AsRef<Path>) -> Result<Catalog> {
        Catalog::read_csv(File::open(path)?)
    }
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

fn format_field(source: &Source, field: Field) -> String {
    match field {
        Field::Id => source.id.to_string(),
        Field::Tract => source.tract.map(|t| t.to_string()).unwrap_or_default(),
        _ => format_float(source.field(field)),
    }
}

fn parse_float(cell: &str) -> Option<f64> {
    if cell.is_empty() {
        return Some(f64::NAN);
    }
    cell.parse().ok()
}

fn parse_optional(cell: &str) -> Option<Option<f64>> {
    if cell.is_empty() {
        return Some(None);
    }
    cell.parse().ok().map(Some)
}

/// Store `cell` into `field`; `None` when the text does not parse.
fn set_field(source: &mut Source, field: Field, cell: &str) -> Option<()> {
    match field {
        Field::Id => source.id = cell.parse().ok()?,
        Field::Tract => {
            source.tract = if cell.is_empty() {
                None
            } else {
                Some(cell.parse().ok()?)
            }
        }
        Field::Ra => source.ra = parse_optional(cell)?,
        Field::Dec => source.dec = parse_optional(cell)?,
        Field::X => source.x = parse_float(cell)?,
        Field::Y => source.y = parse_float(cell)?,
        Field::XPeak => source.x_peak = parse_float(cell)?,
        Field::YPeak => source.y_peak = parse_float(cell)?,
        Field::Peak => source.peak = parse_float(cell)?,
        Field::Flux => source.flux = parse_float(cell)?,
        Field::Npix => source.npix = parse_float(cell)?,
        Field::A => source.a = parse_float(cell)?,
        Field::B => source.b = parse_float(cell)?,
        Field::Theta => source.theta = parse_float(cell)?,
        Field::RCirc => source.r_circ = parse_float(cell)?,
    }
    Some(())
}
