//! Column-oriented table with a declared schema.
//!
//! Used where the column set is not fixed at compile time: cleaning the raw
//! extractor output of many devices and consolidating their feature sets.
//! Column types come from a `Schema` declared up front, never from sniffing
//! the data.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticType {
    Numeric,
    Categorical,
    /// Hex bit-field, decoded rather than scaled or one-hot encoded.
    Flags,
    Label,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, SemanticType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, kind: SemanticType) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    /// Fields requested from the extractor by default, typed.
    pub fn extracted_fields() -> Self {
        let numeric = [
            "frame.len",
            "ip.proto",
            "ip.ttl",
            "ip.len",
            "ip.hdr_len",
            "ip.id",
            "ip.frag_offset",
            "tcp.srcport",
            "tcp.dstport",
            "udp.srcport",
            "udp.dstport",
            "udp.length",
            "tcp.len",
            "tcp.seq",
            "tcp.ack",
            "tcp.hdr_len",
            "tcp.window_size_value",
            "tcp.window_size_scalefactor",
            "tcp.urgent_pointer",
            "tcp.pdu.size",
            "icmp.type",
            "icmp.code",
        ];
        let categorical = [
            "frame.time",
            "frame.protocols",
            "ip.src",
            "ip.dst",
            "ip.checksum",
            "tcp.checksum",
            "tcp.options",
            "udp.checksum",
            "icmp.checksum",
        ];
        let mut schema = Schema::new();
        for name in numeric {
            schema = schema.with(name, SemanticType::Numeric);
        }
        for name in categorical {
            schema = schema.with(name, SemanticType::Categorical);
        }
        schema
            .with("ip.flags", SemanticType::Flags)
            .with("tcp.flags", SemanticType::Flags)
            .with("label", SemanticType::Label)
            .with("label_category", SemanticType::Label)
    }

    pub fn kind_of(&self, name: &str) -> Option<SemanticType> {
        self.fields.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missing_count(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Text(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    fn cell(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) => v[row].map(format_number).unwrap_or_default(),
            ColumnData::Text(v) => v[row].clone().unwrap_or_default(),
        }
    }
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: SemanticType,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: &str, values: Vec<Option<f64>>) -> Self {
        Self { name: name.to_string(), kind: SemanticType::Numeric, data: ColumnData::Numeric(values) }
    }

    pub fn text(name: &str, kind: SemanticType, values: Vec<Option<String>>) -> Self {
        Self { name: name.to_string(), kind, data: ColumnData::Text(values) }
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == SemanticType::Numeric
    }

    pub fn missing_fraction(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.missing_count() as f64 / self.data.len() as f64
    }

    /// Present values of a numeric column.
    pub fn present_values(&self) -> Vec<f64> {
        match &self.data {
            ColumnData::Numeric(v) => v.iter().flatten().copied().collect(),
            ColumnData::Text(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
            return Err(PrepError::Schema(format!(
                "column '{}' has {} rows, expected {}",
                bad.name,
                bad.data.len(),
                rows
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn n_rows(&self) -> usize {
        self.rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn drop_columns(&mut self, names: &[String]) {
        self.columns.retain(|c| !names.contains(&c.name));
    }

    /// Appends the rows of `other`, matching columns by name. Columns
    /// missing on either side are filled with missing values.
    pub fn append(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() {
            *self = other;
            return Ok(());
        }
        let own_rows = self.rows;
        let other_rows = other.rows;
        let mut incoming: BTreeMap<String, Column> =
            other.columns.into_iter().map(|c| (c.name.clone(), c)).collect();

        for column in self.columns.iter_mut() {
            match (incoming.remove(&column.name), &mut column.data) {
                (Some(Column { data: ColumnData::Numeric(v), .. }), ColumnData::Numeric(own)) => own.extend(v),
                (Some(Column { data: ColumnData::Text(v), .. }), ColumnData::Text(own)) => own.extend(v),
                (Some(other_col), _) => {
                    return Err(PrepError::Schema(format!(
                        "column '{}' changes type between chunks",
                        other_col.name
                    )))
                }
                (None, ColumnData::Numeric(own)) => own.extend(std::iter::repeat(None).take(other_rows)),
                (None, ColumnData::Text(own)) => own.extend(std::iter::repeat(None).take(other_rows)),
            }
        }
        for (_, mut column) in incoming {
            match &mut column.data {
                ColumnData::Numeric(v) => {
                    let mut filled = vec![None; own_rows];
                    filled.append(v);
                    *v = filled;
                }
                ColumnData::Text(v) => {
                    let mut filled = vec![None; own_rows];
                    filled.append(v);
                    *v = filled;
                }
            }
            self.columns.push(column);
        }
        self.rows = own_rows + other_rows;
        Ok(())
    }

    /// Reads delimited text. Cells of numeric columns that do not parse are
    /// an error; undeclared columns are kept as text.
    pub fn read_csv<R: Read>(reader: R, delimiter: u8, schema: &Schema) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

        let kinds: Vec<SemanticType> = headers
            .iter()
            .map(|h| {
                schema.kind_of(h).unwrap_or_else(|| {
                    debug!("column '{}' not in schema, reading as text", h);
                    SemanticType::Categorical
                })
            })
            .collect();
        let mut data: Vec<ColumnData> = kinds
            .iter()
            .map(|k| match k {
                SemanticType::Numeric => ColumnData::Numeric(Vec::new()),
                _ => ColumnData::Text(Vec::new()),
            })
            .collect();

        for row in rdr.records() {
            let row = row?;
            for (i, column) in data.iter_mut().enumerate() {
                let cell = row.get(i).map(str::trim).filter(|s| !s.is_empty());
                match column {
                    ColumnData::Numeric(v) => {
                        let value = match cell {
                            Some(s) => Some(s.parse::<f64>().map_err(|e| {
                                PrepError::Parse(format!("column '{}': '{}' is not numeric: {}", headers[i], s, e))
                            })?),
                            None => None,
                        };
                        v.push(value);
                    }
                    ColumnData::Text(v) => v.push(cell.map(str::to_string)),
                }
            }
        }

        let columns = headers
            .into_iter()
            .zip(kinds)
            .zip(data)
            .map(|((name, kind), data)| Column { name, kind, data })
            .collect();
        Table::new(columns)
    }

    pub fn write_csv<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().delimiter(delimiter).from_writer(writer);
        wtr.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for row in 0..self.rows {
            wtr.write_record(self.columns.iter().map(|c| c.data.cell(row)))?;
        }
        wtr.flush()?;
        Ok(())
    }
}
