//! Stata `.dta` reader in pure Rust.
//!
//! Supports the two on-disk layouts in circulation:
//! - releases 113, 114, 115: fixed 109-byte header followed by descriptor
//!   blocks, expansion fields, data and value-label tables;
//! - releases 117, 118, 119: tag-delimited sections (`<stata_dta>`, `<map>`,
//!   `<data>`, ...) located through the 14-entry offset map.
//!
//! Missing codes (`.` and `.a`–`.z`) are read as nulls. Numeric variables
//! with an attached value-label set can be converted to their labels.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use polars::prelude::*;
use tracing::debug;

use crate::error::PanelError;

type Result<T> = std::result::Result<T, PanelError>;

// ── Public types ──────────────────────────────────────────────────────────

/// Storage type of a single variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Byte,
    Int,
    Long,
    Float,
    Double,
    /// Fixed-width string of the given byte length.
    Str(usize),
    /// Long string stored in the `<strls>` section (117+).
    StrL,
}

impl StorageType {
    /// Bytes per cell in the data section.
    fn width(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Int => 2,
            Self::Long | Self::Float => 4,
            Self::Double | Self::StrL => 8,
            Self::Str(n) => *n,
        }
    }
}

/// A variable (column) descriptor.
#[derive(Debug, Clone)]
pub struct DtaVariable {
    pub name: String,
    pub storage: StorageType,
    pub format: String,
    /// Name of the attached value-label set, if any.
    pub value_label: Option<String>,
    pub label: String,
}

/// Decoded column values.
#[derive(Debug, Clone, PartialEq)]
pub enum DtaColumn {
    Numeric(Vec<Option<f64>>),
    Text(Vec<String>),
}

/// A fully decoded `.dta` file.
#[derive(Debug, Clone)]
pub struct DtaFile {
    pub release: u16,
    pub data_label: String,
    pub n_obs: usize,
    pub variables: Vec<DtaVariable>,
    pub columns: Vec<DtaColumn>,
    /// Value-label sets: set name -> (value -> label).
    pub value_labels: HashMap<String, BTreeMap<i32, String>>,
}

/// Read a `.dta` file into a DataFrame, converting labelled numerics to labels.
pub fn read_dta(path: &Path) -> Result<DataFrame> {
    let bytes = std::fs::read(path)?;
    let file = DtaFile::parse(&bytes)?;
    debug!(
        release = file.release,
        variables = file.variables.len(),
        observations = file.n_obs,
        "parsed stata file"
    );
    file.into_dataframe(true)
}

// ── Byte cursor ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            endian: Endian::Little,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(PanelError::Stata(format!(
                "offset {pos} beyond end of file ({} bytes)",
                self.buf.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(PanelError::Stata(format!(
                "unexpected end of file at byte {} (wanted {n} more)",
                self.pos
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, nbytes: usize) -> Result<u64> {
        let b = self.take(nbytes)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_uint(b, nbytes),
            Endian::Little => LittleEndian::read_uint(b, nbytes),
        })
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(self.uint(2)? as u16)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(self.uint(4)? as u32)
    }

    fn u64(&mut self) -> Result<u64> {
        self.uint(8)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_f32(b),
            Endian::Little => LittleEndian::read_f32(b),
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(match self.endian {
            Endian::Big => BigEndian::read_f64(b),
            Endian::Little => LittleEndian::read_f64(b),
        })
    }

    fn peek_is(&self, tag: &str) -> bool {
        self.buf[self.pos.min(self.buf.len())..].starts_with(tag.as_bytes())
    }

    fn expect(&mut self, tag: &str) -> Result<()> {
        if !self.peek_is(tag) {
            return Err(PanelError::Stata(format!(
                "expected '{tag}' at byte {}",
                self.pos
            )));
        }
        self.pos += tag.len();
        Ok(())
    }
}

// ── Value decoding ────────────────────────────────────────────────────────

/// Stata's largest non-missing values per integer type.
const MAX_BYTE: i8 = 100;
const MAX_INT: i16 = 32_740;
const MAX_LONG: i32 = 2_147_483_620;

fn float_is_missing(v: f32) -> bool {
    v.is_nan() || v >= 2f32.powi(127)
}

fn double_is_missing(v: f64) -> bool {
    v.is_nan() || v >= 2f64.powi(1023)
}

/// Fixed-width string: cut at the first NUL, decode by release.
fn decode_str(bytes: &[u8], release: u16) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let raw = &bytes[..end];
    if release >= 118 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        // Latin-1: every byte maps to the code point of the same value.
        raw.iter().map(|&b| b as char).collect()
    }
}

fn read_numeric(cur: &mut Cursor<'_>, storage: StorageType) -> Result<Option<f64>> {
    Ok(match storage {
        StorageType::Byte => {
            let v = cur.u8()? as i8;
            (v <= MAX_BYTE).then_some(v as f64)
        }
        StorageType::Int => {
            let v = cur.i16()?;
            (v <= MAX_INT).then_some(v as f64)
        }
        StorageType::Long => {
            let v = cur.i32()?;
            (v <= MAX_LONG).then_some(v as f64)
        }
        StorageType::Float => {
            let v = cur.f32()?;
            (!float_is_missing(v)).then_some(v as f64)
        }
        StorageType::Double => {
            let v = cur.f64()?;
            (!double_is_missing(v)).then_some(v)
        }
        StorageType::Str(_) | StorageType::StrL => unreachable!("string storage"),
    })
}

// ── Parsing ───────────────────────────────────────────────────────────────

/// Per-column buffers while reading observations.
enum Builder {
    Numeric(Vec<Option<f64>>),
    Text(Vec<String>),
    StrL(Vec<(u64, u64)>),
}

impl DtaFile {
    /// Parse a complete `.dta` byte buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(b"<stata_dta>") {
            Self::parse_tagged(bytes)
        } else {
            Self::parse_fixed(bytes)
        }
    }

    /// Releases 113–115.
    fn parse_fixed(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let release = cur.u8()? as u16;
        if !(113..=115).contains(&release) {
            return Err(PanelError::Stata(format!(
                "unsupported release {release} (expected 113-115 or 117-119)"
            )));
        }
        cur.endian = match cur.u8()? {
            1 => Endian::Big,
            2 => Endian::Little,
            other => return Err(PanelError::Stata(format!("invalid byte order flag {other}"))),
        };
        cur.skip(2)?; // filetype, unused
        let nvar = cur.u16()? as usize;
        let n_obs = cur.u32()? as usize;
        let data_label = decode_str(cur.take(81)?, release);
        cur.skip(18)?; // timestamp

        let mut storages = Vec::with_capacity(nvar);
        for _ in 0..nvar {
            storages.push(match cur.u8()? {
                251 => StorageType::Byte,
                252 => StorageType::Int,
                253 => StorageType::Long,
                254 => StorageType::Float,
                255 => StorageType::Double,
                n @ 1..=244 => StorageType::Str(n as usize),
                other => {
                    return Err(PanelError::Stata(format!("unknown type code {other}")))
                }
            });
        }
        let names = read_fixed_strings(&mut cur, nvar, 33, release)?;
        cur.skip(2 * (nvar + 1))?; // sort list
        let fmt_len = if release == 113 { 12 } else { 49 };
        let formats = read_fixed_strings(&mut cur, nvar, fmt_len, release)?;
        let label_names = read_fixed_strings(&mut cur, nvar, 33, release)?;
        let labels = read_fixed_strings(&mut cur, nvar, 81, release)?;

        // Expansion fields: (type u8, len u32) records until (0, 0).
        loop {
            let kind = cur.u8()?;
            let len = cur.u32()? as usize;
            if kind == 0 && len == 0 {
                break;
            }
            cur.skip(len)?;
        }

        let variables = assemble_variables(names, storages, formats, label_names, labels);
        let builders = read_observations(&mut cur, &variables, n_obs, release)?;
        let columns = finish_columns(builders, &HashMap::new())?;

        let mut value_labels = HashMap::new();
        while cur.remaining() >= 4 + 33 + 3 {
            let len = cur.i32()? as usize;
            let name = decode_str(cur.take(33)?, release);
            cur.skip(3)?;
            let table = cur.take(len)?;
            value_labels.insert(name, parse_label_table(table, cur.endian, release)?);
        }

        Ok(Self {
            release,
            data_label,
            n_obs,
            variables,
            columns,
            value_labels,
        })
    }

    /// Releases 117–119.
    fn parse_tagged(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        cur.expect("<stata_dta><header><release>")?;
        let release: u16 = std::str::from_utf8(cur.take(3)?)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PanelError::Stata("unreadable release tag".into()))?;
        if !(117..=119).contains(&release) {
            return Err(PanelError::Stata(format!("unsupported release {release}")));
        }
        cur.expect("</release><byteorder>")?;
        cur.endian = match cur.take(3)? {
            b"MSF" => Endian::Big,
            b"LSF" => Endian::Little,
            other => {
                return Err(PanelError::Stata(format!(
                    "invalid byte order '{}'",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        cur.expect("</byteorder><K>")?;
        let nvar = if release == 119 {
            cur.u32()? as usize
        } else {
            cur.u16()? as usize
        };
        cur.expect("</K><N>")?;
        let n_obs = if release == 117 {
            cur.u32()? as usize
        } else {
            cur.u64()? as usize
        };
        cur.expect("</N><label>")?;
        let label_len = if release == 117 {
            cur.u8()? as usize
        } else {
            cur.u16()? as usize
        };
        let data_label = decode_str(cur.take(label_len)?, release);
        cur.expect("</label><timestamp>")?;
        let ts_len = cur.u8()? as usize;
        cur.skip(ts_len)?;
        cur.expect("</timestamp></header>")?;

        cur.expect("<map>")?;
        let mut map = [0usize; 14];
        for slot in map.iter_mut() {
            *slot = cur.u64()? as usize;
        }
        cur.expect("</map>")?;

        let name_len = if release == 117 { 33 } else { 129 };
        let fmt_len = if release == 117 { 49 } else { 57 };
        let vlabel_len = if release == 117 { 81 } else { 321 };

        cur.seek(map[2])?;
        cur.expect("<variable_types>")?;
        let mut storages = Vec::with_capacity(nvar);
        for _ in 0..nvar {
            storages.push(match cur.u16()? {
                n @ 1..=2045 => StorageType::Str(n as usize),
                32768 => StorageType::StrL,
                65526 => StorageType::Double,
                65527 => StorageType::Float,
                65528 => StorageType::Long,
                65529 => StorageType::Int,
                65530 => StorageType::Byte,
                other => {
                    return Err(PanelError::Stata(format!("unknown type code {other}")))
                }
            });
        }

        cur.seek(map[3])?;
        cur.expect("<varnames>")?;
        let names = read_fixed_strings(&mut cur, nvar, name_len, release)?;

        cur.seek(map[5])?;
        cur.expect("<formats>")?;
        let formats = read_fixed_strings(&mut cur, nvar, fmt_len, release)?;

        cur.seek(map[6])?;
        cur.expect("<value_label_names>")?;
        let label_names = read_fixed_strings(&mut cur, nvar, name_len, release)?;

        cur.seek(map[7])?;
        cur.expect("<variable_labels>")?;
        let labels = read_fixed_strings(&mut cur, nvar, vlabel_len, release)?;

        let variables = assemble_variables(names, storages, formats, label_names, labels);

        cur.seek(map[9])?;
        cur.expect("<data>")?;
        let builders = read_observations(&mut cur, &variables, n_obs, release)?;

        cur.seek(map[10])?;
        cur.expect("<strls>")?;
        let mut strls: HashMap<(u64, u64), String> = HashMap::new();
        while cur.peek_is("GSO") {
            cur.skip(3)?;
            let v = cur.u32()? as u64;
            let o = if release == 117 {
                cur.u32()? as u64
            } else {
                cur.u64()?
            };
            let kind = cur.u8()?;
            let len = cur.u32()? as usize;
            let payload = cur.take(len)?;
            // 130 = ASCII with trailing NUL, 129 = binary.
            let text = if kind == 130 {
                decode_str(payload, release)
            } else {
                String::from_utf8_lossy(payload).into_owned()
            };
            strls.insert((v, o), text);
        }
        cur.expect("</strls>")?;
        let columns = finish_columns(builders, &strls)?;

        cur.seek(map[11])?;
        cur.expect("<value_labels>")?;
        let mut value_labels = HashMap::new();
        while cur.peek_is("<lbl>") {
            cur.skip(5)?;
            let len = cur.i32()? as usize;
            let name = decode_str(cur.take(name_len)?, release);
            cur.skip(3)?;
            let table = cur.take(len)?;
            value_labels.insert(name, parse_label_table(table, cur.endian, release)?);
            cur.expect("</lbl>")?;
        }
        cur.expect("</value_labels>")?;

        Ok(Self {
            release,
            data_label,
            n_obs,
            variables,
            columns,
            value_labels,
        })
    }

    /// Convert to a polars DataFrame.
    ///
    /// With `convert_labels`, numeric variables carrying a value-label set
    /// become String columns holding the label (or the number when a value
    /// has no label).
    pub fn into_dataframe(self, convert_labels: bool) -> Result<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.variables.len());
        for (var, values) in self.variables.iter().zip(self.columns) {
            let table = var
                .value_label
                .as_ref()
                .filter(|_| convert_labels)
                .and_then(|name| self.value_labels.get(name));

            let series = match (values, table) {
                (DtaColumn::Numeric(v), Some(table)) => {
                    let labelled: Vec<Option<String>> = v
                        .iter()
                        .map(|x| {
                            x.map(|x| {
                                table
                                    .get(&(x as i32))
                                    .cloned()
                                    .unwrap_or_else(|| format_number(x))
                            })
                        })
                        .collect();
                    Series::new(var.name.as_str().into(), labelled)
                }
                (DtaColumn::Numeric(v), None) => Series::new(var.name.as_str().into(), v),
                (DtaColumn::Text(v), _) => Series::new(var.name.as_str().into(), v),
            };
            columns.push(series.into());
        }
        Ok(DataFrame::new(columns)?)
    }
}

fn format_number(x: f64) -> String {
    if x.fract() == 0.0 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

fn read_fixed_strings(
    cur: &mut Cursor<'_>,
    count: usize,
    width: usize,
    release: u16,
) -> Result<Vec<String>> {
    (0..count)
        .map(|_| Ok(decode_str(cur.take(width)?, release)))
        .collect()
}

fn assemble_variables(
    names: Vec<String>,
    storages: Vec<StorageType>,
    formats: Vec<String>,
    label_names: Vec<String>,
    labels: Vec<String>,
) -> Vec<DtaVariable> {
    names
        .into_iter()
        .zip(storages)
        .zip(formats)
        .zip(label_names)
        .zip(labels)
        .map(|((((name, storage), format), value_label), label)| DtaVariable {
            name,
            storage,
            format,
            value_label: (!value_label.is_empty()).then_some(value_label),
            label,
        })
        .collect()
}

fn read_observations(
    cur: &mut Cursor<'_>,
    variables: &[DtaVariable],
    n_obs: usize,
    release: u16,
) -> Result<Vec<Builder>> {
    let row_width: usize = variables.iter().map(|v| v.storage.width()).sum();
    if cur.remaining() < row_width.saturating_mul(n_obs) {
        return Err(PanelError::Stata(format!(
            "data section truncated: {n_obs} rows of {row_width} bytes declared"
        )));
    }

    let mut builders: Vec<Builder> = variables
        .iter()
        .map(|v| match v.storage {
            StorageType::Str(_) => Builder::Text(Vec::with_capacity(n_obs)),
            StorageType::StrL => Builder::StrL(Vec::with_capacity(n_obs)),
            _ => Builder::Numeric(Vec::with_capacity(n_obs)),
        })
        .collect();

    for _ in 0..n_obs {
        for (var, builder) in variables.iter().zip(builders.iter_mut()) {
            match builder {
                Builder::Numeric(out) => out.push(read_numeric(cur, var.storage)?),
                Builder::Text(out) => {
                    let width = var.storage.width();
                    out.push(decode_str(cur.take(width)?, release));
                }
                Builder::StrL(out) => out.push(read_strl_ref(cur, release)?),
            }
        }
    }
    Ok(builders)
}

/// `(v, o)` reference of a strL cell; the split of its 8 bytes depends on release.
fn read_strl_ref(cur: &mut Cursor<'_>, release: u16) -> Result<(u64, u64)> {
    let (v_len, o_len) = match release {
        117 => (4, 4),
        118 => (2, 6),
        _ => (3, 5),
    };
    if cur.endian == Endian::Big {
        // Big-endian files store the whole 8 bytes as one number with v high.
        let packed = cur.uint(8)?;
        let o_bits = 8 * o_len as u32;
        return Ok((packed >> o_bits, packed & ((1u64 << o_bits) - 1)));
    }
    let v = cur.uint(v_len)?;
    let o = cur.uint(o_len)?;
    Ok((v, o))
}

fn finish_columns(
    builders: Vec<Builder>,
    strls: &HashMap<(u64, u64), String>,
) -> Result<Vec<DtaColumn>> {
    builders
        .into_iter()
        .map(|b| {
            Ok(match b {
                Builder::Numeric(v) => DtaColumn::Numeric(v),
                Builder::Text(v) => DtaColumn::Text(v),
                Builder::StrL(refs) => DtaColumn::Text(
                    refs.into_iter()
                        .map(|key| {
                            // (0, 0) is the empty string.
                            if key == (0, 0) {
                                return Ok(String::new());
                            }
                            strls.get(&key).cloned().ok_or_else(|| {
                                PanelError::Stata(format!(
                                    "strL reference ({}, {}) has no GSO entry",
                                    key.0, key.1
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
            })
        })
        .collect()
}

/// Value-label table: n, txtlen, off[n], val[n], txt[txtlen].
fn parse_label_table(
    table: &[u8],
    endian: Endian,
    release: u16,
) -> Result<BTreeMap<i32, String>> {
    let mut cur = Cursor::new(table);
    cur.endian = endian;
    let n = cur.i32()?.max(0) as usize;
    let txt_len = cur.i32()?.max(0) as usize;
    let offsets = (0..n)
        .map(|_| Ok(cur.i32()? as usize))
        .collect::<Result<Vec<_>>>()?;
    let values = (0..n).map(|_| cur.i32()).collect::<Result<Vec<_>>>()?;
    let text = cur.take(txt_len)?;

    let mut out = BTreeMap::new();
    for (off, val) in offsets.into_iter().zip(values) {
        if off >= text.len() {
            return Err(PanelError::Stata(format!(
                "value label offset {off} outside text block of {} bytes",
                text.len()
            )));
        }
        out.insert(val, decode_str(&text[off..], release));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn fixed(s: &str, width: usize) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.resize(width, 0);
        out
    }

    fn label_table(entries: &[(i32, &str)]) -> Vec<u8> {
        let mut txt = Vec::new();
        let mut offs = Vec::new();
        for (_, label) in entries {
            offs.push(txt.len() as i32);
            txt.extend_from_slice(label.as_bytes());
            txt.push(0);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as i32).to_le_bytes());
        out.extend_from_slice(&(txt.len() as i32).to_le_bytes());
        for o in offs {
            out.extend_from_slice(&o.to_le_bytes());
        }
        for (v, _) in entries {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&txt);
        out
    }

    /// One observation's value in a release-114 test file.
    pub(crate) enum Cell<'a> {
        Str(&'a str),
        Byte(i8),
        Int(i16),
        Double(f64),
    }

    /// Little-endian release-114 file.
    ///
    /// `vars` holds `(name, type code, value-label set)`; an empty set name
    /// leaves the variable unlabelled.
    pub(crate) fn build_114(
        vars: &[(&str, u8, &str)],
        rows: &[Vec<Cell<'_>>],
        label_sets: &[(&str, Vec<(i32, &str)>)],
    ) -> Vec<u8> {
        let mut b = vec![114u8, 2, 1, 0];
        b.extend_from_slice(&(vars.len() as u16).to_le_bytes());
        b.extend_from_slice(&(rows.len() as u32).to_le_bytes());
        b.extend(fixed("panel", 81));
        b.extend(fixed("01 Jan 2014 00:00", 18));
        b.extend(vars.iter().map(|&(_, code, _)| code));
        for &(name, _, _) in vars {
            b.extend(fixed(name, 33));
        }
        b.extend(vec![0u8; 2 * (vars.len() + 1)]);
        for &(_, code, _) in vars {
            let fmt = if code <= 244 {
                format!("%{code}s")
            } else {
                "%9.0g".to_string()
            };
            b.extend(fixed(&fmt, 49));
        }
        for &(_, _, lbl) in vars {
            b.extend(fixed(lbl, 33));
        }
        for _ in vars {
            b.extend(fixed("", 81));
        }
        b.push(0);
        b.extend_from_slice(&0u32.to_le_bytes());

        for row in rows {
            for (cell, &(_, code, _)) in row.iter().zip(vars) {
                match cell {
                    Cell::Str(v) => b.extend(fixed(v, code as usize)),
                    Cell::Byte(v) => b.push(*v as u8),
                    Cell::Int(v) => b.extend_from_slice(&v.to_le_bytes()),
                    Cell::Double(v) => b.extend_from_slice(&v.to_le_bytes()),
                }
            }
        }

        for (name, entries) in label_sets {
            let table = label_table(entries);
            b.extend_from_slice(&(table.len() as i32).to_le_bytes());
            b.extend(fixed(name, 33));
            b.extend_from_slice(&[0, 0, 0]);
            b.extend(table);
        }
        b
    }

    /// Variables city (str8), year (int), nrcp (byte), score (double),
    /// level (byte, labelled).
    pub(crate) fn sample_114() -> Vec<u8> {
        let rows = [
            ("Agra", 1998, 0, 450.0, 1),
            ("Agra", 2001, 1, 450.0, 1),
            ("Kanpur", 2001, 101, 2f64.powi(1023), 2),
        ]
        .map(|(city, year, nrcp, score, level)| {
            vec![
                Cell::Str(city),
                Cell::Int(year),
                Cell::Byte(nrcp),
                Cell::Double(score),
                Cell::Byte(level),
            ]
        });
        build_114(
            &[
                ("city", 8, ""),
                ("year", 252, ""),
                ("nrcp", 251, ""),
                ("score", 255, ""),
                ("level", 251, "lvl"),
            ],
            &rows,
            &[("lvl", vec![(1, "Moderate"), (2, "Very High")])],
        )
    }

    /// Little-endian release-118 file with a strL river and a labelled level.
    pub(crate) fn sample_118() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"<stata_dta><header><release>118</release><byteorder>LSF</byteorder><K>");
        b.extend_from_slice(&3u16.to_le_bytes());
        b.extend_from_slice(b"</K><N>");
        b.extend_from_slice(&2u64.to_le_bytes());
        b.extend_from_slice(b"</N><label>");
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(b"</label><timestamp>");
        b.push(0);
        b.extend_from_slice(b"</timestamp></header>");

        let map_pos = b.len() + "<map>".len();
        b.extend_from_slice(b"<map>");
        b.extend(vec![0u8; 14 * 8]);
        b.extend_from_slice(b"</map>");
        let mut map = [0u64; 14];

        map[2] = b.len() as u64;
        b.extend_from_slice(b"<variable_types>");
        for code in [32768u16, 65526, 65530] {
            b.extend_from_slice(&code.to_le_bytes());
        }
        b.extend_from_slice(b"</variable_types>");

        map[3] = b.len() as u64;
        b.extend_from_slice(b"<varnames>");
        for name in ["river", "bod", "level"] {
            b.extend(fixed(name, 129));
        }
        b.extend_from_slice(b"</varnames>");

        map[4] = b.len() as u64;
        b.extend_from_slice(b"<sortlist>");
        b.extend(vec![0u8; 2 * 4]);
        b.extend_from_slice(b"</sortlist>");

        map[5] = b.len() as u64;
        b.extend_from_slice(b"<formats>");
        for fmt in ["%9s", "%10.0g", "%9.0g"] {
            b.extend(fixed(fmt, 57));
        }
        b.extend_from_slice(b"</formats>");

        map[6] = b.len() as u64;
        b.extend_from_slice(b"<value_label_names>");
        for lbl in ["", "", "lvl"] {
            b.extend(fixed(lbl, 129));
        }
        b.extend_from_slice(b"</value_label_names>");

        map[7] = b.len() as u64;
        b.extend_from_slice(b"<variable_labels>");
        for _ in 0..3 {
            b.extend(fixed("", 321));
        }
        b.extend_from_slice(b"</variable_labels>");

        map[8] = b.len() as u64;
        b.extend_from_slice(b"<characteristics></characteristics>");

        map[9] = b.len() as u64;
        b.extend_from_slice(b"<data>");
        // row 1: strL (v=1, o=1), bod 3.5, level 4
        b.extend_from_slice(&1u16.to_le_bytes());
        b.extend_from_slice(&1u64.to_le_bytes()[..6]);
        b.extend_from_slice(&3.5f64.to_le_bytes());
        b.push(4);
        // row 2: empty strL, missing bod (.a), level missing
        b.extend(vec![0u8; 8]);
        b.extend_from_slice(&(2f64.powi(1023) * 1.001).to_le_bytes());
        b.push(101);
        b.extend_from_slice(b"</data>");

        map[10] = b.len() as u64;
        b.extend_from_slice(b"<strls>GSO");
        b.extend_from_slice(&1u32.to_le_bytes());
        b.extend_from_slice(&1u64.to_le_bytes());
        b.push(130);
        b.extend_from_slice(&7u32.to_le_bytes());
        b.extend_from_slice(b"Ganges\0");
        b.extend_from_slice(b"</strls>");

        map[11] = b.len() as u64;
        b.extend_from_slice(b"<value_labels><lbl>");
        let table = label_table(&[(4, "Alarming")]);
        b.extend_from_slice(&(table.len() as i32).to_le_bytes());
        b.extend(fixed("lvl", 129));
        b.extend_from_slice(&[0, 0, 0]);
        b.extend(table);
        b.extend_from_slice(b"</lbl></value_labels>");

        map[12] = b.len() as u64;
        b.extend_from_slice(b"</stata_dta>");
        map[13] = b.len() as u64;

        for (i, off) in map.iter().enumerate() {
            let at = map_pos + i * 8;
            b[at..at + 8].copy_from_slice(&off.to_le_bytes());
        }
        b
    }

    #[test]
    fn test_parse_114_values_and_missing() {
        let file = DtaFile::parse(&sample_114()).unwrap();
        assert_eq!(file.release, 114);
        assert_eq!(file.n_obs, 3);
        assert_eq!(file.data_label, "panel");
        assert_eq!(file.variables[0].storage, StorageType::Str(8));
        assert_eq!(file.variables[4].value_label.as_deref(), Some("lvl"));

        assert_eq!(
            file.columns[0],
            DtaColumn::Text(vec!["Agra".into(), "Agra".into(), "Kanpur".into()])
        );
        // byte 101 and double 2^1023 are missing codes
        assert_eq!(
            file.columns[2],
            DtaColumn::Numeric(vec![Some(0.0), Some(1.0), None])
        );
        assert_eq!(
            file.columns[3],
            DtaColumn::Numeric(vec![Some(450.0), Some(450.0), None])
        );
        assert_eq!(file.value_labels["lvl"][&2], "Very High");
    }

    #[test]
    fn test_114_to_dataframe_converts_labels() {
        let df = DtaFile::parse(&sample_114())
            .unwrap()
            .into_dataframe(true)
            .unwrap();
        assert_eq!(df.shape(), (3, 5));
        let level = df.column("level").unwrap().str().unwrap();
        assert_eq!(level.get(0), Some("Moderate"));
        assert_eq!(level.get(2), Some("Very High"));
        let year = df.column("year").unwrap().f64().unwrap();
        assert_eq!(year.get(1), Some(2001.0));
    }

    #[test]
    fn test_parse_118_strl_and_labels() {
        let file = DtaFile::parse(&sample_118()).unwrap();
        assert_eq!(file.release, 118);
        assert_eq!(file.n_obs, 2);
        assert_eq!(file.variables[0].storage, StorageType::StrL);
        assert_eq!(
            file.columns[0],
            DtaColumn::Text(vec!["Ganges".into(), String::new()])
        );
        assert_eq!(file.columns[1], DtaColumn::Numeric(vec![Some(3.5), None]));

        let df = file.into_dataframe(true).unwrap();
        let level = df.column("level").unwrap().str().unwrap();
        assert_eq!(level.get(0), Some("Alarming"));
        assert_eq!(level.get(1), None);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let bytes = sample_114();
        let err = DtaFile::parse(&bytes[..200]).unwrap_err();
        assert!(matches!(err, PanelError::Stata(_)), "got {err:?}");
    }

    #[test]
    fn test_unsupported_release() {
        let mut bytes = sample_114();
        bytes[0] = 110;
        assert!(DtaFile::parse(&bytes).is_err());
    }
}
