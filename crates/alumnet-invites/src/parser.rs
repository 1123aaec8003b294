//! Upload parsing.
//!
//! Turns a delimited text file or a spreadsheet workbook into ordered
//! [`CandidateRow`]s. Any structural problem rejects the whole upload; no
//! partial result is ever returned.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Reader};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum upload size (10MB default).
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Maximum data rows per upload.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const REQUIRED_COLUMNS: [&str; 3] = ["full_name", "college_email", "personal_email"];

/// Upload-level failures. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("File is empty")]
    Empty,

    #[error("File too large: {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: usize, max: usize },

    #[error("File exceeds maximum row limit of {max}")]
    TooManyRows { max: usize },

    #[error("Missing required headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("File has a header row but no data rows")]
    NoDataRows,

    /// Truncated, corrupt or undecodable content.
    #[error("Corrupt file: {0}")]
    Corrupt(String),
}

/// Supported CSV delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvDelimiter {
    #[default]
    Comma,
    Semicolon,
    Tab,
    Pipe,
}

impl CsvDelimiter {
    #[must_use]
    pub fn as_byte(&self) -> u8 {
        match self {
            CsvDelimiter::Comma => b',',
            CsvDelimiter::Semicolon => b';',
            CsvDelimiter::Tab => b'\t',
            CsvDelimiter::Pipe => b'|',
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "," | "comma" => Ok(CsvDelimiter::Comma),
            ";" | "semicolon" => Ok(CsvDelimiter::Semicolon),
            "\t" | "tab" | "\\t" => Ok(CsvDelimiter::Tab),
            "|" | "pipe" => Ok(CsvDelimiter::Pipe),
            _ => Err(format!(
                "Invalid delimiter '{s}'. Valid values: ',', ';', '\\t', '|'"
            )),
        }
    }
}

/// Declared format of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFormat {
    /// Delimited text (`.csv`, `.tsv`, `.txt`).
    Delimited(CsvDelimiter),
    /// Spreadsheet workbook (`.xlsx`, `.xls`, `.xlsm`, `.ods`); first sheet only.
    Workbook,
}

impl UploadFormat {
    /// Infer the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self, ParseError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" | "txt" => Ok(UploadFormat::Delimited(CsvDelimiter::Comma)),
            "tsv" => Ok(UploadFormat::Delimited(CsvDelimiter::Tab)),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Ok(UploadFormat::Workbook),
            _ => Err(ParseError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// Size limits applied before and during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_file_size: usize,
    pub max_rows: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// One raw data row as it appeared in the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRow {
    /// 1-based, header excluded. Blank rows are skipped but still counted.
    pub row_index: u32,
    pub full_name: String,
    pub college_email: String,
    pub personal_email: String,
    pub grad_year: Option<String>,
    pub degree: Option<String>,
    pub major: Option<String>,
}

/// Parse an upload into candidate rows.
pub fn parse_upload(
    data: &[u8],
    format: UploadFormat,
    limits: &ParseLimits,
) -> Result<Vec<CandidateRow>, ParseError> {
    if data.len() > limits.max_file_size {
        return Err(ParseError::FileTooLarge {
            size: data.len(),
            max: limits.max_file_size,
        });
    }

    let rows = match format {
        UploadFormat::Delimited(delimiter) => parse_delimited(data, delimiter, limits)?,
        UploadFormat::Workbook => parse_workbook(data, limits)?,
    };

    tracing::debug!(rows = rows.len(), ?format, "Parsed upload");
    Ok(rows)
}

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(UTF8_BOM) {
        &data[UTF8_BOM.len()..]
    } else {
        data
    }
}

fn parse_delimited(
    data: &[u8],
    delimiter: CsvDelimiter,
    limits: &ParseLimits,
) -> Result<Vec<CandidateRow>, ParseError> {
    let data = strip_utf8_bom(data);
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }
    // The csv reader closes an open quote at EOF and yields a partial record.
    if ends_inside_quotes(data, delimiter.as_byte()) {
        return Err(ParseError::Corrupt("unterminated quoted field".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter.as_byte())
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ParseError::Corrupt(format!("Failed to read headers: {e}")))?
        .iter()
        .map(ToString::to_string)
        .collect();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut table = TableBuilder::new(columns, limits.max_rows);
    for result in reader.records() {
        let record = result.map_err(|e| ParseError::Corrupt(e.to_string()))?;
        // Physical line numbers keep skipped blank lines counted.
        let row_index = record
            .position()
            .map_or(table.next_index(), |pos| line_to_row_index(pos.line()));
        let cells: Vec<String> = record.iter().map(ToString::to_string).collect();
        table.push(row_index, &cells)?;
    }

    table.finish()
}

/// Whether `data` ends inside a quoted field.
///
/// A quote only opens a quoted field at the start of a field; `""` inside one
/// is an escaped quote.
fn ends_inside_quotes(data: &[u8], delimiter: u8) -> bool {
    let mut in_quotes = false;
    let mut field_start = true;
    let mut bytes = data.iter().copied().peekable();

    while let Some(b) = bytes.next() {
        if in_quotes {
            if b == b'"' {
                if bytes.peek() == Some(&b'"') {
                    bytes.next();
                } else {
                    in_quotes = false;
                }
            }
        } else if b == b'"' && field_start {
            in_quotes = true;
            field_start = false;
        } else {
            field_start = b == delimiter || b == b'\n' || b == b'\r';
        }
    }

    in_quotes
}

fn line_to_row_index(line: u64) -> u32 {
    u32::try_from(line.saturating_sub(1)).unwrap_or(u32::MAX)
}

fn parse_workbook(data: &[u8], limits: &ParseLimits) -> Result<Vec<CandidateRow>, ParseError> {
    if data.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| ParseError::Corrupt(format!("Unreadable workbook: {e}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ParseError::Empty)?
        .map_err(|e| ParseError::Corrupt(format!("Unreadable sheet: {e}")))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or(ParseError::Empty)?
        .iter()
        .map(ToString::to_string)
        .collect();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut table = TableBuilder::new(columns, limits.max_rows);
    for (idx, row) in rows.enumerate() {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        table.push(u32::try_from(idx + 1).unwrap_or(u32::MAX), &cells)?;
    }

    table.finish()
}

/// Canonical column name for a header cell, if it is one we read.
fn canonical_column(header: &str) -> Option<&'static str> {
    let normalized: String = header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    match normalized.as_str() {
        "full_name" | "name" | "fullname" => Some("full_name"),
        "college_email" | "institution_email" | "institutional_email" | "university_email" => {
            Some("college_email")
        }
        "personal_email" | "email" => Some("personal_email"),
        "grad_year" | "graduation_year" | "year" | "batch" => Some("grad_year"),
        "degree" => Some("degree"),
        "major" | "branch" | "department" => Some("major"),
        _ => None,
    }
}

/// Positions of the known columns in a header row.
#[derive(Debug)]
struct ColumnMap {
    positions: HashMap<&'static str, usize>,
}

impl ColumnMap {
    fn from_headers(headers: &[String]) -> Result<Self, ParseError> {
        let mut positions = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if let Some(column) = canonical_column(header) {
                // First occurrence wins.
                positions.entry(column).or_insert(idx);
            }
        }

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !positions.contains_key(*c))
            .map(|c| (*c).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::MissingHeaders(missing));
        }

        Ok(Self { positions })
    }

    fn get(&self, cells: &[String], column: &str) -> Option<String> {
        self.positions
            .get(column)
            .and_then(|&idx| cells.get(idx))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

struct TableBuilder {
    columns: ColumnMap,
    max_rows: usize,
    rows: Vec<CandidateRow>,
    last_index: u32,
}

impl TableBuilder {
    fn new(columns: ColumnMap, max_rows: usize) -> Self {
        Self {
            columns,
            max_rows,
            rows: Vec::new(),
            last_index: 0,
        }
    }

    fn next_index(&self) -> u32 {
        self.last_index.saturating_add(1)
    }

    fn push(&mut self, row_index: u32, cells: &[String]) -> Result<(), ParseError> {
        self.last_index = row_index;

        if cells.iter().all(|c| c.trim().is_empty()) {
            return Ok(());
        }

        if self.rows.len() >= self.max_rows {
            return Err(ParseError::TooManyRows { max: self.max_rows });
        }

        let field = |column: &str| self.columns.get(cells, column);
        let row = CandidateRow {
            row_index,
            full_name: field("full_name").unwrap_or_default(),
            college_email: field("college_email").unwrap_or_default(),
            personal_email: field("personal_email").unwrap_or_default(),
            grad_year: field("grad_year"),
            degree: field("degree"),
            major: field("major"),
        };
        self.rows.push(row);
        Ok(())
    }

    fn finish(self) -> Result<Vec<CandidateRow>, ParseError> {
        if self.rows.is_empty() {
            return Err(ParseError::NoDataRows);
        }
        Ok(self.rows)
    }
}
