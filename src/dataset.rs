//! Gzip-compressed CSV datasets written one page at a time.
//!
//! A dataset is created by the first non-empty page and grown by appends. Each
//! append writes a new gzip member, so readers decode the file with
//! [`MultiGzDecoder`] and see a single table with one header row.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, error, info, warn};

use crate::error::{PullError, Result};
use crate::page::{Cursor, PageResult};
use crate::schema::{cell_text, ColumnSchema, Frame, SchemaPolicy};

/// How a page is written to its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate and write a fresh file with a header row.
    Create,
    /// Append rows; a header is written only if the file is new.
    Append,
}

impl FromStr for WriteMode {
    type Err = PullError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "w" | "create" => Ok(WriteMode::Create),
            "a" | "append" => Ok(WriteMode::Append),
            other => Err(PullError::InvalidWriteMode(other.to_string())),
        }
    }
}

/// Path-addressed dataset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    path: PathBuf,
}

impl Dataset {
    /// Dataset stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file exists yet.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Sibling path used for backups: `<path>.bak`.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Moves an existing file aside to `<path>.bak`, replacing any older backup.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.exists() {
            return Ok(None);
        }
        let target = self.backup_path();
        info!(from = %self.path.display(), to = %target.display(), "backing up old file");
        fs::rename(&self.path, &target)?;
        Ok(Some(target))
    }

    /// Writes `frame` in `mode`, returning the number of rows written.
    pub fn write_frame(&self, frame: &Frame, mode: WriteMode) -> Result<usize> {
        if frame.is_empty() {
            return Ok(0);
        }
        let with_header = mode == WriteMode::Create || !self.exists();
        let file = match mode {
            WriteMode::Create => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                debug!(path = %self.path.display(), "writing new csv file");
                File::create(&self.path)?
            }
            WriteMode::Append => {
                debug!(path = %self.path.display(), "appending to existing csv");
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(encoder);
        if with_header {
            writer.write_record(&frame.columns)?;
        }
        for row in &frame.rows {
            writer.write_record(row.iter().map(cell_text))?;
        }
        let encoder = writer
            .into_inner()
            .map_err(|err| PullError::Io(err.into_error()))?;
        encoder.finish()?.flush()?;
        Ok(frame.len())
    }

    /// Reads the header row only.
    pub fn read_header(&self) -> Result<Vec<String>> {
        let mut reader = self.reader()?;
        Ok(reader.headers()?.iter().map(str::to_string).collect())
    }

    /// Reads the header and every row.
    pub fn read_all(&self) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        let mut reader = self.reader()?;
        let header = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok((header, rows))
    }

    /// Reads the named columns, in the order requested.
    pub fn read_columns(&self, names: &[&str]) -> Result<Vec<Vec<String>>> {
        let mut reader = self.reader()?;
        let header = reader.headers()?.clone();
        let indices = names
            .iter()
            .map(|name| {
                header.iter().position(|col| col == *name).ok_or_else(|| {
                    PullError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("column {name:?} missing from {}", self.path.display()),
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                indices
                    .iter()
                    .map(|&idx| record.get(idx).unwrap_or_default().to_string())
                    .collect(),
            );
        }
        Ok(rows)
    }

    fn reader(&self) -> Result<csv::Reader<MultiGzDecoder<BufReader<File>>>> {
        if !self.exists() {
            return Err(PullError::MissingDataset(self.path.clone()));
        }
        let file = File::open(&self.path)?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(MultiGzDecoder::new(BufReader::new(file))))
    }
}

/// Counts echoed back to the paginator after a page is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWrite {
    /// Records in the page.
    pub result_count: u64,
    /// Server total reported with the page.
    pub total_count: u64,
}

/// Projects `page` and writes it to `dataset`.
///
/// Empty pages are skipped whatever the mode. Schema differences are logged and
/// tolerated under [`SchemaPolicy::Warn`]. Without a schema, the first written
/// page fixes the columns and appends are projected onto the existing header.
/// Any failure is logged with the cursor position and returned as
/// [`PullError::Persist`].
pub fn persist(
    page: &PageResult,
    dataset: &Dataset,
    schema: Option<&ColumnSchema>,
    policy: SchemaPolicy,
    mode: WriteMode,
    cursor: Cursor,
) -> Result<PageWrite> {
    let written = if page.is_empty() {
        debug!(?mode, "no data to write");
        Ok(0)
    } else {
        project(page, dataset, schema, policy, mode)
            .and_then(|frame| dataset.write_frame(&frame, mode))
    };
    if let Err(err) = written {
        error!(
            iteration = cursor.processed,
            total = cursor.total,
            error = %err,
            "page write failed"
        );
        return Err(PullError::persist(cursor.processed, cursor.total, err));
    }
    Ok(PageWrite {
        result_count: page.result_count,
        total_count: page.total_count,
    })
}

fn project(
    page: &PageResult,
    dataset: &Dataset,
    schema: Option<&ColumnSchema>,
    policy: SchemaPolicy,
    mode: WriteMode,
) -> Result<Frame> {
    let Some(schema) = schema else {
        if mode == WriteMode::Append && dataset.exists() {
            let layout = ColumnSchema::new(dataset.read_header()?);
            let diff = layout.check(&page.result);
            if !diff.unexpected.is_empty() {
                warn!(dropped = ?diff.unexpected, "fields not in existing header");
            }
            return Ok(Frame::project(&page.result, &layout));
        }
        warn!("no column schema provided: columns may conflict across data pulls");
        return Ok(Frame::natural(&page.result));
    };
    let diff = schema.check(&page.result);
    if !diff.is_clean() {
        match policy {
            SchemaPolicy::Warn => warn!(
                missing = ?diff.missing,
                unexpected = ?diff.unexpected,
                "response columns don't match schema"
            ),
            SchemaPolicy::Fail => {
                return Err(PullError::SchemaMismatch {
                    missing: diff.missing,
                    unexpected: diff.unexpected,
                })
            }
        }
    }
    Ok(Frame::project(&page.result, schema))
}
