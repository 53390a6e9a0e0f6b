// sequence.rs - FASTA reading and writing helpers

use crate::error::{CallerError, Result};
use bio::io::fasta;
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

/// Minimal owned FASTA record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub id: String,
    pub sequence: Vec<u8>,
}

impl SequenceRecord {
    pub fn new(id: impl Into<String>, sequence: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
        }
    }
}

pub const FASTA_EXTENSIONS: &[&str] = &["fasta", "fa", "fas", "fna", "ffn", "fsa"];

pub fn has_fasta_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| FASTA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read every record of a FASTA file
pub fn read_fasta(path: &Path) -> Result<Vec<SequenceRecord>> {
    let file = File::open(path).map_err(|e| CallerError::io(path, e))?;
    let reader = fasta::Reader::new(BufReader::new(file));

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| {
            CallerError::parse(path, format!("invalid FASTA record: {}", e))
        })?;
        records.push(SequenceRecord::new(record.id(), record.seq()));
    }
    Ok(records)
}

/// Write records to a new FASTA file, replacing any existing one
pub fn write_fasta<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let file = File::create(path).map_err(|e| CallerError::io(path, e))?;
    write_records(path, fasta::Writer::new(file), records)
}

/// Append records to an existing FASTA file
pub fn append_fasta<'a, I>(path: &Path, records: I) -> Result<usize>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CallerError::io(path, e))?;
    write_records(path, fasta::Writer::new(file), records)
}

fn write_records<'a, I>(path: &Path, mut writer: fasta::Writer<File>, records: I) -> Result<usize>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut written = 0;
    for (id, sequence) in records {
        writer
            .write(id, None, sequence)
            .map_err(|e| CallerError::io(path, e))?;
        written += 1;
    }
    writer.flush().map_err(|e| CallerError::io(path, e))?;
    Ok(written)
}
