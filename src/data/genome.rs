// genome.rs - Input genomes, dense ids and CDS coordinates

use crate::error::{CallerError, Result};
use crate::hashers::SequenceDigest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

/// Position of a CDS on its contig, 1-based inclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdsLocation {
    pub contig: String,
    pub start: usize,
    pub end: usize,
    pub strand: Strand,
}

/// A CDS location together with the length of its contig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContigSpan<'a> {
    pub location: &'a CdsLocation,
    pub contig_length: usize,
}

impl ContigSpan<'_> {
    /// Bases between the CDS and the contig ends as (left, right) on the contig
    pub fn margins(&self) -> (usize, usize) {
        let left = self.location.start.saturating_sub(1);
        let right = self.contig_length.saturating_sub(self.location.end);
        (left, right)
    }
}

/// Coordinates for every CDS digest of one genome
#[derive(Debug, Clone, Default)]
pub struct GenomeGeometry {
    pub locations: HashMap<SequenceDigest, Vec<CdsLocation>>,
    pub contig_lengths: HashMap<String, usize>,
}

impl GenomeGeometry {
    pub fn add_cds(&mut self, digest: SequenceDigest, location: CdsLocation) {
        self.locations.entry(digest).or_default().push(location);
    }
}

#[derive(Debug, Clone)]
pub struct Genome {
    pub id: u32,
    pub name: String,
    pub path: PathBuf,
    /// Absent when CDS were supplied directly instead of predicted
    pub geometry: Option<GenomeGeometry>,
}

/// All genomes of a run, indexed by their dense id
#[derive(Debug, Clone, Default)]
pub struct GenomeSet {
    genomes: Vec<Genome>,
}

impl GenomeSet {
    /// Build from genomes whose ids must be `0..n` in order
    pub fn new(genomes: Vec<Genome>) -> Result<Self> {
        if let Some((index, genome)) = genomes
            .iter()
            .enumerate()
            .find(|(i, g)| g.id as usize != *i)
        {
            return Err(CallerError::input(format!(
                "Genome '{}' has id {} at position {}",
                genome.name, genome.id, index
            )));
        }
        Ok(Self { genomes })
    }

    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Genome> {
        self.genomes.get(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Genome> {
        self.genomes.iter()
    }

    pub fn name(&self, id: u32) -> &str {
        self.get(id).map(|g| g.name.as_str()).unwrap_or("?")
    }

    /// Coordinates of the `copy`-th CDS with this digest in a genome.
    ///
    /// `Ok(None)` means the genome has no coordinates at all. A genome with
    /// coordinates that cannot place the digest is a consistency error.
    pub fn locate(
        &self,
        genome: u32,
        digest: &SequenceDigest,
        copy: usize,
    ) -> Result<Option<ContigSpan<'_>>> {
        let entry = self
            .get(genome)
            .ok_or_else(|| CallerError::schema(format!("Unknown genome id {}", genome)))?;
        let geometry = match &entry.geometry {
            Some(geometry) => geometry,
            None => return Ok(None),
        };

        let locations = geometry.locations.get(digest).ok_or_else(|| {
            CallerError::schema(format!(
                "No coordinates for CDS {} in genome '{}'",
                digest, entry.name
            ))
        })?;
        let location = locations.get(copy).ok_or_else(|| {
            CallerError::schema(format!(
                "No coordinates for copy {} of CDS {} in genome '{}' ({} recorded)",
                copy + 1,
                digest,
                entry.name,
                locations.len()
            ))
        })?;
        let contig_length = *geometry.contig_lengths.get(&location.contig).ok_or_else(|| {
            CallerError::schema(format!(
                "Unknown contig '{}' in genome '{}'",
                location.contig, entry.name
            ))
        })?;

        Ok(Some(ContigSpan {
            location,
            contig_length,
        }))
    }
}

/// Genome identifier derived from a file name
pub fn genome_name(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// Resolve the input argument into genome files sorted by lower-cased basename.
///
/// A directory contributes its FASTA files, any other file is read as a list
/// of paths, one per line.
pub fn collect_input_files(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = if input.is_dir() {
        fs::read_dir(input)
            .map_err(|e| CallerError::io(input, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && super::sequence::has_fasta_extension(path))
            .collect()
    } else if input.is_file() {
        let file = fs::File::open(input).map_err(|e| CallerError::io(input, e))?;
        let mut paths = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| CallerError::io(input, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let path = PathBuf::from(trimmed);
            if !path.is_file() {
                return Err(CallerError::input(format!(
                    "Input file '{}' listed in '{}' does not exist",
                    path.display(),
                    input.display()
                )));
            }
            paths.push(path);
        }
        paths
    } else {
        return Err(CallerError::input(format!(
            "Input path '{}' does not exist",
            input.display()
        )));
    };

    if files.is_empty() {
        return Err(CallerError::input(format!(
            "No FASTA files found in '{}'",
            input.display()
        )));
    }

    files.sort_by_key(|path| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });

    let mut seen = HashMap::new();
    for path in &files {
        let name = genome_name(path);
        if let Some(previous) = seen.insert(name.clone(), path.clone()) {
            return Err(CallerError::input(format!(
                "Input files '{}' and '{}' share the identifier '{}'",
                previous.display(),
                path.display(),
                name
            )));
        }
    }

    Ok(files)
}
