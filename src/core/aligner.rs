// aligner.rs - Protein alignment collaborator interface and BLAST implementation

use crate::data::sequence::read_fasta;
use crate::error::{CallerError, Result};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use which::which;

/// Queries shorter than this need the short-sequence BLAST task
pub const SHORT_QUERY_LENGTH: usize = 30;

/// One tabular alignment row: `qseqid qstart qend qlen sseqid slen score`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlignmentRow {
    pub query_id: String,
    pub query_start: usize,
    pub query_end: usize,
    pub query_length: usize,
    pub target_id: String,
    pub target_length: usize,
    pub raw_score: f64,
}

/// Inputs of one alignment call
#[derive(Debug, Clone, Copy)]
pub struct AlignmentRequest<'a> {
    pub query: &'a Path,
    pub database: &'a Path,
    /// File with one target id per line restricting the search
    pub restrict_to: Option<&'a Path>,
    pub output: &'a Path,
    /// Threads the aligner may use for this call
    pub threads: usize,
}

/// External local-alignment engine
pub trait Aligner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a protein database from a FASTA file
    fn build_database(&self, fasta: &Path, database: &Path) -> Result<()>;

    /// Align query proteins against a database, best HSP per pair
    fn align(&self, request: &AlignmentRequest<'_>) -> Result<Vec<AlignmentRow>>;
}

/// Parse BLAST tabular output in the column order above
pub fn parse_alignment_rows(path: &Path) -> Result<Vec<AlignmentRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| CallerError::parse(path, e.to_string()))?;

    reader
        .deserialize::<AlignmentRow>()
        .map(|row| row.map_err(|e| CallerError::parse(path, e.to_string())))
        .collect()
}

/// BLAST+ `blastp` / `makeblastdb` wrapper
#[derive(Debug, Clone)]
pub struct BlastAligner {
    blastp: PathBuf,
    makeblastdb: PathBuf,
    evalue: f64,
}

impl BlastAligner {
    /// Locate the BLAST binaries in `blast_dir`, or on PATH when absent
    pub fn locate(blast_dir: Option<&Path>) -> Result<Self> {
        let find = |tool: &str| -> Result<PathBuf> {
            match blast_dir {
                Some(dir) => {
                    let path = dir.join(tool);
                    if path.is_file() {
                        Ok(path)
                    } else {
                        Err(CallerError::input(format!(
                            "'{}' not found in {}",
                            tool,
                            dir.display()
                        )))
                    }
                }
                None => which(tool).map_err(|e| CallerError::input(format!("{}: {}", tool, e))),
            }
        };

        Ok(Self {
            blastp: find("blastp")?,
            makeblastdb: find("makeblastdb")?,
            evalue: 0.001,
        })
    }

    fn run(&self, tool: &str, program: &Path, args: &[String]) -> Result<()> {
        debug!("Running '{} {}'", program.display(), args.join(" "));
        let start = Instant::now();
        let res = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| CallerError::collaborator(tool, e.to_string()))?;

        let stderr = String::from_utf8_lossy(&res.stderr);
        if !res.status.success() {
            return Err(CallerError::collaborator(
                tool,
                format!("{} ({})", res.status, stderr.trim()),
            ));
        }
        if !stderr.trim().is_empty() {
            return Err(CallerError::collaborator(tool, stderr.trim().to_string()));
        }
        debug!("{} finished in {:.2}s", tool, start.elapsed().as_secs_f64());
        Ok(())
    }

    fn needs_short_task(query: &Path) -> Result<bool> {
        Ok(read_fasta(query)?
            .iter()
            .any(|record| record.sequence.len() < SHORT_QUERY_LENGTH))
    }
}

impl Aligner for BlastAligner {
    fn name(&self) -> &'static str {
        "blastp"
    }

    fn build_database(&self, fasta: &Path, database: &Path) -> Result<()> {
        let args = vec![
            "-in".to_string(),
            fasta.to_string_lossy().to_string(),
            "-out".to_string(),
            database.to_string_lossy().to_string(),
            "-parse_seqids".to_string(),
            "-dbtype".to_string(),
            "prot".to_string(),
        ];
        // makeblastdb reports progress on stdout only; stderr stays empty on success
        self.run("makeblastdb", &self.makeblastdb, &args)
    }

    fn align(&self, request: &AlignmentRequest<'_>) -> Result<Vec<AlignmentRow>> {
        let mut args = vec![
            "-db".to_string(),
            request.database.to_string_lossy().to_string(),
            "-query".to_string(),
            request.query.to_string_lossy().to_string(),
            "-out".to_string(),
            request.output.to_string_lossy().to_string(),
            "-outfmt".to_string(),
            "6 qseqid qstart qend qlen sseqid slen score".to_string(),
            "-max_hsps".to_string(),
            "1".to_string(),
            "-num_threads".to_string(),
            request.threads.max(1).to_string(),
            "-evalue".to_string(),
            self.evalue.to_string(),
        ];
        if let Some(ids) = request.restrict_to {
            args.push("-seqidlist".to_string());
            args.push(ids.to_string_lossy().to_string());
        }
        if Self::needs_short_task(request.query)? {
            args.push("-task".to_string());
            args.push("blastp-short".to_string());
        }

        self.run("blastp", &self.blastp, &args)?;
        parse_alignment_rows(request.output)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process aligner for tests: ungapped prefix alignment scoring one
    //! point per identical residue.

    use super::*;
    use crate::data::SequenceRecord;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct MockAligner {
        databases: Mutex<HashMap<PathBuf, Vec<SequenceRecord>>>,
        pub(crate) align_calls: AtomicUsize,
        max_threads: AtomicUsize,
    }

    impl MockAligner {
        pub(crate) fn calls(&self) -> usize {
            self.align_calls.load(Ordering::SeqCst)
        }

        /// Largest per-call thread count requested so far
        pub(crate) fn max_threads(&self) -> usize {
            self.max_threads.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn score(query: &[u8], target: &[u8]) -> usize {
        query.iter().zip(target).filter(|(a, b)| a == b).count()
    }

    impl Aligner for MockAligner {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn build_database(&self, fasta: &Path, database: &Path) -> Result<()> {
            let records = read_fasta(fasta)?;
            self.databases
                .lock()
                .map_err(|_| CallerError::collaborator("mock", "poisoned"))?
                .insert(database.to_path_buf(), records);
            Ok(())
        }

        fn align(&self, request: &AlignmentRequest<'_>) -> Result<Vec<AlignmentRow>> {
            self.align_calls.fetch_add(1, Ordering::SeqCst);
            self.max_threads.fetch_max(request.threads, Ordering::SeqCst);
            let queries = read_fasta(request.query)?;
            let targets = self
                .databases
                .lock()
                .map_err(|_| CallerError::collaborator("mock", "poisoned"))?
                .get(request.database)
                .cloned()
                .ok_or_else(|| CallerError::collaborator("mock", "unknown database"))?;
            let allowed: Option<HashSet<String>> = match request.restrict_to {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .map_err(|e| CallerError::io(path, e))?
                        .lines()
                        .map(|l| l.trim().to_string())
                        .collect(),
                ),
                None => None,
            };

            let mut rows = Vec::new();
            for query in &queries {
                for target in &targets {
                    if let Some(allowed) = &allowed {
                        if !allowed.contains(&target.id) {
                            continue;
                        }
                    }
                    let matches = score(&query.sequence, &target.sequence);
                    if matches == 0 {
                        continue;
                    }
                    rows.push(AlignmentRow {
                        query_id: query.id.clone(),
                        query_start: 1,
                        query_end: query.sequence.len().min(target.sequence.len()),
                        query_length: query.sequence.len(),
                        target_id: target.id.clone(),
                        target_length: target.sequence.len(),
                        raw_score: matches as f64,
                    });
                }
            }
            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_alignment_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.tsv");
        fs::write(
            &path,
            "r0_0\t1\t100\t100\tp3\t98\t512\nr0_0\t5\t90\t100\tp7\t120\t401.5\n",
        )
        .unwrap();

        let rows = parse_alignment_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].query_id, "r0_0");
        assert_eq!(rows[0].target_id, "p3");
        assert_eq!(rows[1].query_start, 5);
        assert_eq!(rows[1].raw_score, 401.5);
    }

    #[test]
    fn test_parse_empty_and_malformed_output() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.tsv");
        fs::write(&empty, "").unwrap();
        assert!(parse_alignment_rows(&empty).unwrap().is_empty());

        let bad = dir.path().join("bad.tsv");
        fs::write(&bad, "r0_0\tone\t100\t100\tp3\t98\t512\n").unwrap();
        assert!(matches!(parse_alignment_rows(&bad), Err(CallerError::Parse { .. })));
    }

    #[test]
    fn test_locate_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = BlastAligner::locate(Some(dir.path())).unwrap_err();
        assert!(matches!(err, CallerError::Input(_)));
    }

    #[test]
    fn test_mock_aligner_restriction() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("db.fasta");
        fs::write(&fasta, ">p0\nMKTA\n>p1\nMKTV\n").unwrap();
        let query = dir.path().join("q.fasta");
        fs::write(&query, ">r0_0\nMKTA\n").unwrap();
        let ids = dir.path().join("ids.txt");
        fs::write(&ids, "p1\n").unwrap();

        let aligner = testing::MockAligner::default();
        let db = dir.path().join("db");
        aligner.build_database(&fasta, &db).unwrap();
        let output = dir.path().join("out.tsv");
        let rows = aligner
            .align(&AlignmentRequest {
                query: &query,
                database: &db,
                restrict_to: Some(&ids),
                output: &output,
                threads: 1,
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target_id, "p1");
        assert_eq!(rows[0].raw_score, 3.0);
        assert_eq!(aligner.calls(), 1);
    }
}
