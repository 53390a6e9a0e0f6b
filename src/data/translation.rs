// translation.rs - CDS validation and translation with NCBI genetic codes

use bio::alphabets::dna;
use std::fmt;
use thiserror::Error;

// Codon tables in TCAG order (index = 16*first + 4*second + third, T=0 C=1 A=2 G=3)
const STANDARD_TABLE: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";
const MYCOPLASMA_TABLE: &[u8; 64] =
    b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

const STANDARD_STARTS: &[&[u8; 3]] = &[b"TTG", b"CTG", b"ATG"];
const MYCOPLASMA_STARTS: &[&[u8; 3]] = &[b"TTA", b"TTG", b"CTG", b"ATT", b"ATC", b"ATA", b"ATG", b"GTG"];
const BACTERIAL_STARTS: &[&[u8; 3]] = &[b"TTG", b"CTG", b"ATT", b"ATC", b"ATA", b"ATG", b"GTG"];

/// NCBI translation table used for CDS validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneticCode {
    id: u8,
    table: &'static [u8; 64],
    starts: &'static [&'static [u8; 3]],
}

impl GeneticCode {
    pub const SUPPORTED: &'static [u8] = &[1, 4, 11];

    pub fn from_id(id: u8) -> Result<Self, String> {
        let (table, starts) = match id {
            1 => (STANDARD_TABLE, STANDARD_STARTS),
            4 => (MYCOPLASMA_TABLE, MYCOPLASMA_STARTS),
            11 => (STANDARD_TABLE, BACTERIAL_STARTS),
            _ => {
                return Err(format!(
                    "Unsupported translation table {} (supported: 1, 4, 11)",
                    id
                ))
            }
        };
        Ok(Self { id, table, starts })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    fn base_index(base: u8) -> Option<usize> {
        match base {
            b'T' => Some(0),
            b'C' => Some(1),
            b'A' => Some(2),
            b'G' => Some(3),
            _ => None,
        }
    }

    /// Amino acid for an upper-case codon, `None` for non-ACGT codons
    pub fn translate_codon(&self, codon: &[u8]) -> Option<u8> {
        if codon.len() != 3 {
            return None;
        }
        let index = Self::base_index(codon[0])? * 16
            + Self::base_index(codon[1])? * 4
            + Self::base_index(codon[2])?;
        Some(self.table[index])
    }

    pub fn is_start(&self, codon: &[u8]) -> bool {
        self.starts.iter().any(|start| &start[..] == codon)
    }

    pub fn is_stop(&self, codon: &[u8]) -> bool {
        self.translate_codon(codon) == Some(b'*')
    }
}

impl Default for GeneticCode {
    fn default() -> Self {
        Self {
            id: 11,
            table: STANDARD_TABLE,
            starts: BACTERIAL_STARTS,
        }
    }
}

/// Reason a CDS could not be translated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("sequence length is not a multiple of 3")]
    NotMultipleOfThree,
    #[error("ambiguous or invalid characters")]
    AmbiguousBases,
    #[error("sequence does not start with a start codon")]
    MissingStartCodon,
    #[error("sequence does not end with a stop codon")]
    MissingStopCodon,
    #[error("internal stop codon")]
    InternalStop,
    #[error("sequence shorter than {minimum} nucleotides ({length})")]
    TooShort { length: usize, minimum: usize },
}

/// Which strand produced the valid reading frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Sense,
    ReverseComplement,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Sense => write!(f, "sense"),
            Orientation::ReverseComplement => write!(f, "revcomp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Protein without the terminal stop
    pub protein: Vec<u8>,
    pub orientation: Orientation,
}

/// Shortest frame that holds a start and a stop codon
const MIN_FRAME_LENGTH: usize = 6;

/// Translate a single frame that must already be a complete CDS
fn translate_frame(sequence: &[u8], code: &GeneticCode) -> Result<Vec<u8>, TranslationError> {
    if sequence.len() % 3 != 0 {
        return Err(TranslationError::NotMultipleOfThree);
    }
    if sequence.len() < MIN_FRAME_LENGTH {
        return Err(TranslationError::TooShort {
            length: sequence.len(),
            minimum: MIN_FRAME_LENGTH,
        });
    }
    if !code.is_start(&sequence[..3]) {
        return Err(TranslationError::MissingStartCodon);
    }
    if !code.is_stop(&sequence[sequence.len() - 3..]) {
        return Err(TranslationError::MissingStopCodon);
    }

    let codons = sequence.len() / 3;
    let mut protein = Vec::with_capacity(codons - 1);
    for (i, codon) in sequence.chunks_exact(3).enumerate().take(codons - 1) {
        let aa = code
            .translate_codon(codon)
            .ok_or(TranslationError::AmbiguousBases)?;
        if aa == b'*' {
            return Err(TranslationError::InternalStop);
        }
        // Alternative start codons are read as methionine
        protein.push(if i == 0 { b'M' } else { aa });
    }
    Ok(protein)
}

/// Validate and translate a CDS, trying the sense strand first.
///
/// When both orientations fail, the sense-strand error is reported.
pub fn translate_cds(
    sequence: &[u8],
    code: &GeneticCode,
    minimum_length: usize,
) -> Result<Translation, TranslationError> {
    let upper = sequence.to_ascii_uppercase();
    if upper.iter().any(|b| !matches!(b, b'A' | b'C' | b'G' | b'T')) {
        return Err(TranslationError::AmbiguousBases);
    }
    if upper.len() < minimum_length {
        return Err(TranslationError::TooShort {
            length: upper.len(),
            minimum: minimum_length,
        });
    }

    match translate_frame(&upper, code) {
        Ok(protein) => Ok(Translation {
            protein,
            orientation: Orientation::Sense,
        }),
        Err(sense_error) => {
            let reverse = dna::revcomp(&upper[..]);
            translate_frame(&reverse, code)
                .map(|protein| Translation {
                    protein,
                    orientation: Orientation::ReverseComplement,
                })
                .map_err(|_| sense_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_valid_cds() {
        let code = GeneticCode::default();
        let result = translate_cds(b"ATGAAAGCTTAA", &code, 0).unwrap();
        assert_eq!(result.protein, b"MKA".to_vec());
        assert_eq!(result.orientation, Orientation::Sense);

        // Lower case and alternative start
        let result = translate_cds(b"gtgaaataa", &code, 0).unwrap();
        assert_eq!(result.protein, b"MK".to_vec());
    }

    #[test]
    fn test_reverse_complement_fallback() {
        let code = GeneticCode::default();
        let reverse = dna::revcomp(&b"ATGAAAGCTTAA"[..]);
        let result = translate_cds(&reverse, &code, 0).unwrap();
        assert_eq!(result.protein, b"MKA".to_vec());
        assert_eq!(result.orientation, Orientation::ReverseComplement);
    }

    #[test]
    fn test_translation_errors() {
        let code = GeneticCode::default();
        assert_eq!(
            translate_cds(b"ATGAAAGCTTA", &code, 0),
            Err(TranslationError::NotMultipleOfThree)
        );
        assert_eq!(
            translate_cds(b"ATGNAAGCTTAA", &code, 0),
            Err(TranslationError::AmbiguousBases)
        );
        assert_eq!(
            translate_cds(b"CCCAAAGCTTAA", &code, 0),
            Err(TranslationError::MissingStartCodon)
        );
        assert_eq!(
            translate_cds(b"ATGAAAGCTGCT", &code, 0),
            Err(TranslationError::MissingStopCodon)
        );
        assert_eq!(
            translate_cds(b"ATGTAAGCTTAA", &code, 0),
            Err(TranslationError::InternalStop)
        );
        assert_eq!(
            translate_cds(b"ATGAAAGCTTAA", &code, 201),
            Err(TranslationError::TooShort { length: 12, minimum: 201 })
        );
    }

    #[test]
    fn test_single_codon_is_too_short() {
        let code = GeneticCode::default();
        let err = translate_cds(b"ATG", &code, 0).unwrap_err();
        assert_eq!(err, TranslationError::TooShort { length: 3, minimum: 6 });
        assert_eq!(err.to_string(), "sequence shorter than 6 nucleotides (3)");
        assert_eq!(
            translate_cds(b"", &code, 0),
            Err(TranslationError::TooShort { length: 0, minimum: 6 })
        );
    }

    #[test]
    fn test_table_4_reads_tga_as_tryptophan() {
        let code = GeneticCode::from_id(4).unwrap();
        assert_eq!(code.translate_codon(b"TGA"), Some(b'W'));
        assert_eq!(
            translate_cds(b"ATGTGATAA", &code, 0).unwrap().protein,
            b"MW".to_vec()
        );
        assert_eq!(
            translate_cds(b"ATGTGATAA", &GeneticCode::default(), 0),
            Err(TranslationError::InternalStop)
        );
    }

    #[test]
    fn test_unsupported_table() {
        assert!(GeneticCode::from_id(2).is_err());
        assert_eq!(GeneticCode::from_id(11).unwrap(), GeneticCode::default());
    }
}
