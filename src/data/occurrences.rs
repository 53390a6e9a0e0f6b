// occurrences.rs - Compact integer-list codec for digest occurrence lists

//! Occurrence lists (genome ids for DNA digests, distinct-DNA indices for
//! protein digests) are stored in the polyline encoding: each value is the
//! delta from the previous one, zig-zag mapped to a non-negative integer and
//! emitted as 5-bit groups, least significant first, offset by 63 so every
//! byte is printable ASCII. Continuation groups carry the `0x20` bit.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const CHUNK_BITS: u32 = 5;
const CHUNK_MASK: i64 = 0x1f;
const CONTINUATION: i64 = 0x20;
const ASCII_OFFSET: i64 = 63;

fn push_value(value: i64, out: &mut String) {
    let mut v = if value < 0 { !(value << 1) } else { value << 1 };
    while v >= CONTINUATION {
        out.push(((CONTINUATION | (v & CHUNK_MASK)) + ASCII_OFFSET) as u8 as char);
        v >>= CHUNK_BITS;
    }
    out.push((v + ASCII_OFFSET) as u8 as char);
}

/// Encode a list of integers; order and duplicates are preserved
pub fn encode(values: &[u32]) -> String {
    let mut out = String::with_capacity(values.len() * 2);
    let mut previous: i64 = 0;
    for &value in values {
        let value = i64::from(value);
        push_value(value - previous, &mut out);
        previous = value;
    }
    out
}

/// Decode a polyline string back into integers
pub fn decode(encoded: &str) -> Result<Vec<u32>, String> {
    let bytes = encoded.as_bytes();
    let mut values = Vec::new();
    let mut index = 0;
    let mut previous: i64 = 0;

    while index < bytes.len() {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *bytes
                .get(index)
                .ok_or_else(|| format!("Truncated occurrence list '{}'", encoded))?;
            index += 1;
            let chunk = i64::from(byte) - ASCII_OFFSET;
            if !(0..0x40).contains(&chunk) {
                return Err(format!(
                    "Invalid character '{}' in occurrence list",
                    byte as char
                ));
            }
            if shift > 35 {
                return Err(format!("Occurrence list value overflow in '{}'", encoded));
            }
            result |= (chunk & CHUNK_MASK) << shift;
            shift += CHUNK_BITS;
            if chunk < CONTINUATION {
                break;
            }
        }

        let delta = if result & 1 == 1 { !(result >> 1) } else { result >> 1 };
        let value = previous + delta;
        let value = u32::try_from(value)
            .map_err(|_| format!("Occurrence list value {} out of range", value))?;
        values.push(value);
        previous = i64::from(value);
    }

    Ok(values)
}

/// Sorted, encoded list of integer keys attached to one digest.
///
/// Multiplicity is kept: a genome carrying two identical CDS copies appears
/// twice. Every instance holds a valid encoding, deserialization included.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OccurrenceList {
    encoded: String,
    len: usize,
}

impl OccurrenceList {
    pub fn from_values(mut values: Vec<u32>) -> Self {
        values.sort_unstable();
        Self {
            encoded: encode(&values),
            len: values.len(),
        }
    }

    pub fn from_encoded(encoded: &str) -> Result<Self, String> {
        let values = decode(encoded)?;
        if values.windows(2).any(|w| w[0] > w[1]) {
            return Err(format!("Occurrence list '{}' is not sorted", encoded));
        }
        Ok(Self {
            encoded: encoded.to_string(),
            len: values.len(),
        })
    }

    pub fn values(&self) -> Vec<u32> {
        // Construction guarantees a valid encoding.
        decode(&self.encoded).unwrap_or_default()
    }

    pub fn as_encoded(&self) -> &str {
        &self.encoded
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Multiset union of two lists
    pub fn merge(&self, other: &OccurrenceList) -> OccurrenceList {
        let mut values = self.values();
        values.extend(other.values());
        OccurrenceList::from_values(values)
    }

    /// Distinct keys, ascending
    pub fn distinct(&self) -> Vec<u32> {
        let mut values = self.values();
        values.dedup();
        values
    }
}

impl Serialize for OccurrenceList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de> Deserialize<'de> for OccurrenceList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        OccurrenceList::from_encoded(&encoded).map_err(serde::de::Error::custom)
    }
}
