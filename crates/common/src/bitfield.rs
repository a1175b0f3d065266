use serde::{Deserialize, Deserializer, Serialize};

/// Per-record chunk availability vector
///
/// A fixed-length ordered sequence of presence bits, one per chunk in the
/// owning metadata record's block list, in block-list order. Two bitfields
/// for the same record are comparable bit by bit.
///
/// Deserialization validates that the bit vector matches the declared
/// length, so a malformed wire bitfield fails at decode instead of
/// corrupting availability bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bitfield {
    len: usize,
    bits: Vec<u8>,
}

impl<'de> Deserialize<'de> for Bitfield {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            len: usize,
            bits: Vec<u8>,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.bits.len() != raw.len.div_ceil(8) {
            return Err(serde::de::Error::custom(
                "bitfield bit vector does not match declared length",
            ));
        }
        Ok(Self {
            len: raw.len,
            bits: raw.bits,
        })
    }
}

impl Bitfield {
    /// An all-absent bitfield of the given length
    pub fn new(len: usize) -> Self {
        Self {
            len,
            bits: vec![0u8; len.div_ceil(8)],
        }
    }

    /// An all-present bitfield of the given length
    pub fn full(len: usize) -> Self {
        let mut bf = Self::new(len);
        for idx in 0..len {
            bf.set(idx, true);
        }
        bf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Presence bit at `idx`; out-of-range reads as absent
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        self.bits
            .get(idx / 8)
            .is_some_and(|byte| byte & (1 << (idx % 8)) != 0)
    }

    /// Set the presence bit at `idx`; out-of-range is ignored
    pub fn set(&mut self, idx: usize, present: bool) {
        if idx >= self.len {
            debug_assert!(false, "bitfield index {} out of range {}", idx, self.len);
            return;
        }
        if present {
            self.bits[idx / 8] |= 1 << (idx % 8);
        } else {
            self.bits[idx / 8] &= !(1 << (idx % 8));
        }
    }

    pub fn count_ones(&self) -> usize {
        self.iter_ones().count()
    }

    pub fn is_full(&self) -> bool {
        self.count_ones() == self.len
    }

    /// Indices of bits present in `other` but absent here
    pub fn missing_in(&self, other: &Bitfield) -> Vec<usize> {
        (0..self.len.max(other.len))
            .filter(|&idx| other.get(idx) && !self.get(idx))
            .collect()
    }

    /// Indices of present bits
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&idx| self.get(idx))
    }
}
