//! Rule-driven schema describing which trace attributes a metadata store
//! carries and how they are packed into typed arrays.

use crate::file::segy::{self, Tr, TRACE_HEADER_LEN};
use crate::traits::types::PiolError;

/// Semantic trace attributes understood by the metadata store.
///
/// The set is closed: each key resolves to exactly one storage class and, for
/// keys backed by the trace header, one fixed header location. `Ltn` and
/// `Gtn` are index-only bookkeeping values that never touch the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Copy of the entire raw trace header, verbatim.
    Copy,
    /// Local trace number within the calling rank's shard.
    Ltn,
    /// Global trace number within the file.
    Gtn,
    /// Trace sequence number within the line.
    Tnl,
    /// Trace sequence number within the file.
    Tnr,
    /// Original field record number.
    Tn,
    /// Trace number within the ensemble.
    Tne,
    /// Energy source point number.
    SrcNum,
    /// Shotpoint number.
    ShotNum,
    /// Inline number.
    Il,
    /// Crossline number.
    Xl,
    /// Number of samples in the trace.
    Ns,
    /// Sample interval in microseconds.
    SampleInterval,
    /// Trace identification code.
    Tic,
    /// Number of vertically summed traces.
    VStack,
    /// Number of horizontally stacked traces.
    HStack,
    /// Source to receiver distance.
    Offset,
    /// Receiver group elevation.
    RcvElev,
    /// Surface elevation at the source.
    SrcElev,
    /// Source depth below surface.
    SrcDepth,
    /// Water depth at the source.
    WaterDepthSrc,
    /// Water depth at the receiver group.
    WaterDepthRcv,
    /// Source x coordinate.
    XSrc,
    /// Source y coordinate.
    YSrc,
    /// Receiver x coordinate.
    XRcv,
    /// Receiver y coordinate.
    YRcv,
    /// CMP x coordinate.
    XCmp,
    /// CMP y coordinate.
    YCmp,
}

/// Storage classes a [`Key`] can resolve to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaClass {
    /// 64-bit floating point, read from a scaled integer header field.
    Float,
    /// 64-bit signed integer.
    Long,
    /// 16-bit signed integer.
    Short,
    /// Index bookkeeping value, not present in the file.
    Index,
    /// Raw copy of the whole trace header.
    Copy,
}

/// Placement of one key within a metadata store.
///
/// `slot` numbers within one class are densely packed from zero, so
/// `class_count * record_index + slot` addresses a value in the class array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleEntry {
    /// Scaled floating-point header field.
    Float {
        /// Slot within the float array.
        slot: usize,
        /// Header location of the raw integer value.
        loc: Tr,
        /// Header location of the scale field applied to the raw value.
        scale_loc: Tr,
    },
    /// Integer header field.
    Long {
        /// Slot within the long array.
        slot: usize,
        /// Header location.
        loc: Tr,
    },
    /// 16-bit header field.
    Short {
        /// Slot within the short array.
        slot: usize,
        /// Header location.
        loc: Tr,
    },
    /// Bookkeeping value with no header location.
    Index {
        /// Slot within the index array.
        slot: usize,
    },
    /// Whole-header copy block.
    Copy,
}

impl RuleEntry {
    /// The storage class of this entry.
    pub fn class(&self) -> MetaClass {
        match self {
            RuleEntry::Float { .. } => MetaClass::Float,
            RuleEntry::Long { .. } => MetaClass::Long,
            RuleEntry::Short { .. } => MetaClass::Short,
            RuleEntry::Index { .. } => MetaClass::Index,
            RuleEntry::Copy => MetaClass::Copy,
        }
    }
}

/// Ordered, append-only mapping from [`Key`] to [`RuleEntry`].
///
/// A rule is immutable once constructed except for [`Rule::add_key`] and
/// [`Rule::rm_key`], which renumber slots to keep each class densely packed.
/// It is shared read-only (`Arc<Rule>`) by every metadata store built from
/// it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rule {
    entries: Vec<(Key, RuleEntry)>,
    num_float: usize,
    num_long: usize,
    num_short: usize,
    num_index: usize,
    has_copy: bool,
}

impl Rule {
    /// Build a rule carrying exactly `keys`, in order.
    ///
    /// # Errors
    /// `InvalidInput` if a key appears twice.
    pub fn new(keys: &[Key]) -> Result<Rule, PiolError> {
        let mut rule = Rule::default();
        for &key in keys {
            rule.add_key(key)?;
        }
        Ok(rule)
    }

    /// The default rule: canonical sort keys plus local/global trace numbers.
    pub fn default_rule() -> Rule {
        let keys = [
            Key::XSrc,
            Key::YSrc,
            Key::XRcv,
            Key::YRcv,
            Key::Ltn,
            Key::Gtn,
        ];
        // A fixed key list with no duplicates cannot fail to build.
        Rule::new(&keys).unwrap_or_default()
    }

    /// Append `key` to the rule, assigning the next slot in its class.
    ///
    /// # Errors
    /// `InvalidInput` if the key is already present.
    pub fn add_key(&mut self, key: Key) -> Result<(), PiolError> {
        if self.entry(key).is_some() {
            return Err(PiolError::InvalidInput(format!(
                "key {:?} already present in rule",
                key
            )));
        }
        let entry = match segy::key_spec(key) {
            segy::KeySpec::Float { loc, scale_loc } => {
                let slot = self.num_float;
                self.num_float += 1;
                RuleEntry::Float {
                    slot,
                    loc,
                    scale_loc,
                }
            }
            segy::KeySpec::Long { loc } => {
                let slot = self.num_long;
                self.num_long += 1;
                RuleEntry::Long { slot, loc }
            }
            segy::KeySpec::Short { loc } => {
                let slot = self.num_short;
                self.num_short += 1;
                RuleEntry::Short { slot, loc }
            }
            segy::KeySpec::Index => {
                let slot = self.num_index;
                self.num_index += 1;
                RuleEntry::Index { slot }
            }
            segy::KeySpec::Copy => {
                self.has_copy = true;
                RuleEntry::Copy
            }
        };
        self.entries.push((key, entry));
        Ok(())
    }

    /// Remove `key` from the rule, renumbering later slots of its class so
    /// they stay densely packed. Returns whether the key was present.
    pub fn rm_key(&mut self, key: Key) -> bool {
        let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) else {
            return false;
        };
        let (_, removed) = self.entries.remove(pos);
        let removed_slot = match removed {
            RuleEntry::Float { slot, .. }
            | RuleEntry::Long { slot, .. }
            | RuleEntry::Short { slot, .. }
            | RuleEntry::Index { slot } => slot,
            RuleEntry::Copy => {
                self.has_copy = false;
                return true;
            }
        };
        let class = removed.class();
        match class {
            MetaClass::Float => self.num_float -= 1,
            MetaClass::Long => self.num_long -= 1,
            MetaClass::Short => self.num_short -= 1,
            MetaClass::Index => self.num_index -= 1,
            MetaClass::Copy => {}
        }
        for (_, entry) in self.entries.iter_mut() {
            if entry.class() != class {
                continue;
            }
            let slot = match entry {
                RuleEntry::Float { slot, .. }
                | RuleEntry::Long { slot, .. }
                | RuleEntry::Short { slot, .. }
                | RuleEntry::Index { slot } => slot,
                RuleEntry::Copy => continue,
            };
            if *slot > removed_slot {
                *slot -= 1;
            }
        }
        true
    }

    /// Look up the entry for `key`.
    pub fn entry(&self, key: Key) -> Option<&RuleEntry> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, e)| e)
    }

    /// Keys carried by this rule, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    /// Key/entry pairs, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (Key, &RuleEntry)> + '_ {
        self.entries.iter().map(|(k, e)| (*k, e))
    }

    /// Number of float slots per record.
    pub fn num_float(&self) -> usize {
        self.num_float
    }

    /// Number of long slots per record.
    pub fn num_long(&self) -> usize {
        self.num_long
    }

    /// Number of short slots per record.
    pub fn num_short(&self) -> usize {
        self.num_short
    }

    /// Number of index slots per record.
    pub fn num_index(&self) -> usize {
        self.num_index
    }

    /// Whether records carry a raw header copy block.
    pub fn has_copy(&self) -> bool {
        self.has_copy
    }

    /// Bytes of storage one record occupies under this rule.
    pub fn memory_per_record(&self) -> usize {
        self.num_float * std::mem::size_of::<f64>()
            + self.num_long * std::mem::size_of::<i64>()
            + self.num_short * std::mem::size_of::<i16>()
            + self.num_index * std::mem::size_of::<u64>()
            + if self.has_copy { TRACE_HEADER_LEN } else { 0 }
    }

    /// Bytes one record occupies in a packed exchange payload. Identical to
    /// [`Rule::memory_per_record`]; records are exchanged without padding.
    pub fn pack_size(&self) -> usize {
        self.memory_per_record()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dense_slots_in_insertion_order() {
        let rule = Rule::new(&[Key::XSrc, Key::Gtn, Key::YSrc, Key::Il, Key::Xl]).unwrap();
        assert_eq!(
            matches_slot(rule.entry(Key::XSrc)),
            Some((MetaClass::Float, 0))
        );
        assert_eq!(
            matches_slot(rule.entry(Key::YSrc)),
            Some((MetaClass::Float, 1))
        );
        assert_eq!(
            matches_slot(rule.entry(Key::Il)),
            Some((MetaClass::Long, 0))
        );
        assert_eq!(
            matches_slot(rule.entry(Key::Xl)),
            Some((MetaClass::Long, 1))
        );
        assert_eq!(
            matches_slot(rule.entry(Key::Gtn)),
            Some((MetaClass::Index, 0))
        );
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut rule = Rule::new(&[Key::XSrc]).unwrap();
        assert!(rule.add_key(Key::XSrc).is_err());
    }

    #[test]
    fn test_rm_key_renumbers() {
        let mut rule = Rule::new(&[Key::XSrc, Key::YSrc, Key::XRcv]).unwrap();
        assert!(rule.rm_key(Key::YSrc));
        assert!(!rule.rm_key(Key::YSrc));
        assert_eq!(
            matches_slot(rule.entry(Key::XSrc)),
            Some((MetaClass::Float, 0))
        );
        assert_eq!(
            matches_slot(rule.entry(Key::XRcv)),
            Some((MetaClass::Float, 1))
        );
        assert_eq!(rule.num_float(), 2);
        assert!(rule.entry(Key::YSrc).is_none());
    }

    #[test]
    fn test_memory_per_record() {
        let rule = Rule::new(&[Key::XSrc, Key::Il, Key::Tic, Key::Gtn, Key::Copy]).unwrap();
        assert_eq!(rule.memory_per_record(), 8 + 8 + 2 + 8 + TRACE_HEADER_LEN);
    }

    fn matches_slot(entry: Option<&RuleEntry>) -> Option<(MetaClass, usize)> {
        entry.map(|e| {
            let slot = match e {
                RuleEntry::Float { slot, .. }
                | RuleEntry::Long { slot, .. }
                | RuleEntry::Short { slot, .. }
                | RuleEntry::Index { slot } => *slot,
                RuleEntry::Copy => 0,
            };
            (e.class(), slot)
        })
    }
}
