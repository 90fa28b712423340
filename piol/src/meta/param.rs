//! Per-rank, in-memory trace metadata records packed into typed arrays.

use std::sync::Arc;

use crate::file::segy::TRACE_HEADER_LEN;
use crate::meta::rule::{Key, Rule, RuleEntry};
use crate::traits::types::PiolError;

/// A fixed number of trace records stored class-major under a shared
/// [`Rule`].
///
/// Each storage class owns one flat array of length
/// `class_count * num_records`; entry `slot` of record `i` lives at
/// `class_count * i + slot`. The store has no I/O or rank awareness; it is
/// exclusively owned by its local rank and crosses rank boundaries only as
/// an explicit packed payload.
#[derive(Clone, Debug)]
pub struct TraceMetadata {
    rule: Arc<Rule>,
    num_records: usize,
    floats: Vec<f64>,
    longs: Vec<i64>,
    shorts: Vec<i16>,
    indexes: Vec<u64>,
    copies: Vec<u8>,
}

impl TraceMetadata {
    /// Allocate a zero-filled store for `num_records` records under `rule`.
    pub fn new(rule: Arc<Rule>, num_records: usize) -> TraceMetadata {
        let copy_len = if rule.has_copy() {
            num_records * TRACE_HEADER_LEN
        } else {
            0
        };
        TraceMetadata {
            floats: vec![0.0; rule.num_float() * num_records],
            longs: vec![0; rule.num_long() * num_records],
            shorts: vec![0; rule.num_short() * num_records],
            indexes: vec![0; rule.num_index() * num_records],
            copies: vec![0; copy_len],
            rule,
            num_records,
        }
    }

    /// The rule this store was built from.
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// Number of records held.
    pub fn size(&self) -> usize {
        self.num_records
    }

    /// Estimated bytes held, from the class-array capacities.
    pub fn memory_usage(&self) -> usize {
        self.floats.capacity() * std::mem::size_of::<f64>()
            + self.longs.capacity() * std::mem::size_of::<i64>()
            + self.shorts.capacity() * std::mem::size_of::<i16>()
            + self.indexes.capacity() * std::mem::size_of::<u64>()
            + self.copies.capacity()
    }

    /// Read `key` of record `i` as a float, coercing integer classes.
    ///
    /// # Errors
    /// `EntryNotFound` if the rule does not carry `key`, or carries it as a
    /// raw copy block.
    pub fn get_f64(&self, i: usize, key: Key) -> Result<f64, PiolError> {
        match self.rule.entry(key) {
            Some(RuleEntry::Float { slot, .. }) => {
                Ok(self.floats[self.rule.num_float() * i + slot])
            }
            Some(RuleEntry::Long { slot, .. }) => {
                Ok(self.longs[self.rule.num_long() * i + slot] as f64)
            }
            Some(RuleEntry::Short { slot, .. }) => {
                Ok(f64::from(self.shorts[self.rule.num_short() * i + slot]))
            }
            Some(RuleEntry::Index { slot }) => {
                Ok(self.indexes[self.rule.num_index() * i + slot] as f64)
            }
            Some(RuleEntry::Copy) | None => Err(PiolError::EntryNotFound(key)),
        }
    }

    /// Write `key` of record `i` as a float, coercing to the entry's class.
    ///
    /// # Errors
    /// `EntryNotFound` as for [`TraceMetadata::get_f64`].
    pub fn set_f64(&mut self, i: usize, key: Key, val: f64) -> Result<(), PiolError> {
        match self.rule.entry(key) {
            Some(RuleEntry::Float { slot, .. }) => {
                let idx = self.rule.num_float() * i + slot;
                self.floats[idx] = val;
                Ok(())
            }
            Some(RuleEntry::Long { slot, .. }) => {
                let idx = self.rule.num_long() * i + slot;
                self.longs[idx] = val as i64;
                Ok(())
            }
            Some(RuleEntry::Short { slot, .. }) => {
                let idx = self.rule.num_short() * i + slot;
                self.shorts[idx] = val as i16;
                Ok(())
            }
            Some(RuleEntry::Index { slot }) => {
                let idx = self.rule.num_index() * i + slot;
                self.indexes[idx] = val as u64;
                Ok(())
            }
            Some(RuleEntry::Copy) | None => Err(PiolError::EntryNotFound(key)),
        }
    }

    /// Read `key` of record `i` as a signed integer, coercing other classes.
    ///
    /// # Errors
    /// `EntryNotFound` as for [`TraceMetadata::get_f64`].
    pub fn get_i64(&self, i: usize, key: Key) -> Result<i64, PiolError> {
        match self.rule.entry(key) {
            Some(RuleEntry::Float { slot, .. }) => {
                Ok(self.floats[self.rule.num_float() * i + slot] as i64)
            }
            Some(RuleEntry::Long { slot, .. }) => {
                Ok(self.longs[self.rule.num_long() * i + slot])
            }
            Some(RuleEntry::Short { slot, .. }) => {
                Ok(i64::from(self.shorts[self.rule.num_short() * i + slot]))
            }
            Some(RuleEntry::Index { slot }) => {
                Ok(self.indexes[self.rule.num_index() * i + slot] as i64)
            }
            Some(RuleEntry::Copy) | None => Err(PiolError::EntryNotFound(key)),
        }
    }

    /// Write `key` of record `i` as a signed integer.
    ///
    /// # Errors
    /// `EntryNotFound` as for [`TraceMetadata::get_f64`].
    pub fn set_i64(&mut self, i: usize, key: Key, val: i64) -> Result<(), PiolError> {
        match self.rule.entry(key) {
            Some(RuleEntry::Float { slot, .. }) => {
                let idx = self.rule.num_float() * i + slot;
                self.floats[idx] = val as f64;
                Ok(())
            }
            Some(RuleEntry::Long { slot, .. }) => {
                let idx = self.rule.num_long() * i + slot;
                self.longs[idx] = val;
                Ok(())
            }
            Some(RuleEntry::Short { slot, .. }) => {
                let idx = self.rule.num_short() * i + slot;
                self.shorts[idx] = val as i16;
                Ok(())
            }
            Some(RuleEntry::Index { slot }) => {
                let idx = self.rule.num_index() * i + slot;
                self.indexes[idx] = val as u64;
                Ok(())
            }
            Some(RuleEntry::Copy) | None => Err(PiolError::EntryNotFound(key)),
        }
    }

    /// Read `key` of record `i` as an unsigned index value.
    ///
    /// # Errors
    /// `EntryNotFound` as for [`TraceMetadata::get_f64`].
    pub fn get_index(&self, i: usize, key: Key) -> Result<u64, PiolError> {
        match self.rule.entry(key) {
            Some(RuleEntry::Index { slot }) => Ok(self.indexes[self.rule.num_index() * i + slot]),
            Some(RuleEntry::Long { slot, .. }) => {
                Ok(self.longs[self.rule.num_long() * i + slot] as u64)
            }
            Some(RuleEntry::Float { slot, .. }) => {
                Ok(self.floats[self.rule.num_float() * i + slot] as u64)
            }
            Some(RuleEntry::Short { slot, .. }) => {
                Ok(self.shorts[self.rule.num_short() * i + slot] as u64)
            }
            Some(RuleEntry::Copy) | None => Err(PiolError::EntryNotFound(key)),
        }
    }

    /// Write `key` of record `i` as an unsigned index value.
    ///
    /// # Errors
    /// `EntryNotFound` as for [`TraceMetadata::get_f64`].
    pub fn set_index(&mut self, i: usize, key: Key, val: u64) -> Result<(), PiolError> {
        self.set_i64(i, key, val as i64)
    }

    /// The raw header copy block of record `i`, when the rule carries one.
    pub fn copy_block(&self, i: usize) -> Option<&[u8]> {
        if self.rule.has_copy() {
            Some(&self.copies[i * TRACE_HEADER_LEN..(i + 1) * TRACE_HEADER_LEN])
        } else {
            None
        }
    }

    /// Mutable raw header copy block of record `i`.
    pub fn copy_block_mut(&mut self, i: usize) -> Option<&mut [u8]> {
        if self.rule.has_copy() {
            Some(&mut self.copies[i * TRACE_HEADER_LEN..(i + 1) * TRACE_HEADER_LEN])
        } else {
            None
        }
    }

    /// Copy record `src_i` of `src` into record `dst_i` of `self`, key by
    /// key, for every key present in both rules. Keys absent from either
    /// rule are left untouched, so stores with differing rules can shuffle
    /// records without re-deriving a schema.
    pub fn copy_entries(&mut self, dst_i: usize, src: &TraceMetadata, src_i: usize) {
        let dst_rule = Arc::clone(&self.rule);
        for (key, dst_entry) in dst_rule.entries() {
            let Some(src_entry) = src.rule.entry(key) else {
                continue;
            };
            match (dst_entry, src_entry) {
                (RuleEntry::Float { slot: d, .. }, RuleEntry::Float { slot: s, .. }) => {
                    self.floats[dst_rule.num_float() * dst_i + d] =
                        src.floats[src.rule.num_float() * src_i + s];
                }
                (RuleEntry::Long { slot: d, .. }, RuleEntry::Long { slot: s, .. }) => {
                    self.longs[dst_rule.num_long() * dst_i + d] =
                        src.longs[src.rule.num_long() * src_i + s];
                }
                (RuleEntry::Short { slot: d, .. }, RuleEntry::Short { slot: s, .. }) => {
                    self.shorts[dst_rule.num_short() * dst_i + d] =
                        src.shorts[src.rule.num_short() * src_i + s];
                }
                (RuleEntry::Index { slot: d }, RuleEntry::Index { slot: s }) => {
                    self.indexes[dst_rule.num_index() * dst_i + d] =
                        src.indexes[src.rule.num_index() * src_i + s];
                }
                (RuleEntry::Copy, RuleEntry::Copy) => {
                    let dst_at = dst_i * TRACE_HEADER_LEN;
                    let src_at = src_i * TRACE_HEADER_LEN;
                    self.copies[dst_at..dst_at + TRACE_HEADER_LEN]
                        .copy_from_slice(&src.copies[src_at..src_at + TRACE_HEADER_LEN]);
                }
                // A key resolves to one class globally, so mismatched pairs
                // cannot be built through the public constructors.
                _ => {}
            }
        }
    }

    /// Copy of records `start..start + count` as a fresh store.
    pub fn slice(&self, start: usize, count: usize) -> TraceMetadata {
        let mut out = TraceMetadata::new(Arc::clone(&self.rule), count);
        for i in 0..count {
            out.copy_entries(i, self, start + i);
        }
        out
    }

    /// Pack records `start..start + count` into a byte payload for a
    /// neighbor exchange. Layout is class-major: the float rows, then long,
    /// short, index, and copy rows.
    pub fn pack(&self, start: usize, count: usize) -> Vec<u8> {
        let nf = self.rule.num_float();
        let nl = self.rule.num_long();
        let nsh = self.rule.num_short();
        let ni = self.rule.num_index();
        let mut out = Vec::with_capacity(count * self.rule.pack_size());
        out.extend_from_slice(bytemuck::cast_slice(
            &self.floats[start * nf..(start + count) * nf],
        ));
        out.extend_from_slice(bytemuck::cast_slice(
            &self.longs[start * nl..(start + count) * nl],
        ));
        out.extend_from_slice(bytemuck::cast_slice(
            &self.shorts[start * nsh..(start + count) * nsh],
        ));
        out.extend_from_slice(bytemuck::cast_slice(
            &self.indexes[start * ni..(start + count) * ni],
        ));
        if self.rule.has_copy() {
            out.extend_from_slice(
                &self.copies[start * TRACE_HEADER_LEN..(start + count) * TRACE_HEADER_LEN],
            );
        }
        out
    }

    /// Pack every record. Shorthand for [`TraceMetadata::pack`] over the
    /// whole store.
    pub fn pack_all(&self) -> Vec<u8> {
        self.pack(0, self.num_records)
    }

    /// Rebuild a store from a packed payload produced under the same rule.
    ///
    /// # Errors
    /// `InvalidInput` if the rule has no storage extent or the payload is
    /// not a whole number of records.
    pub fn unpack(rule: Arc<Rule>, bytes: &[u8]) -> Result<TraceMetadata, PiolError> {
        let per = rule.pack_size();
        if per == 0 {
            return Err(PiolError::InvalidInput(
                "cannot unpack records under an empty rule".to_string(),
            ));
        }
        if bytes.len() % per != 0 {
            return Err(PiolError::InvalidInput(format!(
                "payload of {} bytes is not a whole number of {}-byte records",
                bytes.len(),
                per
            )));
        }
        let count = bytes.len() / per;
        let mut out = TraceMetadata::new(Arc::clone(&rule), count);
        let float_len = count * rule.num_float() * std::mem::size_of::<f64>();
        let long_len = count * rule.num_long() * std::mem::size_of::<i64>();
        let short_len = count * rule.num_short() * std::mem::size_of::<i16>();
        let index_len = count * rule.num_index() * std::mem::size_of::<u64>();
        let mut at = 0;
        out.floats = bytemuck::pod_collect_to_vec(&bytes[at..at + float_len]);
        at += float_len;
        out.longs = bytemuck::pod_collect_to_vec(&bytes[at..at + long_len]);
        at += long_len;
        out.shorts = bytemuck::pod_collect_to_vec(&bytes[at..at + short_len]);
        at += short_len;
        out.indexes = bytemuck::pod_collect_to_vec(&bytes[at..at + index_len]);
        at += index_len;
        if rule.has_copy() {
            out.copies = bytes[at..at + count * TRACE_HEADER_LEN].to_vec();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn test_rule() -> Arc<Rule> {
        Arc::new(
            Rule::new(&[
                Key::XSrc,
                Key::YSrc,
                Key::Il,
                Key::Tic,
                Key::Ltn,
                Key::Gtn,
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_round_trip_every_class() {
        let mut prm = TraceMetadata::new(test_rule(), 3);
        prm.set_f64(1, Key::XSrc, 1234.5).unwrap();
        prm.set_i64(1, Key::Il, -77).unwrap();
        prm.set_i64(1, Key::Tic, 3).unwrap();
        prm.set_index(1, Key::Gtn, 42).unwrap();
        assert_relative_eq!(prm.get_f64(1, Key::XSrc).unwrap(), 1234.5);
        assert_eq!(prm.get_i64(1, Key::Il).unwrap(), -77);
        assert_eq!(prm.get_i64(1, Key::Tic).unwrap(), 3);
        assert_eq!(prm.get_index(1, Key::Gtn).unwrap(), 42);
        // Untouched neighbors stay zero.
        assert_eq!(prm.get_index(0, Key::Gtn).unwrap(), 0);
        assert_eq!(prm.get_index(2, Key::Gtn).unwrap(), 0);
    }

    #[test]
    fn test_absent_key_is_entry_not_found() {
        let prm = TraceMetadata::new(test_rule(), 1);
        assert!(matches!(
            prm.get_f64(0, Key::XCmp),
            Err(PiolError::EntryNotFound(Key::XCmp))
        ));
        let mut prm = prm;
        assert!(prm.set_i64(0, Key::Xl, 1).is_err());
    }

    #[test]
    fn test_coercion_between_classes() {
        let mut prm = TraceMetadata::new(test_rule(), 1);
        prm.set_f64(0, Key::Il, 12.0).unwrap();
        assert_eq!(prm.get_i64(0, Key::Il).unwrap(), 12);
        prm.set_i64(0, Key::XSrc, 9).unwrap();
        assert_relative_eq!(prm.get_f64(0, Key::XSrc).unwrap(), 9.0);
    }

    #[test]
    fn test_copy_entries_shared_keys_only() {
        let src_rule = test_rule();
        let dst_rule = Arc::new(Rule::new(&[Key::XSrc, Key::Xl, Key::Gtn]).unwrap());
        let mut src = TraceMetadata::new(src_rule, 2);
        src.set_f64(1, Key::XSrc, 5.5).unwrap();
        src.set_i64(1, Key::Il, 10).unwrap();
        src.set_index(1, Key::Gtn, 7).unwrap();

        let mut dst = TraceMetadata::new(dst_rule, 2);
        dst.set_i64(0, Key::Xl, 99).unwrap();
        dst.copy_entries(0, &src, 1);

        assert_relative_eq!(dst.get_f64(0, Key::XSrc).unwrap(), 5.5);
        assert_eq!(dst.get_index(0, Key::Gtn).unwrap(), 7);
        // Xl exists only in the destination rule and must be untouched.
        assert_eq!(dst.get_i64(0, Key::Xl).unwrap(), 99);
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let rule = test_rule();
        let mut prm = TraceMetadata::new(Arc::clone(&rule), 4);
        for i in 0..4 {
            prm.set_f64(i, Key::XSrc, i as f64 * 1.5).unwrap();
            prm.set_i64(i, Key::Il, i as i64 - 2).unwrap();
            prm.set_index(i, Key::Gtn, 100 + i as u64).unwrap();
        }
        let bytes = prm.pack(1, 2);
        assert_eq!(bytes.len(), 2 * rule.pack_size());
        let back = TraceMetadata::unpack(Arc::clone(&rule), &bytes).unwrap();
        assert_eq!(back.size(), 2);
        for i in 0..2 {
            assert_relative_eq!(
                back.get_f64(i, Key::XSrc).unwrap(),
                prm.get_f64(i + 1, Key::XSrc).unwrap()
            );
            assert_eq!(
                back.get_index(i, Key::Gtn).unwrap(),
                prm.get_index(i + 1, Key::Gtn).unwrap()
            );
        }
    }

    #[test]
    fn test_unpack_rejects_ragged_payload() {
        let rule = test_rule();
        let bytes = vec![0u8; rule.pack_size() + 1];
        assert!(TraceMetadata::unpack(rule, &bytes).is_err());
    }

    #[test]
    fn test_copy_block_round_trip() {
        let rule = Arc::new(Rule::new(&[Key::Copy, Key::Gtn]).unwrap());
        let mut prm = TraceMetadata::new(Arc::clone(&rule), 2);
        prm.copy_block_mut(1).unwrap()[0..4].copy_from_slice(&[1, 2, 3, 4]);
        let bytes = prm.pack_all();
        let back = TraceMetadata::unpack(rule, &bytes).unwrap();
        assert_eq!(&back.copy_block(1).unwrap()[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_memory_usage_counts_all_classes() {
        let prm = TraceMetadata::new(test_rule(), 10);
        assert!(prm.memory_usage() >= 10 * prm.rule().memory_per_record());
    }
}
