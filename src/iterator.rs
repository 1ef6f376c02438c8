//! Iterator plumbing for reads and compaction input.
//!
//! [`MergingIterator`] interleaves several internal-key-ordered streams into
//! one. Ties go to the earlier source, so callers list newer sources first
//! and the newest entry for a key surfaces before its shadowed history. No
//! entries are dropped here; deciding what survives a merge is the
//! consumer's business.

use std::cmp::Ordering;

use crate::error::Result;
use crate::key::InternalKeyComparator;
use crate::table::EntryIter;

pub struct MergingIterator {
    icmp: InternalKeyComparator,
    sources: Vec<EntryIter>,
    /// Head entry of each source; `None` once a source is exhausted.
    heads: Vec<Option<(Vec<u8>, Vec<u8>)>>,
    /// Refill failure held back until the preceding entry is delivered.
    pending_error: Option<crate::error::Error>,
    failed: bool,
}

impl MergingIterator {
    pub fn new(icmp: InternalKeyComparator, sources: Vec<EntryIter>) -> Result<Self> {
        let mut iter = Self {
            icmp,
            heads: Vec::with_capacity(sources.len()),
            sources,
            pending_error: None,
            failed: false,
        };
        for i in 0..iter.sources.len() {
            let head = iter.pull(i)?;
            iter.heads.push(head);
        }
        Ok(iter)
    }

    fn pull(&mut self, source: usize) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.sources[source].next() {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn smallest(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if let Some((key, _)) = head {
                best = match best {
                    Some(b)
                        if self.icmp.compare(&self.heads[b].as_ref().unwrap().0, key)
                            != Ordering::Greater =>
                    {
                        Some(b)
                    }
                    _ => Some(i),
                };
            }
        }
        best
    }
}

impl Iterator for MergingIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let source = self.smallest()?;
        let entry = self.heads[source].take();
        match self.pull(source) {
            Ok(head) => self.heads[source] = head,
            Err(e) => self.pending_error = Some(e),
        }
        entry.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::key::{BytewiseComparator, InternalKey, ValueType};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn source(entries: Vec<(&[u8], u64)>) -> EntryIter {
        let owned: Vec<_> = entries
            .into_iter()
            .map(|(user_key, sequence)| {
                let key = InternalKey::new(user_key, sequence, ValueType::Value);
                Ok((key.as_bytes().to_vec(), format!("v{sequence}").into_bytes()))
            })
            .collect();
        Box::new(owned.into_iter())
    }

    fn user_keys(iter: MergingIterator) -> Vec<(Vec<u8>, u64)> {
        iter.map(|entry| {
            let (key, _) = entry.unwrap();
            let (user_key, sequence, _) = crate::key::parse_internal_key(&key).unwrap();
            (user_key.to_vec(), sequence)
        })
        .collect()
    }

    #[test]
    fn test_merge_interleaves_sources() {
        let merged = MergingIterator::new(
            icmp(),
            vec![
                source(vec![(b"a", 1), (b"d", 1)]),
                source(vec![(b"b", 1), (b"c", 1), (b"e", 1)]),
            ],
        )
        .unwrap();
        assert_eq!(
            user_keys(merged),
            vec![
                (b"a".to_vec(), 1),
                (b"b".to_vec(), 1),
                (b"c".to_vec(), 1),
                (b"d".to_vec(), 1),
                (b"e".to_vec(), 1),
            ]
        );
    }

    #[test]
    fn test_newer_entry_for_same_user_key_comes_first() {
        let merged = MergingIterator::new(
            icmp(),
            vec![source(vec![(b"k", 10)]), source(vec![(b"k", 3)])],
        )
        .unwrap();
        assert_eq!(
            user_keys(merged),
            vec![(b"k".to_vec(), 10), (b"k".to_vec(), 3)]
        );
    }

    #[test]
    fn test_empty_sources() {
        let merged = MergingIterator::new(icmp(), vec![source(vec![]), source(vec![])]).unwrap();
        assert_eq!(user_keys(merged), Vec::<(Vec<u8>, u64)>::new());
    }

    #[test]
    fn test_source_error_surfaces() {
        let entries = vec![
            Ok((
                InternalKey::new(b"a", 1, ValueType::Value).as_bytes().to_vec(),
                b"v".to_vec(),
            )),
            Err(crate::error::Error::IO("bad read".to_string())),
        ];
        let failing: EntryIter = Box::new(entries.into_iter());
        let mut merged = MergingIterator::new(icmp(), vec![failing]).unwrap();

        assert!(merged.next().unwrap().is_ok());
        assert!(merged.next().unwrap().is_err());
        assert!(merged.next().is_none());
    }
}
