//! Groups a triple stream into fixed-size, order-preserving batches.

use std::iter::FusedIterator;

use crate::errors::{GatherError, GatherResult};
use crate::models::{Batch, CombinationTriple};

/// Convert a signed chunk size (as received from Python or JSON) into a usable one.
pub fn checked_chunk_size(chunk_size: i64) -> GatherResult<usize> {
    if chunk_size <= 0 {
        return Err(GatherError::InvalidArgument(format!(
            "chunk_size must be at least 1, got {chunk_size}"
        )));
    }
    usize::try_from(chunk_size)
        .map_err(|_| GatherError::InvalidArgument(format!("chunk_size {chunk_size} is too large")))
}

/// Iterator adaptor yielding [`Batch`]es of exactly `chunk_size` triples,
/// except for a possibly shorter final batch.
///
/// Only the in-progress buffer is held in memory.
#[derive(Debug)]
pub struct Chunks<I> {
    inner: I,
    chunk_size: usize,
    next_index: usize,
    exhausted: bool,
}

impl<I> Iterator for Chunks<I>
where
    I: Iterator<Item = CombinationTriple>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        // Cap the up-front reservation; chunk sizes in the millions are normal.
        let mut buffer = Vec::with_capacity(self.chunk_size.min(64 * 1024));
        while buffer.len() < self.chunk_size {
            match self.inner.next() {
                Some(triple) => buffer.push(triple),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if buffer.is_empty() {
            return None;
        }
        let batch = Batch {
            index: self.next_index,
            chunk_size: self.chunk_size,
            triples: buffer,
        };
        self.next_index += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted {
            return (0, Some(0));
        }
        let (lo, hi) = self.inner.size_hint();
        let batches = |n: usize| n.div_ceil(self.chunk_size);
        (batches(lo), hi.map(batches))
    }
}

impl<I> FusedIterator for Chunks<I> where I: Iterator<Item = CombinationTriple> {}

/// Split a triple stream into batches of `chunk_size`.
///
/// Empty input yields no batches; `chunk_size == 0` is rejected.
pub fn chunk_triples<T>(triples: T, chunk_size: usize) -> GatherResult<Chunks<T::IntoIter>>
where
    T: IntoIterator<Item = CombinationTriple>,
{
    if chunk_size == 0 {
        return Err(GatherError::InvalidArgument(
            "chunk_size must be at least 1".to_string(),
        ));
    }
    Ok(Chunks {
        inner: triples.into_iter(),
        chunk_size,
        next_index: 0,
        exhausted: false,
    })
}
