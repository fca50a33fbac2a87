//! Dataset-wide reductions shared by the flagger and the aggregator.
//!
//! Work is split into fixed-size chunks that rayon processes in parallel.
//! Partials are collected in chunk order and merged on the calling thread,
//! so a float sum never depends on how the chunks were scheduled.

use rayon::prelude::*;

/// Running sum and count of a value.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Tally {
    pub sum: f64,
    pub count: u64,
}

impl Tally {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn merge(self, other: Tally) -> Tally {
        Tally {
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    /// Arithmetic mean, or `None` when nothing was tallied.
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Computes one partial per chunk in parallel, then folds the partials in
/// chunk order. Returns `None` for empty input.
pub fn chunked_reduce<T, P, F, M>(items: &[T], chunk_size: usize, partial: F, merge: M) -> Option<P>
where
    T: Sync,
    P: Send,
    F: Fn(&[T]) -> P + Sync + Send,
    M: FnMut(P, P) -> P,
{
    let partials: Vec<P> = items.par_chunks(chunk_size.max(1)).map(partial).collect();
    partials.into_iter().reduce(merge)
}

/// Tallies `value` over every item.
pub fn tally_by<T, F>(items: &[T], chunk_size: usize, value: F) -> Tally
where
    T: Sync,
    F: Fn(&T) -> f64 + Sync + Send,
{
    chunked_reduce(
        items,
        chunk_size,
        |chunk| {
            let mut tally = Tally::default();
            for item in chunk {
                tally.push(value(item));
            }
            tally
        },
        Tally::merge,
    )
    .unwrap_or_default()
}

/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
