//! Pair addressing for molecule networks.
//!
//! Exhaustive analyses never materialize the `n(n-1)/2` pair list. Instead every unordered pair
//! `(row, col)` with `row < col < n` gets a linear index in the upper triangle of an `n × n`
//! matrix, enumerated row by row:
//!
//! ```text
//! (0,1)=0  (0,2)=1  (0,3)=2
//!          (1,2)=3  (1,3)=4
//!                   (2,3)=5
//! ```
//!
//! [`PairCodec`] converts between the two representations and walks contiguous index ranges
//! without recomputing square roots per pair. [`PairSpace`] hides whether a computation runs over
//! the exhaustive triangle or over an explicit candidate list.

use anyhow::{Result, anyhow, bail};
use std::ops::Range;

pub mod partition;

pub use partition::WorkerPool;

/// Number of unordered pairs among `n` molecules.
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Decode a linear pair index into `(row, col)` with `row < col < n`.
pub fn pair_of(index: usize, n: usize) -> Result<(usize, usize)> {
    let codec = PairCodec::new(n)?;
    if index >= codec.len() {
        bail!("Pair index {} out of range for {} molecules ({} pairs)", index, n, codec.len());
    }
    Ok(codec.pair(index))
}

/// Encode an unordered pair of distinct positions into its linear index.
///
/// The pair is unordered: `index_of(a, b, n) == index_of(b, a, n)`.
pub fn index_of(row: usize, col: usize, n: usize) -> Result<usize> {
    let codec = PairCodec::new(n)?;
    if row == col {
        bail!("A pair needs two distinct positions, got ({}, {})", row, col);
    }
    if row >= n || col >= n {
        bail!("Pair ({}, {}) out of range for {} molecules", row, col, n);
    }
    Ok(codec.index(row, col))
}

/// Validated triangular codec for a fixed molecule count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCodec {
    n: usize,
    len: usize,
}

impl PairCodec {
    pub fn new(n: usize) -> Result<Self> {
        if n < 2 {
            return Err(anyhow!(
                "At least 2 molecules are required to form pairs, got {}",
                n
            ));
        }
        Ok(PairCodec {
            n,
            len: pair_count(n),
        })
    }

    pub fn molecules(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First index of `row` in the enumeration.
    #[inline]
    fn row_start(&self, row: usize) -> usize {
        row * (2 * self.n - row - 1) / 2
    }

    /// Encode without bounds checks beyond debug assertions.
    #[inline]
    pub fn index(&self, a: usize, b: usize) -> usize {
        let (row, col) = if a < b { (a, b) } else { (b, a) };
        debug_assert!(row != col && col < self.n);
        self.row_start(row) + (col - row - 1)
    }

    /// Decode without bounds checks beyond debug assertions.
    #[inline]
    pub fn pair(&self, index: usize) -> (usize, usize) {
        debug_assert!(index < self.len);
        let b = (2 * self.n - 1) as f64;
        let estimate = ((b - (b * b - 8.0 * index as f64).max(0.0).sqrt()) / 2.0).floor();
        let mut row = (estimate as usize).min(self.n - 2);

        // Float rounding can land one row off for very large n.
        while row > 0 && self.row_start(row) > index {
            row -= 1;
        }
        while row + 1 < self.n - 1 && self.row_start(row + 1) <= index {
            row += 1;
        }

        let col = index - self.row_start(row) + row + 1;
        (row, col)
    }

    /// Walk the pairs of a contiguous index range in enumeration order.
    pub fn pairs_in(&self, range: Range<usize>) -> TrianglePairs {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        let (row, col) = if start < end { self.pair(start) } else { (0, 1) };
        TrianglePairs {
            n: self.n,
            row,
            col,
            remaining: end - start,
        }
    }

    /// Linear indices of every pair that contains `molecule`, ordered by partner position.
    pub fn partners(&self, molecule: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.n)
            .filter(move |&other| other != molecule)
            .map(move |other| self.index(molecule, other))
    }
}

/// Incremental iterator over a range of the triangular enumeration.
#[derive(Debug, Clone)]
pub struct TrianglePairs {
    n: usize,
    row: usize,
    col: usize,
    remaining: usize,
}

impl Iterator for TrianglePairs {
    type Item = (usize, usize);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = (self.row, self.col);
        self.remaining -= 1;
        self.col += 1;
        if self.col == self.n {
            self.row += 1;
            self.col = self.row + 1;
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for TrianglePairs {}

/// The set of pairs a computation runs over, addressed by `0..len()`.
#[derive(Debug, Clone)]
pub enum PairSpace {
    /// Every unordered pair of the retained molecules.
    Exhaustive(PairCodec),
    /// An explicit `(source, target)` list in matrix row positions.
    Explicit {
        molecules: usize,
        sources: Vec<usize>,
        targets: Vec<usize>,
    },
}

impl PairSpace {
    pub fn exhaustive(molecules: usize) -> Result<Self> {
        Ok(PairSpace::Exhaustive(PairCodec::new(molecules)?))
    }

    pub fn explicit(molecules: usize, sources: Vec<usize>, targets: Vec<usize>) -> Result<Self> {
        if sources.len() != targets.len() {
            bail!(
                "Source and target position arrays must have the same length ({} vs {})",
                sources.len(),
                targets.len()
            );
        }
        if let Some(&bad) = sources.iter().chain(targets.iter()).find(|&&p| p >= molecules) {
            bail!("Pair position {} out of range for {} molecules", bad, molecules);
        }
        Ok(PairSpace::Explicit {
            molecules,
            sources,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            PairSpace::Exhaustive(codec) => codec.len(),
            PairSpace::Explicit { sources, .. } => sources.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn molecules(&self) -> usize {
        match self {
            PairSpace::Exhaustive(codec) => codec.molecules(),
            PairSpace::Explicit { molecules, .. } => *molecules,
        }
    }

    pub fn is_exhaustive(&self) -> bool {
        matches!(self, PairSpace::Exhaustive(_))
    }

    /// `(source, target)` positions of the pair at `index`.
    #[inline]
    pub fn pair(&self, index: usize) -> (usize, usize) {
        match self {
            PairSpace::Exhaustive(codec) => codec.pair(index),
            PairSpace::Explicit {
                sources, targets, ..
            } => (sources[index], targets[index]),
        }
    }

    pub fn pairs_in(&self, range: Range<usize>) -> PairIter<'_> {
        match self {
            PairSpace::Exhaustive(codec) => PairIter::Triangle(codec.pairs_in(range)),
            PairSpace::Explicit {
                sources, targets, ..
            } => {
                let end = range.end.min(sources.len());
                let start = range.start.min(end);
                PairIter::Listed(sources[start..end].iter().zip(targets[start..end].iter()))
            }
        }
    }
}

pub enum PairIter<'a> {
    Triangle(TrianglePairs),
    Listed(std::iter::Zip<std::slice::Iter<'a, usize>, std::slice::Iter<'a, usize>>),
}

impl Iterator for PairIter<'_> {
    type Item = (usize, usize);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            PairIter::Triangle(inner) => inner.next(),
            PairIter::Listed(inner) => inner.next().map(|(&s, &t)| (s, t)),
        }
    }
}
