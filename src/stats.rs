//! Diagnostics for factories and dedupers.
//!
//! Nothing here affects correctness. The byte counts are estimates from `size_of` and array
//! lengths, not measurements of the allocator.

use crate::prelude::*;

/// The internal representation chosen for a built map or subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Representation {
    /// Nothing stored.
    #[display(fmt = "empty")]
    Empty,
    /// One inline entry or element.
    #[display(fmt = "single")]
    Single,
    /// Two inline map entries.
    #[display(fmt = "pair")]
    Pair,
    /// Map values in a dense array indexed through the universe.
    #[display(fmt = "indexed")]
    Indexed,
    /// Subset packed in a single word.
    #[display(fmt = "word")]
    Word,
    /// Subset packed in an array of words.
    #[display(fmt = "words")]
    Words,
    /// Subset equal to the whole universe.
    #[display(fmt = "full")]
    Full,
}

impl Representation {
    /// Every representation, in the order used by [`Stats`].
    pub const ALL: [Self; 7] = [
        Self::Empty,
        Self::Single,
        Self::Pair,
        Self::Indexed,
        Self::Word,
        Self::Words,
        Self::Full,
    ];

    /// Position within [`Self::ALL`].
    const fn slot(self) -> usize {
        self as usize
    }
}

/// Running counters kept by a [`CompactMapFactory`] or a [`SubsetDeduper`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Results built, per representation.
    built: [usize; 7],
    /// Backing bit sets copied at a divergence point.
    forks: usize,
    /// Estimated bytes held by built results and backing arrays.
    bytes: usize,
}

impl Stats {
    /// Number of results built with the given representation.
    #[must_use]
    pub const fn built(&self, repr: Representation) -> usize {
        self.built[repr.slot()]
    }

    /// Number of results built in total.
    #[must_use]
    pub fn total_built(&self) -> usize {
        self.built.iter().sum()
    }

    /// Number of times a shared backing bit set was copied.
    #[must_use]
    pub const fn forks(&self) -> usize {
        self.forks
    }

    /// Estimated bytes tracked so far.
    #[must_use]
    pub const fn estimated_bytes(&self) -> usize {
        self.bytes
    }

    /// Records a built result.
    pub(crate) fn record(&mut self, repr: Representation, bytes: usize) {
        self.built[repr.slot()] += 1;
        self.bytes += bytes;
    }

    /// Records a fresh or forked backing array.
    pub(crate) fn record_backing(&mut self, bytes: usize, fork: bool) {
        self.forks += usize::from(fork);
        self.bytes += bytes;
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "built {}", self.total_built())?;
        for repr in Representation::ALL {
            let count = self.built(repr);
            if count != 0 {
                write!(f, ", {repr} {count}")?;
            }
        }
        write!(f, "; {} forks; ~{} bytes", self.forks, self.bytes)
    }
}
