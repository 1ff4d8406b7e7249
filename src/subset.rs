//! Bit-packed immutable subsets [`Subset`] of a [`Universe`].

use crate::prelude::*;
use bitvec::slice::IterOnes;
use std::ops::Range;

/// Bits per storage word.
pub(crate) const WORD_BITS: usize = u64::BITS as usize;

/// A run of words, starting at some word offset into the universe's index space.
///
/// The first and last words are never zero.
pub(crate) struct Packed {
    /// Index of the first stored word within the universe's index space.
    word_offset: usize,
    /// The stored words.
    bits: BitBox<u64, Lsb0>,
    /// Number of set bits.
    len: usize,
    /// Memoized [`Display`] output.
    rendered: OnceLock<String>,
}

/// The representation behind a [`Subset`].
enum Repr<T> {
    /// No elements.
    Empty,
    /// A single element, stored by index.
    Single {
        /// The shared universe.
        universe: Arc<Universe<T>>,
        /// Index of the element.
        index: usize,
    },
    /// All elements lie within a single word.
    Word {
        /// The shared universe.
        universe: Arc<Universe<T>>,
        /// Index of the word within the universe's index space.
        word_offset: usize,
        /// The bits.
        word: u64,
    },
    /// Elements spread over several words.
    Words {
        /// The shared universe.
        universe: Arc<Universe<T>>,
        /// The words, shared between clones.
        packed: Arc<Packed>,
    },
    /// Every element of the universe.
    Full(Arc<Universe<T>>),
}

/// An immutable subset of a [`Universe`].
///
/// The representation is chosen by occupancy when the subset is built: nothing for the empty set,
/// an index for a singleton, a single word or a trimmed run of words otherwise, and a bare
/// reference to the universe when every element is present.
///
/// Iteration follows increasing universe index. Equality compares contents, regardless of the
/// representation or of which universe the subset was built over.
pub struct Subset<T>(Repr<T>);

// Derived `Clone` would needlessly require `T: Clone`.
impl<T> Clone for Subset<T> {
    fn clone(&self) -> Self {
        Self(match &self.0 {
            Repr::Empty => Repr::Empty,
            Repr::Single { universe, index } => Repr::Single {
                universe: Arc::clone(universe),
                index: *index,
            },
            Repr::Word {
                universe,
                word_offset,
                word,
            } => Repr::Word {
                universe: Arc::clone(universe),
                word_offset: *word_offset,
                word: *word,
            },
            Repr::Words { universe, packed } => Repr::Words {
                universe: Arc::clone(universe),
                packed: Arc::clone(packed),
            },
            Repr::Full(universe) => Repr::Full(Arc::clone(universe)),
        })
    }
}

impl<T> Default for Subset<T> {
    fn default() -> Self {
        Self::empty()
    }
}

// -------------------- Construction -------------------- //

impl<T> Subset<T> {
    /// The empty subset.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Repr::Empty)
    }

    /// The subset holding every element of `universe`.
    #[must_use]
    pub fn full(universe: Arc<Universe<T>>) -> Self {
        if universe.is_empty() {
            Self::empty()
        } else {
            Self(Repr::Full(universe))
        }
    }

    /// Packs a run of words into the smallest fitting representation.
    ///
    /// `words[i]` holds the bits for indices `(word_offset + i) * 64..(word_offset + i + 1) * 64`,
    /// and `len` must be the number of set bits among them.
    pub(crate) fn from_words(
        universe: &Arc<Universe<T>>,
        word_offset: usize,
        words: &[u64],
        len: usize,
    ) -> Self {
        debug_assert_eq!(
            len,
            words.iter().map(|w| w.count_ones() as usize).sum::<usize>()
        );

        if len == 0 {
            return Self::empty();
        }
        if len == universe.len() {
            return Self::full(Arc::clone(universe));
        }

        // Trim leading and trailing zero words.
        let (Some(first), Some(last)) = (
            words.iter().position(|&w| w != 0),
            words.iter().rposition(|&w| w != 0),
        ) else {
            return Self::empty();
        };
        let word_offset = word_offset + first;
        let universe = Arc::clone(universe);

        if len == 1 {
            let word = words[first];
            let index = word_offset * WORD_BITS + word.trailing_zeros() as usize;
            return Self(Repr::Single { universe, index });
        }

        if first == last {
            return Self(Repr::Word {
                universe,
                word_offset,
                word: words[first],
            });
        }

        let bits = BitVec::<u64, Lsb0>::from_slice(&words[first..=last]).into_boxed_bitslice();
        Self(Repr::Words {
            universe,
            packed: Arc::new(Packed {
                word_offset,
                bits,
                len,
                rendered: OnceLock::new(),
            }),
        })
    }
}

impl<T: Hash + Eq> Subset<T> {
    /// Builds a standalone subset of `universe` from its elements.
    ///
    /// Duplicates are ignored. No storage is shared with other subsets; use a [`SubsetDeduper`]
    /// for that.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidElement`] if some element is not in the universe.
    pub fn from_elements<'a, Q, I>(universe: &Arc<Universe<T>>, iter: I) -> Result<Self, Error>
    where
        Q: ?Sized + Hash + Eq + 'a,
        T: Borrow<Q>,
        I: IntoIterator<Item = &'a Q>,
    {
        let mut bits = bitvec![u64, Lsb0; 0; universe.words() * WORD_BITS];
        for el in iter {
            let index = universe.index_of(el).ok_or(Error::InvalidElement)?;
            bits.set(index, true);
        }

        let len = bits.count_ones();
        Ok(Self::from_words(universe, 0, bits.as_raw_slice(), len))
    }
}

// -------------------- Basic methods -------------------- //

/// Iterator over the universe indices of a [`Subset`], in increasing order.
pub struct Indices<'a>(IndicesRepr<'a>);

/// The state behind an [`Indices`] iterator.
enum IndicesRepr<'a> {
    /// Nothing left.
    Empty,
    /// A single index, or nothing.
    Single(Option<usize>),
    /// Set bits within some words.
    Bits {
        /// Index of the first bit.
        base: usize,
        /// The set bits.
        ones: IterOnes<'a, u64, Lsb0>,
    },
    /// A contiguous range of indices.
    Range(Range<usize>),
}

impl Iterator for Indices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match &mut self.0 {
            IndicesRepr::Empty => None,
            IndicesRepr::Single(index) => index.take(),
            IndicesRepr::Bits { base, ones } => ones.next().map(|i| *base + i),
            IndicesRepr::Range(range) => range.next(),
        }
    }
}

/// Iterator over the elements of a [`Subset`], in universe order.
pub struct Iter<'a, T> {
    /// The universe the indices refer to.
    universe: Option<&'a Arc<Universe<T>>>,
    /// Remaining indices.
    indices: Indices<'a>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let universe = self.universe?;
        self.indices.next().map(|i| &universe[i])
    }
}

impl<T> Subset<T> {
    /// The universe this subset was built over. The empty subset has none.
    #[must_use]
    pub fn universe(&self) -> Option<&Arc<Universe<T>>> {
        match &self.0 {
            Repr::Empty => None,
            Repr::Single { universe, .. }
            | Repr::Word { universe, .. }
            | Repr::Words { universe, .. }
            | Repr::Full(universe) => Some(universe),
        }
    }

    /// Which representation was chosen.
    #[must_use]
    pub fn representation(&self) -> Representation {
        match &self.0 {
            Repr::Empty => Representation::Empty,
            Repr::Single { .. } => Representation::Single,
            Repr::Word { .. } => Representation::Word,
            Repr::Words { .. } => Representation::Words,
            Repr::Full(_) => Representation::Full,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.0 {
            Repr::Empty => 0,
            Repr::Single { .. } => 1,
            Repr::Word { word, .. } => word.count_ones() as usize,
            Repr::Words { packed, .. } => packed.len,
            Repr::Full(universe) => universe.len(),
        }
    }

    /// Whether the subset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.0, Repr::Empty)
    }

    /// Whether the element at universe index `index` belongs to the subset.
    #[must_use]
    pub fn contains_index(&self, index: usize) -> bool {
        match &self.0 {
            Repr::Empty => false,
            Repr::Single { index: i, .. } => *i == index,
            Repr::Word {
                word_offset, word, ..
            } => index / WORD_BITS == *word_offset && word.view_bits::<Lsb0>()[index % WORD_BITS],
            Repr::Words { packed, .. } => index
                .checked_sub(packed.word_offset * WORD_BITS)
                .and_then(|i| packed.bits.get(i).map(|bit| *bit))
                .unwrap_or(false),
            Repr::Full(universe) => index < universe.len(),
        }
    }

    /// Iterates over the universe indices of the elements, in increasing order.
    #[must_use]
    pub fn indices(&self) -> Indices<'_> {
        match &self.0 {
            Repr::Empty => Indices(IndicesRepr::Empty),
            Repr::Single { index, .. } => Indices(IndicesRepr::Single(Some(*index))),
            Repr::Word {
                word_offset, word, ..
            } => Indices(IndicesRepr::Bits {
                base: word_offset * WORD_BITS,
                ones: word.view_bits::<Lsb0>().iter_ones(),
            }),
            Repr::Words { packed, .. } => Indices(IndicesRepr::Bits {
                base: packed.word_offset * WORD_BITS,
                ones: packed.bits.iter_ones(),
            }),
            Repr::Full(universe) => Indices(IndicesRepr::Range(0..universe.len())),
        }
    }

    /// Iterates over the elements, in universe order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            universe: self.universe(),
            indices: self.indices(),
        }
    }

    /// Whether both subsets are backed by the very same storage.
    ///
    /// Subsets built from the same backing bit set of a [`SubsetDeduper`] share storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Repr::Empty, Repr::Empty) => true,
            (Repr::Words { packed: a, .. }, Repr::Words { packed: b, .. }) => Arc::ptr_eq(a, b),
            (Repr::Full(a), Repr::Full(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Rough footprint of this subset, in bytes, not counting the shared universe.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        let inline = mem::size_of::<Self>();
        match &self.0 {
            Repr::Words { packed, .. } => {
                inline + mem::size_of::<Packed>() + packed.bits.as_raw_slice().len() * 8
            }
            _ => inline,
        }
    }
}

impl<T: Hash + Eq> Subset<T> {
    /// Whether `element` belongs to the subset.
    pub fn contains<Q: ?Sized + Hash + Eq>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
    {
        self.universe()
            .and_then(|universe| universe.index_of(element))
            .is_some_and(|index| self.contains_index(index))
    }

    /// Whether every element of `self` belongs to `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self.universe(), other.universe()) {
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => {
                self.indices().all(|i| other.contains_index(i))
            }
            _ => self.iter().all(|el| other.contains(el)),
        }
    }
}

// -------------------- Traits -------------------- //

impl<'a, T> IntoIterator for &'a Subset<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Debug> Debug for Subset<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Writes the subset in roster notation.
///
/// Multi-word subsets render once and reuse the string. The other tiers are either tiny or, for
/// the full subset, the universe itself, and render on the fly.
impl<T: Display> Display for Subset<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if let Repr::Words { packed, .. } = &self.0 {
            let rendered = packed.rendered.get_or_init(|| {
                let mut buf = String::new();
                // Writing into a `String` can't fail.
                let _ = write_roster(&mut buf, self.iter());
                buf
            });
            f.write_str(rendered)
        } else {
            write_roster(f, self.iter())
        }
    }
}

impl<T: Hash + Eq> PartialEq for Subset<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        match (self.universe(), other.universe()) {
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => self.indices().eq(other.indices()),
            _ => self.iter().all(|el| other.contains(el)),
        }
    }
}

impl<T: Hash + Eq> Eq for Subset<T> {}

impl<T: Hash + Eq, S: BuildHasher> PartialEq<HashSet<T, S>> for Subset<T> {
    fn eq(&self, other: &HashSet<T, S>) -> bool {
        self.len() == other.len() && self.iter().all(|el| other.contains(el))
    }
}

impl<T: Hash + Ord> PartialEq<BTreeSet<T>> for Subset<T> {
    fn eq(&self, other: &BTreeSet<T>) -> bool {
        self.len() == other.len() && self.iter().all(|el| other.contains(el))
    }
}

#[cfg(test)]
mod subset {
    use super::*;

    /// A universe of the integers `0..n`.
    fn range(n: u32) -> Arc<Universe<u32>> {
        Arc::new(Universe::new(0..n))
    }

    fn subset(universe: &Arc<Universe<u32>>, elements: &[u32]) -> Subset<u32> {
        Subset::from_elements(universe, elements).unwrap()
    }

    #[test]
    fn representations() {
        let universe = range(200);
        assert_eq!(subset(&universe, &[]).representation(), Representation::Empty);
        assert_eq!(subset(&universe, &[70]).representation(), Representation::Single);
        assert_eq!(subset(&universe, &[65, 70]).representation(), Representation::Word);
        assert_eq!(subset(&universe, &[3, 130]).representation(), Representation::Words);

        let all: Vec<_> = (0..200).collect();
        assert_eq!(subset(&universe, &all).representation(), Representation::Full);
    }

    #[test]
    fn membership() {
        let universe = range(200);
        for elements in [&[][..], &[70], &[65, 70], &[3, 130, 199], &[0, 64, 128]] {
            let set = subset(&universe, elements);
            assert_eq!(set.len(), elements.len());
            for i in 0..200 {
                assert_eq!(set.contains(&i), elements.contains(&i), "{set:?} at {i}");
            }
            assert!(!set.contains(&500u32));
            assert_eq!(set.iter().copied().collect::<Vec<_>>(), elements);
        }
    }

    #[test]
    fn loops() {
        let universe = range(200);
        let set = subset(&universe, &[3, 64, 130]);
        let mut seen = Vec::new();
        for el in &set {
            seen.push(*el);
        }
        assert_eq!(seen, [3, 64, 130]);
        assert_eq!((&Subset::<u32>::empty()).into_iter().count(), 0);
        assert_eq!(Subset::full(range(5)).iter().count(), 5);
    }

    #[test]
    fn trims_leading_words() {
        let universe = range(300);
        let set = subset(&universe, &[200, 260]);
        assert_eq!(set.representation(), Representation::Words);
        assert_eq!(set.indices().collect::<Vec<_>>(), [200, 260]);
        assert!(!set.contains_index(4));
        assert!(set.contains_index(260));
    }

    #[test]
    fn invalid_element() {
        let universe = range(4);
        assert_eq!(
            Subset::from_elements(&universe, &[1u32, 9]).unwrap_err(),
            Error::InvalidElement
        );
    }

    #[test]
    fn equality() {
        let fst = range(100);
        let snd: Arc<Universe<u32>> = Arc::new((0..100).rev().collect());

        let a = subset(&fst, &[1, 5, 90]);
        let b = subset(&snd, &[90, 5, 1]);
        assert_eq!(a, b);
        assert_ne!(a, subset(&fst, &[1, 5]));
        assert_eq!(a, [1, 5, 90].into_iter().collect::<HashSet<_>>());
        assert_eq!(a, [1, 5, 90].into_iter().collect::<BTreeSet<_>>());
        assert_eq!(Subset::<u32>::empty(), subset(&fst, &[]));
        assert!(subset(&fst, &[5]).is_subset(&a));
        assert!(!a.is_subset(&subset(&snd, &[5])));
    }

    #[test]
    fn display() {
        let universe = range(200);
        let set = subset(&universe, &[1, 150]);
        assert_eq!(set.to_string(), "{1, 150}");
        // Rendered from the cache the second time.
        assert_eq!(set.clone().to_string(), "{1, 150}");
        assert_eq!(Subset::<u32>::empty().to_string(), "{}");
        assert_eq!(format!("{:?}", subset(&universe, &[2, 3])), "{2, 3}");
    }

    #[test]
    fn full() {
        let universe = range(3);
        let set = Subset::full(Arc::clone(&universe));
        assert_eq!(set.len(), 3);
        assert!(set.shares_storage(&Subset::full(universe)));
        assert!(Subset::full(range(0)).is_empty());
    }
}
