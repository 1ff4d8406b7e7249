//! The shared coordinate system [`Universe`].

use crate::prelude::*;
use std::ops::Index;

/// Insertion-ordered hash set with the Fx hasher.
type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;

/// An immutable set assigning each of its elements a dense index in `0..len`.
///
/// Every [`CompactMap`] and [`Subset`] built from a factory or deduper holds an [`Arc`] to the same
/// universe, and stores only indices into it.
///
/// ## Invariants
///
/// The element at index `i` never changes for the lifetime of the universe. Duplicate inputs are
/// collapsed, and the first occurrence determines the index.
#[derive(Clone)]
pub struct Universe<T>(FxIndexSet<T>);

// -------------------- Basic methods -------------------- //

impl<T: Hash + Eq> FromIterator<T> for Universe<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Hash + Eq> Universe<T> {
    /// Builds a universe by copying in the given elements.
    pub fn new<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().collect()
    }

    /// The index assigned to `element`, if it belongs to the universe.
    pub fn index_of<Q: ?Sized + Hash + Eq>(&self, element: &Q) -> Option<usize>
    where
        T: Borrow<Q>,
    {
        self.0.get_index_of(element)
    }

    /// Whether `element` belongs to the universe.
    pub fn contains<Q: ?Sized + Hash + Eq>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
    {
        self.0.contains(element)
    }
}

impl<T> Universe<T> {
    /// The element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get_index(index)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the universe is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the elements in index order.
    pub fn iter(&self) -> indexmap::set::Iter<'_, T> {
        self.0.iter()
    }

    /// Number of 64-bit words needed to hold one bit per element.
    #[must_use]
    pub fn words(&self) -> usize {
        self.len().div_ceil(WORD_BITS)
    }

    /// Rough heap footprint of the universe, in bytes.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        // Entries store the element and its hash, the table one index per bucket.
        let entry = mem::size_of::<T>() + mem::size_of::<u64>();
        mem::size_of::<Self>() + self.0.capacity() * (entry + mem::size_of::<usize>())
    }
}

impl<'a, T> IntoIterator for &'a Universe<T> {
    type Item = &'a T;
    type IntoIter = indexmap::set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> Index<usize> for Universe<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.0[index]
    }
}

// -------------------- Formatting -------------------- //

impl<T: Debug> Debug for Universe<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Writes the universe in roster notation, in index order.
impl<T: Display> Display for Universe<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write_roster(f, self.iter())
    }
}

/// Universes are equal when they hold the same elements at the same indices.
impl<T: PartialEq> PartialEq for Universe<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Eq> Eq for Universe<T> {}

/// Writes `{a, b, c}`.
pub(crate) fn write_roster<T: Display, I: IntoIterator<Item = T>>(
    f: &mut impl Write,
    iter: I,
) -> FmtResult {
    f.write_char('{')?;
    let mut iter = iter.into_iter();
    if let Some(fst) = iter.next() {
        write!(f, "{fst}")?;
        for next in iter {
            write!(f, ", {next}")?;
        }
    }
    f.write_char('}')
}

#[cfg(test)]
mod universe {
    use super::*;

    #[test]
    fn indices() {
        let universe = Universe::new(["a", "b", "c", "a"]);
        assert_eq!(universe.len(), 3);
        assert_eq!(universe.index_of("a"), Some(0));
        assert_eq!(universe.index_of("c"), Some(2));
        assert_eq!(universe.index_of("d"), None);
        assert_eq!(universe.get(1), Some(&"b"));
        assert_eq!(universe.get(3), None);
        assert_eq!(universe[2], "c");
        assert!(universe.contains("b"));
    }

    #[test]
    fn borrowed_lookup() {
        let universe: Universe<String> = ["x", "y"].iter().map(ToString::to_string).collect();
        assert_eq!(universe.index_of("y"), Some(1));
        assert_eq!((&universe).into_iter().count(), 2);
    }

    #[test]
    fn words() {
        assert_eq!(Universe::<u32>::new([]).words(), 0);
        assert_eq!(Universe::new(0..64).words(), 1);
        assert_eq!(Universe::new(0..65).words(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(Universe::new([3, 1, 2]).to_string(), "{3, 1, 2}");
        assert_eq!(Universe::<u8>::new([]).to_string(), "{}");
    }
}
