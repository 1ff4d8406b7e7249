//! Compact immutable maps [`CompactMap`] over a shared [`Universe`] of keys.
//!
//! A [`CompactMapFactory`] hands out [`MapBuilder`]s, each of which works on a dense array with a
//! slot per key of the universe. On [`MapBuilder::build`], the smallest fitting representation is
//! chosen: nothing, one or two inline entries, or an [`IndexRefMap`] holding the occupied part of
//! the array.

use crate::prelude::*;
use std::{cell::Cell, iter::Enumerate, slice};

// -------------------- Configuration -------------------- //

/// When to copy the occupied range of a working array instead of keeping it whole.
///
/// An [`IndexRefMap`] is trimmed to its occupied range `min..=max` when at least `leading` slots
/// precede `min`, or at least `trailing` slots follow `max`. Otherwise the full working array is
/// kept as is, saving a copy at the cost of a few empty slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trim {
    /// Empty slots before the first entry that justify a copy.
    pub leading: usize,
    /// Empty slots after the last entry that justify a copy.
    pub trailing: usize,
}

impl Default for Trim {
    fn default() -> Self {
        Self {
            leading: 5,
            trailing: 5,
        }
    }
}

impl Trim {
    /// Never trim.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            leading: usize::MAX,
            trailing: usize::MAX,
        }
    }

    /// Trim whenever a single slot is saved.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            leading: 1,
            trailing: 1,
        }
    }

    /// Whether the occupied range `min..=max` of an array of length `len` should be copied out.
    const fn applies(self, min: usize, max: usize, len: usize) -> bool {
        min >= self.leading || len - 1 - max >= self.trailing
    }
}

// -------------------- Factory -------------------- //

/// Builds many [`CompactMap`]s whose keys all come from one [`Universe`].
///
/// The factory is meant for single-threaded construction. The maps it builds are immutable and
/// can be shared freely.
pub struct CompactMapFactory<K> {
    /// The shared key universe.
    universe: Arc<Universe<K>>,
    /// Trimming heuristic for indexed maps.
    trim: Trim,
    /// Running diagnostics.
    stats: Cell<Stats>,
}

impl<K: Hash + Eq> CompactMapFactory<K> {
    /// Creates a factory over a fresh universe holding `keys`.
    pub fn from_keys<I: IntoIterator<Item = K>>(keys: I) -> Self {
        Self::new(Arc::new(Universe::new(keys)))
    }

    /// Builds a map from key-value pairs in one go.
    ///
    /// Later pairs overwrite earlier ones with the same key.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidKey`] if some key is not in the universe.
    pub fn map_from<'a, Q, V, I>(&self, iter: I) -> Result<CompactMap<K, V>, Error>
    where
        Q: ?Sized + Hash + Eq + 'a,
        K: Borrow<Q>,
        I: IntoIterator<Item = (&'a Q, V)>,
    {
        let mut builder = self.builder();
        for (key, value) in iter {
            builder.put(key, value)?;
        }
        builder.build()
    }
}

impl<K> CompactMapFactory<K> {
    /// Creates a factory over a shared universe.
    #[must_use]
    pub fn new(universe: Arc<Universe<K>>) -> Self {
        Self::with_trim(universe, Trim::default())
    }

    /// Creates a factory with a custom trimming heuristic.
    #[must_use]
    pub fn with_trim(universe: Arc<Universe<K>>, trim: Trim) -> Self {
        Self {
            universe,
            trim,
            stats: Cell::new(Stats::default()),
        }
    }

    /// The shared key universe.
    #[must_use]
    pub fn universe(&self) -> &Arc<Universe<K>> {
        &self.universe
    }

    /// The trimming heuristic in use.
    #[must_use]
    pub fn trim(&self) -> Trim {
        self.trim
    }

    /// Counters for the maps built so far.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats.get()
    }

    /// Estimated bytes held by the universe and by every map built so far.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.universe.estimated_bytes() + self.stats().estimated_bytes()
    }

    /// A builder for a new map.
    #[must_use]
    pub fn builder<V>(&self) -> MapBuilder<'_, K, V> {
        MapBuilder::new(self, None)
    }

    /// A builder for a new map whose [`MapBuilder::get`] creates missing entries.
    ///
    /// Whatever `missing` returns for an absent key is stored as if by [`MapBuilder::put`].
    pub fn builder_with<'f, V, F>(&'f self, missing: F) -> MapBuilder<'f, K, V>
    where
        F: FnMut(&K) -> Option<V> + 'f,
    {
        MapBuilder::new(self, Some(Box::new(missing)))
    }
}

// -------------------- Builder -------------------- //

/// Supplier for values of absent keys.
type Missing<'f, K, V> = Box<dyn FnMut(&K) -> Option<V> + 'f>;

/// A single-use builder for a [`CompactMap`].
///
/// ## Invariants
///
/// A slot is occupied iff its key is in the map being built, `len` counts the occupied slots, and
/// every occupied slot lies within `min..=max`.
pub struct MapBuilder<'f, K, V> {
    /// The owning factory.
    factory: &'f CompactMapFactory<K>,
    /// One slot per key of the universe. `None` once built.
    values: Option<Vec<Option<V>>>,
    /// Supplier used by [`Self::get`] for absent keys.
    missing: Option<Missing<'f, K, V>>,
    /// Number of occupied slots.
    len: usize,
    /// Least occupied index, or `usize::MAX`.
    min: usize,
    /// Greatest occupied index.
    max: usize,
}

impl<'f, K, V> MapBuilder<'f, K, V> {
    /// Initializes an empty builder.
    fn new(factory: &'f CompactMapFactory<K>, missing: Option<Missing<'f, K, V>>) -> Self {
        Self {
            factory,
            values: Some(std::iter::repeat_with(|| None).take(factory.universe.len()).collect()),
            missing,
            len: 0,
            min: usize::MAX,
            max: 0,
        }
    }

    /// Number of entries so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no entries have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether [`Self::build`] has consumed this builder.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.values.is_none()
    }

    /// Marks `index` as occupied.
    fn occupy(len: &mut usize, min: &mut usize, max: &mut usize, index: usize) {
        *len += 1;
        *min = (*min).min(index);
        *max = (*max).max(index);
    }

    /// Builds the map, consuming the builder.
    ///
    /// ## Errors
    ///
    /// [`Error::AlreadyBuilt`] if the builder was already built.
    pub fn build(&mut self) -> Result<CompactMap<K, V>, Error> {
        let mut values = self.values.take().ok_or(Error::AlreadyBuilt)?;
        self.missing = None;
        let universe = &self.factory.universe;

        let repr = if self.len < 3 {
            let mut entries = values
                .into_iter()
                .enumerate()
                .skip(self.min.min(universe.len()))
                .filter_map(|(i, value)| value.map(|value| (i, value)));

            match (entries.next(), entries.next()) {
                (Some(fst), None) => Repr::Single {
                    universe: Arc::clone(universe),
                    entry: fst,
                },
                (Some(fst), Some(snd)) => Repr::Pair {
                    universe: Arc::clone(universe),
                    entries: [fst, snd],
                },
                _ => Repr::Empty,
            }
        } else {
            let offset = if self.factory.trim.applies(self.min, self.max, values.len()) {
                log::trace!(
                    "trimming indexed map to {}..={} of {}",
                    self.min,
                    self.max,
                    values.len()
                );
                values.truncate(self.max + 1);
                values.drain(..self.min);
                self.min
            } else {
                0
            };

            Repr::Indexed(IndexRefMap {
                universe: Arc::clone(universe),
                values: values.into_boxed_slice(),
                offset,
                len: self.len,
                rendered: OnceLock::new(),
            })
        };

        let map = CompactMap(repr);
        let repr = map.representation();
        log::trace!("built {repr} map with {} entries", self.len);

        let mut stats = self.factory.stats.get();
        stats.record(repr, map.estimated_bytes());
        self.factory.stats.set(stats);
        Ok(map)
    }
}

impl<K: Hash + Eq, V> MapBuilder<'_, K, V> {
    /// Index of `key`, checking the builder is still usable.
    fn index_of<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> Result<usize, Error>
    where
        K: Borrow<Q>,
    {
        if self.is_built() {
            return Err(Error::AlreadyBuilt);
        }
        self.factory.universe.index_of(key).ok_or(Error::InvalidKey)
    }

    /// Sets the value for `key`, returning the previous one.
    ///
    /// ## Errors
    ///
    /// - [`Error::AlreadyBuilt`] if the builder was already built.
    /// - [`Error::InvalidKey`] if `key` is not in the universe.
    pub fn put<Q: ?Sized + Hash + Eq>(&mut self, key: &Q, value: V) -> Result<Option<V>, Error>
    where
        K: Borrow<Q>,
    {
        let index = self.index_of(key)?;
        let slot = &mut self.values.as_mut().ok_or(Error::AlreadyBuilt)?[index];
        let prev = slot.replace(value);
        if prev.is_none() {
            Self::occupy(&mut self.len, &mut self.min, &mut self.max, index);
        }
        Ok(prev)
    }

    /// The value for `key`.
    ///
    /// If `key` has no entry and the builder was created with a missing-value supplier, its value
    /// is stored and returned. Later calls return that same value.
    ///
    /// ## Errors
    ///
    /// - [`Error::AlreadyBuilt`] if the builder was already built.
    /// - [`Error::InvalidKey`] if `key` is not in the universe.
    /// - [`Error::InvalidValue`] if the supplier returned no value.
    pub fn get<Q: ?Sized + Hash + Eq>(&mut self, key: &Q) -> Result<Option<&mut V>, Error>
    where
        K: Borrow<Q>,
    {
        let index = self.index_of(key)?;
        let slot = &mut self.values.as_mut().ok_or(Error::AlreadyBuilt)?[index];

        if slot.is_none() {
            if let Some(missing) = self.missing.as_mut() {
                let value = missing(&self.factory.universe[index]).ok_or(Error::InvalidValue)?;
                *slot = Some(value);
                Self::occupy(&mut self.len, &mut self.min, &mut self.max, index);
            }
        }

        Ok(slot.as_mut())
    }

    /// Whether `key` has an entry. Never invokes the missing-value supplier.
    ///
    /// ## Errors
    ///
    /// See [`Self::put`].
    pub fn contains_key<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> Result<bool, Error>
    where
        K: Borrow<Q>,
    {
        let index = self.index_of(key)?;
        Ok(self
            .values
            .as_ref()
            .is_some_and(|values| values[index].is_some()))
    }
}

// -------------------- Indexed maps -------------------- //

/// An immutable map storing its values in a dense array, indexed through a shared [`Universe`].
///
/// ## Invariants
///
/// The value for the key at universe index `i` is `values[i - offset]`, when that is in bounds
/// and occupied. `len` is the number of occupied slots.
pub struct IndexRefMap<K, V> {
    /// The shared key universe.
    universe: Arc<Universe<K>>,
    /// Values, possibly trimmed on both ends.
    values: Box<[Option<V>]>,
    /// Universe index of `values[0]`.
    offset: usize,
    /// Number of entries.
    len: usize,
    /// Memoized [`Display`] output.
    rendered: OnceLock<String>,
}

impl<K, V: Clone> Clone for IndexRefMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            universe: Arc::clone(&self.universe),
            values: self.values.clone(),
            offset: self.offset,
            len: self.len,
            rendered: self.rendered.clone(),
        }
    }
}

impl<K, V> IndexRefMap<K, V> {
    /// The shared key universe.
    #[must_use]
    pub fn universe(&self) -> &Arc<Universe<K>> {
        &self.universe
    }

    /// Universe index of the first stored slot.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of stored slots, occupied or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map is empty. Built maps never are.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The value for the key at universe index `index`.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&V> {
        index
            .checked_sub(self.offset)
            .and_then(|i| self.values.get(i))
            .and_then(Option::as_ref)
    }

    /// Iterates over `(index, value)` pairs in increasing index order.
    fn entries(&self) -> Entries<'_, V> {
        Entries::Indexed {
            offset: self.offset,
            iter: self.values.iter().enumerate(),
        }
    }

    /// Iterates over the entries in universe order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.entries().map(|(i, value)| (&self.universe[i], value))
    }
}

impl<K: Hash + Eq, V> IndexRefMap<K, V> {
    /// The value for `key`.
    pub fn get<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
    {
        self.universe
            .index_of(key)
            .and_then(|index| self.get_index(index))
    }
}

/// Writes the map as `{k: v, ...}`. The string is rendered once and reused.
impl<K: Display, V: Display> Display for IndexRefMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let rendered = self.rendered.get_or_init(|| {
            let mut buf = String::new();
            // Writing into a `String` can't fail.
            let _ = write_entries(&mut buf, self.iter());
            buf
        });
        f.write_str(rendered)
    }
}

/// Writes `{k: v, ...}`.
fn write_entries<'a, K: Display + 'a, V: Display + 'a, I: IntoIterator<Item = (&'a K, &'a V)>>(
    f: &mut impl Write,
    iter: I,
) -> FmtResult {
    write_roster(
        f,
        iter.into_iter()
            .map(|(key, value)| format!("{key}: {value}")),
    )
}

// -------------------- Compact maps -------------------- //

/// The representation behind a [`CompactMap`].
enum Repr<K, V> {
    /// No entries.
    Empty,
    /// A single inline entry.
    Single {
        /// The shared key universe.
        universe: Arc<Universe<K>>,
        /// Index of the key, and its value.
        entry: (usize, V),
    },
    /// Two inline entries, in index order.
    Pair {
        /// The shared key universe.
        universe: Arc<Universe<K>>,
        /// Indices of the keys, and their values.
        entries: [(usize, V); 2],
    },
    /// Three or more entries.
    Indexed(IndexRefMap<K, V>),
}

/// An immutable map whose keys come from a shared [`Universe`].
///
/// Built by a [`MapBuilder`]. Iteration follows increasing universe index, not insertion order.
/// Equality compares contents, regardless of representation.
pub struct CompactMap<K, V>(Repr<K, V>);

impl<K, V: Clone> Clone for CompactMap<K, V> {
    fn clone(&self) -> Self {
        Self(match &self.0 {
            Repr::Empty => Repr::Empty,
            Repr::Single { universe, entry } => Repr::Single {
                universe: Arc::clone(universe),
                entry: entry.clone(),
            },
            Repr::Pair { universe, entries } => Repr::Pair {
                universe: Arc::clone(universe),
                entries: entries.clone(),
            },
            Repr::Indexed(map) => Repr::Indexed(map.clone()),
        })
    }
}

impl<K, V> Default for CompactMap<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Iterator over `(index, value)` pairs of a [`CompactMap`].
enum Entries<'a, V> {
    /// Inline entries.
    Inline(slice::Iter<'a, (usize, V)>),
    /// Slots of an [`IndexRefMap`].
    Indexed {
        /// Universe index of the first slot.
        offset: usize,
        /// Remaining slots.
        iter: Enumerate<slice::Iter<'a, Option<V>>>,
    },
}

impl<'a, V> Iterator for Entries<'a, V> {
    type Item = (usize, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Inline(iter) => iter.next().map(|(i, value)| (*i, value)),
            Self::Indexed { offset, iter } => iter
                .find_map(|(i, value)| value.as_ref().map(|value| (i, value)))
                .map(|(i, value)| (*offset + i, value)),
        }
    }
}

impl<K, V> CompactMap<K, V> {
    /// The canonical empty map.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Repr::Empty)
    }

    /// The key universe. The empty map has none.
    #[must_use]
    pub fn universe(&self) -> Option<&Arc<Universe<K>>> {
        match &self.0 {
            Repr::Empty => None,
            Repr::Single { universe, .. } | Repr::Pair { universe, .. } => Some(universe),
            Repr::Indexed(map) => Some(&map.universe),
        }
    }

    /// Which representation was chosen.
    #[must_use]
    pub fn representation(&self) -> Representation {
        match &self.0 {
            Repr::Empty => Representation::Empty,
            Repr::Single { .. } => Representation::Single,
            Repr::Pair { .. } => Representation::Pair,
            Repr::Indexed(_) => Representation::Indexed,
        }
    }

    /// The underlying [`IndexRefMap`], for maps of three or more entries.
    #[must_use]
    pub fn as_indexed(&self) -> Option<&IndexRefMap<K, V>> {
        match &self.0 {
            Repr::Indexed(map) => Some(map),
            _ => None,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.0 {
            Repr::Empty => 0,
            Repr::Single { .. } => 1,
            Repr::Pair { .. } => 2,
            Repr::Indexed(map) => map.len,
        }
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.0, Repr::Empty)
    }

    /// Iterates over `(index, value)` pairs in increasing index order.
    fn entries(&self) -> Entries<'_, V> {
        match &self.0 {
            Repr::Empty => Entries::Inline(slice::Iter::default()),
            Repr::Single { entry, .. } => Entries::Inline(slice::from_ref(entry).iter()),
            Repr::Pair { entries, .. } => Entries::Inline(entries.iter()),
            Repr::Indexed(map) => map.entries(),
        }
    }

    /// The value for the key at universe index `index`.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&V> {
        match &self.0 {
            Repr::Indexed(map) => map.get_index(index),
            _ => self
                .entries()
                .find_map(|(i, value)| (i == index).then_some(value)),
        }
    }

    /// Iterates over the entries in universe order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let universe = self.universe();
        self.entries().filter_map(move |(i, value)| {
            universe
                .and_then(|universe| universe.get(i))
                .map(|key| (key, value))
        })
    }

    /// Iterates over the keys in universe order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Iterates over the values in universe order of their keys.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.entries().map(|(_, value)| value)
    }

    /// Rough footprint of this map, in bytes, not counting the shared universe.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        let inline = mem::size_of::<Self>();
        match &self.0 {
            Repr::Indexed(map) => inline + map.values.len() * mem::size_of::<Option<V>>(),
            _ => inline,
        }
    }
}

impl<K: Hash + Eq, V> CompactMap<K, V> {
    /// The value for `key`.
    pub fn get<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
    {
        match &self.0 {
            Repr::Empty => None,
            Repr::Single { universe, entry } => {
                (Borrow::<Q>::borrow(&universe[entry.0]) == key).then_some(&entry.1)
            }
            Repr::Pair { universe, entries } => entries
                .iter()
                .find(|(i, _)| Borrow::<Q>::borrow(&universe[*i]) == key)
                .map(|(_, value)| value),
            Repr::Indexed(map) => map.get(key),
        }
    }

    /// Whether `key` has an entry.
    pub fn contains_key<Q: ?Sized + Hash + Eq>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
    {
        self.get(key).is_some()
    }
}

// -------------------- Traits -------------------- //

impl<K: Debug, V: Debug> Debug for CompactMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Writes the map as `{k: v, ...}`.
///
/// Indexed maps reuse the string cached by their [`IndexRefMap`]. Inline maps hold at most two
/// entries and render on the fly.
impl<K: Display, V: Display> Display for CompactMap<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.0 {
            Repr::Indexed(map) => Display::fmt(map, f),
            _ => write_entries(f, self.iter()),
        }
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for CompactMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }

        match (self.universe(), other.universe()) {
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => self.entries().eq(other.entries()),
            _ => self.iter().all(|(key, value)| other.get(key) == Some(value)),
        }
    }
}

impl<K: Hash + Eq, V: Eq> Eq for CompactMap<K, V> {}

impl<K: Hash + Eq, V: PartialEq, S: BuildHasher> PartialEq<HashMap<K, V, S>> for CompactMap<K, V> {
    fn eq(&self, other: &HashMap<K, V, S>) -> bool {
        self.len() == other.len() && self.iter().all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K: Ord, V: PartialEq> PartialEq<BTreeMap<K, V>> for CompactMap<K, V> {
    fn eq(&self, other: &BTreeMap<K, V>) -> bool {
        self.len() == other.len() && self.iter().all(|(key, value)| other.get(key) == Some(value))
    }
}
