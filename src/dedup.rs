//! Building many [`Subset`]s of one [`Universe`] in lockstep, sharing storage between subsets that
//! are identical so far.
//!
//! ## Protocol
//!
//! The caller walks the universe in index order. For each element, it calls
//! [`SubsetDeduper::add`] on every builder that should contain it, then
//! [`SubsetDeduper::element_finished`] once. When every element has been processed,
//! [`SubsetDeduper::complete`] returns a [`Completion`] token, which [`SubsetDeduper::build`]
//! requires.
//!
//! ## Sharing
//!
//! Builders point at backing bit sets stored in an arena. Builders that have added exactly the
//! same elements so far point at the same backing set. Adding to a shared backing set only stages
//! the element; it is written when the element is finished. At that point, every builder that did
//! not add the element but whose backing set has it staged moves to a copy without it. The copy is
//! memoized for the round, so all builders skipping the element land on the same copy.

use crate::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// Source of distinct deduper identities.
static NEXT_OWNER: AtomicUsize = AtomicUsize::new(0);

/// Index of a [`Backing`] within the arena.
type BackingId = usize;

/// A word-packed bit set, possibly shared by several builders.
///
/// ## Invariants
///
/// Bit `i` of `bits` stands for universe index `word_offset * 64 + i`. `offered` is only ever set
/// between an element being opened and finished, and never refers to a bit already set.
struct Backing<T> {
    /// Index of the first stored word within the universe's index space.
    word_offset: usize,
    /// Committed bits, up to the end of the universe.
    bits: BitVec<u64, Lsb0>,
    /// Number of committed bits.
    len: usize,
    /// Element staged this round, not yet committed.
    offered: Option<usize>,
    /// Copy of this set without this round's staged element.
    without: Option<BackingId>,
    /// Memoized result of building this set.
    built: Option<Subset<T>>,
}

impl<T> Backing<T> {
    /// Rough footprint of a backing set with the given number of bits.
    fn estimated_bytes(bits: usize) -> usize {
        mem::size_of::<Self>() + bits / 8
    }
}

/// What a deduper tracks about each builder.
#[derive(Clone, Copy, Debug, Default)]
struct BuilderState {
    /// The backing set, once something has been added.
    backing: Option<BackingId>,
    /// Number of elements added.
    len: usize,
    /// The last element added.
    last: Option<usize>,
}

/// Whether an element is currently being added to builders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    /// Between elements.
    Idle,
    /// The element at this index is open.
    Open(usize),
}

/// Handle to a subset under construction within a [`SubsetDeduper`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubsetBuilder {
    /// Identity of the owning deduper.
    owner: usize,
    /// Position among the deduper's builders.
    id: usize,
}

/// Proof that a [`SubsetDeduper`] has processed every element.
#[derive(Debug)]
pub struct Completion {
    /// Identity of the deduper that issued it.
    owner: usize,
}

/// Builds many [`Subset`]s of one universe, sharing storage between identical ones.
///
/// See the [module documentation](self) for the protocol. Violations are reported as
/// [`Error::ProtocolViolation`] rather than producing wrong subsets.
pub struct SubsetDeduper<T> {
    /// Identity checked against builders and completion tokens.
    owner: usize,
    /// The shared universe.
    universe: Arc<Universe<T>>,
    /// Arena of backing sets.
    backings: Vec<Backing<T>>,
    /// Per-builder state, indexed by builder id.
    builders: Vec<BuilderState>,
    /// The element currently open.
    cursor: Cursor,
    /// The last element finished.
    finished: Option<usize>,
    /// Backing set created this round for builders whose first element is the open one.
    fresh: Option<BackingId>,
    /// Backing sets with an element staged this round.
    touched: SmallVec<BackingId>,
    /// Whether [`Self::complete`] has been called.
    complete: bool,
    /// Running diagnostics.
    stats: Stats,
}

// -------------------- Basic methods -------------------- //

impl<T: Hash + Eq> SubsetDeduper<T> {
    /// Creates a deduper over a fresh universe holding `elements`.
    pub fn from_elements<I: IntoIterator<Item = T>>(elements: I) -> Self {
        Self::new(Arc::new(Universe::new(elements)))
    }
}

impl<T> SubsetDeduper<T> {
    /// Creates a deduper over a shared universe.
    #[must_use]
    pub fn new(universe: Arc<Universe<T>>) -> Self {
        Self {
            owner: NEXT_OWNER.fetch_add(1, AtomicOrdering::Relaxed),
            universe,
            backings: Vec::new(),
            builders: Vec::new(),
            cursor: Cursor::Idle,
            finished: None,
            fresh: None,
            touched: SmallVec::new(),
            complete: false,
            stats: Stats::default(),
        }
    }

    /// The shared universe.
    #[must_use]
    pub fn universe(&self) -> &Arc<Universe<T>> {
        &self.universe
    }

    /// Counters for the backing sets and subsets built so far.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Number of backing sets allocated, forks included.
    #[must_use]
    pub fn backing_count(&self) -> usize {
        self.backings.len()
    }

    /// Estimated bytes held by the universe, the bookkeeping, the backing sets and the subsets
    /// built so far.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.universe.estimated_bytes()
            + self.builders.len() * mem::size_of::<BuilderState>()
            + self.stats.estimated_bytes()
    }

    /// The universe index currently open, if any.
    #[must_use]
    pub fn open_index(&self) -> Option<usize> {
        match self.cursor {
            Cursor::Idle => None,
            Cursor::Open(index) => Some(index),
        }
    }

    /// Creates a builder for a new, empty subset.
    pub fn builder(&mut self) -> SubsetBuilder {
        self.builders.push(BuilderState::default());
        SubsetBuilder {
            owner: self.owner,
            id: self.builders.len() - 1,
        }
    }

    /// The state of a builder of ours.
    fn state(&self, builder: SubsetBuilder) -> Result<BuilderState, Error> {
        if builder.owner == self.owner {
            Ok(self.builders[builder.id])
        } else {
            Err(Error::WrongOwner)
        }
    }

    /// Number of elements added to `builder` so far.
    ///
    /// ## Errors
    ///
    /// [`Error::WrongOwner`] if the builder belongs to another deduper.
    pub fn len(&self, builder: SubsetBuilder) -> Result<usize, Error> {
        Ok(self.state(builder)?.len)
    }

    /// Whether two builders currently point at the same backing set.
    ///
    /// Builders that have added nothing share nothing.
    #[must_use]
    pub fn shares_backing(&self, fst: SubsetBuilder, snd: SubsetBuilder) -> bool {
        match (self.state(fst), self.state(snd)) {
            (Ok(fst), Ok(snd)) => fst.backing.is_some() && fst.backing == snd.backing,
            _ => false,
        }
    }

    /// The error for using `index` in the current state.
    fn violation(&self, index: Option<usize>) -> Error {
        Error::ProtocolViolation {
            index,
            open: self.open_index(),
        }
    }

    /// Checks that `index` is a valid universe index.
    fn check_index(&self, index: usize) -> Result<(), Error> {
        if index < self.universe.len() {
            Ok(())
        } else {
            Err(Error::InvalidElement)
        }
    }

    /// Whether `index` may be opened now: it must come after every finished element.
    fn can_open(&self, index: usize) -> bool {
        !self.complete && self.finished.map_or(true, |finished| index > finished)
    }
}

// -------------------- Protocol -------------------- //

impl<T> SubsetDeduper<T> {
    /// Adds the element at universe index `index` to `builder`.
    ///
    /// Adding the open element twice to the same builder has no further effect.
    ///
    /// ## Errors
    ///
    /// - [`Error::WrongOwner`] if the builder belongs to another deduper.
    /// - [`Error::InvalidElement`] if `index` is out of bounds.
    /// - [`Error::ProtocolViolation`] if another element is open, if `index` does not come after
    ///   the last finished element, or if the deduper is complete.
    pub fn add_index(&mut self, builder: SubsetBuilder, index: usize) -> Result<(), Error> {
        let state = self.state(builder)?;
        self.check_index(index)?;

        match self.cursor {
            Cursor::Open(open) if open == index => {}
            Cursor::Idle if self.can_open(index) => self.cursor = Cursor::Open(index),
            _ => return Err(self.violation(Some(index))),
        }

        if state.last == Some(index) {
            return Ok(());
        }

        let backing = if let Some(backing) = state.backing {
            self.offer(backing, index);
            backing
        } else if let Some(fresh) = self.fresh {
            fresh
        } else {
            let fresh = self.alloc(index);
            self.fresh = Some(fresh);
            fresh
        };

        let state = &mut self.builders[builder.id];
        state.backing = Some(backing);
        state.len += 1;
        state.last = Some(index);
        Ok(())
    }

    /// Allocates a backing set whose first element, staged, is `index`.
    fn alloc(&mut self, index: usize) -> BackingId {
        let word_offset = index / WORD_BITS;
        let bits = bitvec![u64, Lsb0; 0; (self.universe.words() - word_offset) * WORD_BITS];
        self.stats
            .record_backing(Backing::<T>::estimated_bytes(bits.len()), false);

        self.backings.push(Backing {
            word_offset,
            bits,
            len: 0,
            offered: Some(index),
            without: None,
            built: None,
        });
        let id = self.backings.len() - 1;
        self.touched.push(id);
        id
    }

    /// Stages `index` on a backing set, unless a sibling builder already did.
    fn offer(&mut self, backing: BackingId, index: usize) {
        let offered = &mut self.backings[backing].offered;
        debug_assert!(offered.map_or(true, |offered| offered == index));
        if offered.replace(index).is_none() {
            self.touched.push(backing);
        }
    }

    /// The memoized copy of a backing set without its staged element.
    fn without(&mut self, backing: BackingId) -> BackingId {
        if let Some(fork) = self.backings[backing].without {
            return fork;
        }

        let source = &self.backings[backing];
        let fork = Backing {
            word_offset: source.word_offset,
            bits: source.bits.clone(),
            len: source.len,
            offered: None,
            without: None,
            built: None,
        };
        self.stats
            .record_backing(Backing::<T>::estimated_bytes(fork.bits.len()), true);

        self.backings.push(fork);
        let id = self.backings.len() - 1;
        self.backings[backing].without = Some(id);
        log::trace!("backing set {backing} forked into {id} at {:?}", self.cursor);
        id
    }

    /// Marks the element at universe index `index` as finished for every builder.
    ///
    /// An element no builder added may be finished without having been opened.
    ///
    /// ## Errors
    ///
    /// - [`Error::InvalidElement`] if `index` is out of bounds.
    /// - [`Error::ProtocolViolation`] if another element is open, if `index` does not come after
    ///   the last finished element, or if the deduper is complete.
    pub fn finish_index(&mut self, index: usize) -> Result<(), Error> {
        self.check_index(index)?;
        match self.cursor {
            Cursor::Open(open) if open == index => {}
            Cursor::Idle if self.can_open(index) => {}
            _ => return Err(self.violation(Some(index))),
        }

        // Builders that skipped the element move off any backing set that has it staged.
        for id in 0..self.builders.len() {
            let state = self.builders[id];
            if let Some(backing) = state.backing {
                if state.last != Some(index) && self.backings[backing].offered == Some(index) {
                    let fork = self.without(backing);
                    self.builders[id].backing = Some(fork);
                }
            }
        }

        // Commit the staged element everywhere else.
        for backing in self.touched.drain(..) {
            let backing = &mut self.backings[backing];
            if let Some(offered) = backing.offered.take() {
                backing.bits.set(offered - backing.word_offset * WORD_BITS, true);
                backing.len += 1;
            }
            backing.without = None;
        }

        self.cursor = Cursor::Idle;
        self.finished = Some(index);
        self.fresh = None;
        Ok(())
    }

    /// Ends construction, returning the token [`Self::build`] requires.
    ///
    /// ## Errors
    ///
    /// [`Error::ProtocolViolation`] if an element is still open.
    pub fn complete(&mut self) -> Result<Completion, Error> {
        if self.cursor != Cursor::Idle {
            return Err(self.violation(None));
        }

        if !self.complete {
            self.complete = true;
            log::debug!(
                "deduper complete: {} builders over {} backing sets ({} forks)",
                self.builders.len(),
                self.backings.len(),
                self.stats.forks()
            );
        }
        Ok(Completion { owner: self.owner })
    }

    /// Builds the subset for `builder`.
    ///
    /// Builders sharing a backing set get the very same subset, and building twice returns the
    /// same subset again.
    ///
    /// ## Errors
    ///
    /// [`Error::WrongOwner`] if the builder or the token belongs to another deduper.
    pub fn build(
        &mut self,
        builder: SubsetBuilder,
        completion: &Completion,
    ) -> Result<Subset<T>, Error> {
        if completion.owner != self.owner {
            return Err(Error::WrongOwner);
        }

        let state = self.state(builder)?;
        let Some(backing) = state.backing else {
            return Ok(Subset::empty());
        };

        let universe = &self.universe;
        let backing = &mut self.backings[backing];
        debug_assert_eq!(backing.len, state.len);
        if let Some(built) = &backing.built {
            return Ok(built.clone());
        }

        let subset = Subset::from_words(
            universe,
            backing.word_offset,
            backing.bits.as_raw_slice(),
            backing.len,
        );
        self.stats
            .record(subset.representation(), subset.estimated_bytes());
        backing.built = Some(subset.clone());
        Ok(subset)
    }
}

impl<T: Hash + Eq> SubsetDeduper<T> {
    /// Index of `element` within the universe.
    fn index_of<Q: ?Sized + Hash + Eq>(&self, element: &Q) -> Result<usize, Error>
    where
        T: Borrow<Q>,
    {
        self.universe
            .index_of(element)
            .ok_or(Error::InvalidElement)
    }

    /// Adds `element` to `builder`.
    ///
    /// ## Errors
    ///
    /// See [`Self::add_index`].
    pub fn add<Q: ?Sized + Hash + Eq>(
        &mut self,
        builder: SubsetBuilder,
        element: &Q,
    ) -> Result<(), Error>
    where
        T: Borrow<Q>,
    {
        self.state(builder)?;
        let index = self.index_of(element)?;
        self.add_index(builder, index)
    }

    /// Marks `element` as finished for every builder.
    ///
    /// ## Errors
    ///
    /// See [`Self::finish_index`].
    pub fn element_finished<Q: ?Sized + Hash + Eq>(&mut self, element: &Q) -> Result<(), Error>
    where
        T: Borrow<Q>,
    {
        let index = self.index_of(element)?;
        self.finish_index(index)
    }

    /// Builds one subset per input, driving the protocol over the whole universe.
    ///
    /// The elements of each input may come in any order, and duplicates are ignored.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidElement`] if some element is not in the universe.
    pub fn build_many<'a, Q, I, J>(universe: Arc<Universe<T>>, sets: I) -> Result<Vec<Subset<T>>, Error>
    where
        Q: ?Sized + Hash + Eq + 'a,
        T: Borrow<Q>,
        I: IntoIterator<Item = J>,
        J: IntoIterator<Item = &'a Q>,
    {
        let mut deduper = Self::new(universe);

        // For each universe index, the builders containing it.
        let mut members = vec![SmallVec::<SubsetBuilder>::new(); deduper.universe.len()];
        let mut builders = Vec::new();
        for set in sets {
            let builder = deduper.builder();
            for el in set {
                members[deduper.index_of(el)?].push(builder);
            }
            builders.push(builder);
        }

        for (index, members) in members.iter().enumerate() {
            for &builder in members {
                deduper.add_index(builder, index)?;
            }
            deduper.finish_index(index)?;
        }

        let completion = deduper.complete()?;
        builders
            .into_iter()
            .map(|builder| deduper.build(builder, &completion))
            .collect()
    }
}

#[cfg(test)]
mod dedup {
    use super::*;

    fn abc() -> SubsetDeduper<&'static str> {
        SubsetDeduper::from_elements(["a", "b", "c"])
    }

    /// Adds `el` to each builder, then finishes it.
    fn step(
        deduper: &mut SubsetDeduper<&'static str>,
        el: &'static str,
        builders: &[SubsetBuilder],
    ) {
        for &builder in builders {
            deduper.add(builder, el).unwrap();
        }
        deduper.element_finished(el).unwrap();
    }

    #[test]
    fn identical() {
        let mut deduper = abc();
        let fst = deduper.builder();
        let snd = deduper.builder();

        step(&mut deduper, "a", &[fst, snd]);
        step(&mut deduper, "b", &[fst, snd]);
        assert!(deduper.shares_backing(fst, snd));
        step(&mut deduper, "c", &[]);

        let done = deduper.complete().unwrap();
        let a = deduper.build(fst, &done).unwrap();
        let b = deduper.build(snd, &done).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, ["a", "b"].into_iter().collect::<HashSet<_>>());
        assert_eq!(deduper.backing_count(), 1);
        assert_eq!(deduper.stats().forks(), 0);
    }

    #[test]
    fn diverging() {
        let mut deduper = abc();
        let fst = deduper.builder();
        let snd = deduper.builder();

        step(&mut deduper, "a", &[fst, snd]);
        assert!(deduper.shares_backing(fst, snd));
        step(&mut deduper, "b", &[fst]);
        assert!(!deduper.shares_backing(fst, snd));
        step(&mut deduper, "c", &[]);

        let done = deduper.complete().unwrap();
        let a = deduper.build(fst, &done).unwrap();
        let b = deduper.build(snd, &done).unwrap();
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(b.iter().copied().collect::<Vec<_>>(), ["a"]);
        assert_eq!(b.representation(), Representation::Single);
        assert_eq!(deduper.stats().forks(), 1);
    }

    #[test]
    fn shared_fork() {
        let mut deduper = abc();
        let builders: Vec<_> = (0..4).map(|_| deduper.builder()).collect();

        step(&mut deduper, "a", &builders);
        step(&mut deduper, "b", &builders[..2]);
        // Both builders skipping `b` land on the same copy.
        assert!(deduper.shares_backing(builders[0], builders[1]));
        assert!(deduper.shares_backing(builders[2], builders[3]));
        assert!(!deduper.shares_backing(builders[1], builders[2]));
        assert_eq!(deduper.stats().forks(), 1);

        step(&mut deduper, "c", &[builders[0], builders[3]]);
        assert_eq!(deduper.stats().forks(), 3);

        let done = deduper.complete().unwrap();
        let built: Vec<_> = builders
            .iter()
            .map(|&builder| deduper.build(builder, &done).unwrap().to_string())
            .collect();
        assert_eq!(built, ["{a, b, c}", "{a, b}", "{a}", "{a, c}"]);
    }

    #[test]
    fn diagnostics() {
        let mut deduper = abc();
        let fst = deduper.builder();
        let snd = deduper.builder();

        assert_eq!(deduper.open_index(), None);
        deduper.add_index(fst, 0).unwrap();
        assert_eq!(deduper.open_index(), Some(0));
        deduper.add_index(snd, 0).unwrap();
        deduper.finish_index(0).unwrap();
        assert_eq!(deduper.open_index(), None);

        // One backing set so far, on top of the universe.
        let backing = Backing::<&str>::estimated_bytes(WORD_BITS);
        let before = deduper.estimated_bytes();
        assert!(before >= deduper.universe().estimated_bytes() + backing);

        step(&mut deduper, "b", &[fst]);
        assert_eq!(deduper.stats().forks(), 1);
        assert_eq!(deduper.estimated_bytes(), before + backing);
    }

    #[test]
    fn first_add_collapses() {
        let mut deduper = abc();
        let fst = deduper.builder();
        let snd = deduper.builder();
        let thd = deduper.builder();

        step(&mut deduper, "a", &[fst]);
        step(&mut deduper, "b", &[snd, thd]);
        assert!(deduper.shares_backing(snd, thd));
        assert!(!deduper.shares_backing(fst, snd));
        assert_eq!(deduper.backing_count(), 2);
    }

    #[test]
    fn empty_and_full() {
        let mut deduper = abc();
        let empty = deduper.builder();
        let full = deduper.builder();
        for el in ["a", "b", "c"] {
            step(&mut deduper, el, &[full]);
        }

        let done = deduper.complete().unwrap();
        assert!(deduper.build(empty, &done).unwrap().is_empty());
        let full = deduper.build(full, &done).unwrap();
        assert_eq!(full.representation(), Representation::Full);
        assert!(Arc::ptr_eq(full.universe().unwrap(), deduper.universe()));
    }

    #[test]
    fn idempotent_build() {
        let mut deduper = SubsetDeduper::from_elements(0..300_u32);
        let fst = deduper.builder();
        let snd = deduper.builder();
        for i in 0..300 {
            if i % 7 == 0 {
                deduper.add(fst, &i).unwrap();
                deduper.add(snd, &i).unwrap();
            }
            deduper.element_finished(&i).unwrap();
        }

        let done = deduper.complete().unwrap();
        let a = deduper.build(fst, &done).unwrap();
        let b = deduper.build(fst, &done).unwrap();
        let c = deduper.build(snd, &done).unwrap();
        assert_eq!(a.representation(), Representation::Words);
        assert!(a.shares_storage(&b));
        assert!(a.shares_storage(&c));
        assert_eq!(a.len(), 43);
        assert_eq!(deduper.stats().built(Representation::Words), 1);
    }

    #[test]
    fn late_start() {
        let mut deduper = SubsetDeduper::from_elements(0..200_u32);
        let builder = deduper.builder();
        for i in [130, 140, 199] {
            deduper.add_index(builder, i).unwrap();
            deduper.finish_index(i).unwrap();
        }

        let done = deduper.complete().unwrap();
        let subset = deduper.build(builder, &done).unwrap();
        assert_eq!(subset.indices().collect::<Vec<_>>(), [130, 140, 199]);
        assert_eq!(subset.representation(), Representation::Words);
    }

    #[test]
    fn protocol() {
        let mut deduper = abc();
        let builder = deduper.builder();

        deduper.add(builder, "a").unwrap();
        deduper.add(builder, "a").unwrap();
        assert_eq!(deduper.len(builder), Ok(1));
        assert!(deduper.add(builder, "b").unwrap_err().is_protocol_violation());
        assert!(deduper
            .element_finished("b")
            .unwrap_err()
            .is_protocol_violation());
        assert!(deduper.complete().unwrap_err().is_protocol_violation());

        deduper.element_finished("a").unwrap();
        assert_eq!(
            deduper.element_finished("a"),
            Err(Error::ProtocolViolation {
                index: Some(0),
                open: None
            })
        );
        assert!(deduper.add(builder, "a").unwrap_err().is_protocol_violation());

        // Finishing an element nobody added is fine.
        deduper.element_finished("b").unwrap();
        let done = deduper.complete().unwrap();
        assert!(deduper.add(builder, "c").unwrap_err().is_protocol_violation());
        assert_eq!(deduper.build(builder, &done).unwrap().len(), 1);
    }

    #[test]
    fn invalid_element() {
        let mut deduper = abc();
        let builder = deduper.builder();
        assert_eq!(deduper.add(builder, "z"), Err(Error::InvalidElement));
        assert_eq!(deduper.element_finished("z"), Err(Error::InvalidElement));
        assert_eq!(deduper.add_index(builder, 3), Err(Error::InvalidElement));
    }

    #[test]
    fn wrong_owner() {
        let mut fst = abc();
        let mut snd = abc();
        let builder = fst.builder();
        let other = snd.builder();

        assert_eq!(fst.add(other, "a"), Err(Error::WrongOwner));
        let fst_done = fst.complete().unwrap();
        let snd_done = snd.complete().unwrap();
        assert_eq!(fst.build(builder, &snd_done).err(), Some(Error::WrongOwner));
        assert_eq!(fst.build(other, &fst_done).err(), Some(Error::WrongOwner));
        assert!(fst.build(builder, &fst_done).unwrap().is_empty());
    }

    #[test]
    fn many() {
        let universe = Arc::new(Universe::new(["a", "b", "c", "d"]));
        let subsets =
            SubsetDeduper::build_many(universe, [vec!["c", "a"], vec![], vec!["a", "c", "a"]])
                .unwrap();

        assert_eq!(subsets[0].to_string(), "{a, c}");
        assert!(subsets[1].is_empty());
        assert_eq!(subsets[0], subsets[2]);
    }
}
