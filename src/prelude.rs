//! Crate prelude.

// The actual prelude.
pub use crate::{
    dedup::{Completion, SubsetBuilder, SubsetDeduper},
    error::Error,
    map::{CompactMap, CompactMapFactory, IndexRefMap, MapBuilder, Trim},
    stats::{Representation, Stats},
    subset::Subset,
    universe::Universe,
};

// Convenient imports within the crate.
pub(crate) use crate::{subset::WORD_BITS, universe::write_roster, SmallVec};
pub(crate) use bitvec::prelude::*;
pub(crate) use rustc_hash::FxHasher;
pub(crate) use std::{
    borrow::Borrow,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt::{Debug, Display, Formatter, Result as FmtResult, Write},
    hash::{BuildHasher, BuildHasherDefault, Hash},
    mem,
    sync::{Arc, OnceLock},
};
