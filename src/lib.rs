//! # Compact collections over a shared superset
//!
//! Applications such as permission engines build thousands of small maps and sets whose keys all
//! come from the same, known-in-advance superset. Here that superset is a [`Universe`], which
//! assigns each element a dense index, and every collection stores indices into it instead of
//! owning hash tables.
//!
//! - [`CompactMapFactory`] builds [`CompactMap`]s: inline for up to two entries, otherwise a dense
//!   array of values indexed through the universe.
//! - [`SubsetDeduper`] builds bit-packed [`Subset`]s in lockstep, sharing storage between subsets
//!   that turn out identical.
//!
//! Builders are single-threaded. Built collections are immutable, and can be read from any thread.
//!
//! ```
//! use superset::prelude::*;
//!
//! let factory = CompactMapFactory::from_keys(["read", "write", "admin"]);
//! let mut builder = factory.builder();
//! builder.put("read", true).unwrap();
//! let map = builder.build().unwrap();
//! assert_eq!(map.get("read"), Some(&true));
//! assert!(!map.contains_key("admin"));
//! ```

#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

pub mod dedup;
pub mod error;
pub mod map;
pub mod prelude;
pub mod stats;
pub mod subset;
pub mod universe;

mod proptests;
mod tests;

/// Small vector.
type SmallVec<T> = smallvec::SmallVec<[T; 4]>;
