//! A lock-free thread-safe concurrent skipmap.
//!
//! [`SkipMap`] is an ordered map backed by a probabilistic multi-level skip
//! list. Any number of threads may call [`SkipMap::insert`],
//! [`SkipMap::remove`] and [`SkipMap::get`] concurrently; all coordination
//! happens through per-pointer compare-and-swap operations, never through a
//! mutex. Memory reclamation is deferred through
//! [`crossbeam-epoch`](crossbeam_epoch), so a removed node is only freed once
//! no in-flight traversal can still reference it.
//!
//! Reads borrow from the map under an epoch [`Guard`]:
//!
//! ```rust
//! use skipmap::SkipMap;
//!
//! let map = SkipMap::new();
//! map.insert(10, "a");
//! map.insert(20, "b");
//! map.insert(5, "c");
//!
//! let guard = skipmap::pin();
//! assert_eq!(map.get(&5, &guard).map(|ent| *ent.value()), Some("c"));
//! assert!(map.get(&15, &guard).is_none());
//!
//! assert!(map.remove(&10));
//! assert!(!map.remove(&10));
//! assert!(map.get(&10, &guard).is_none());
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]

pub use crossbeam_epoch::{pin, Guard};

mod error;
mod options;

/// A map implementation based on skiplist
pub mod map;

pub use error::Error;
pub use map::{Entry, SkipMap};
pub use options::Options;

/// The hard upper bound on the index height of any [`SkipMap`].
///
/// [`Options::with_max_height`] may lower the bound for an individual map,
/// but can never raise it past this value.
pub const MAX_HEIGHT: usize = 32;
