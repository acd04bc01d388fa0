use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};

/// A tower node of the skipmap.
///
/// A node participates in every index level below its tower height, with
/// one independently CAS-updated forward pointer per level. The low tag bit
/// of each forward pointer mirrors the `marked` flag: once a node is
/// logically deleted its whole tower is tagged, which makes concurrent
/// traversals splice it out and makes any CAS that would link a new node
/// after it fail.
pub(super) struct Node<K, V> {
  /// `None` only for the head/tail sentinels.
  key: Option<K>,
  /// The current value. Upserts swap the pointer and retire the previous
  /// value through the epoch collector.
  pub(super) value: Atomic<V>,
  /// Logical-deletion flag. The CAS from `false` to `true` has a single
  /// winner, which is the thread responsible for retiring the node.
  pub(super) marked: AtomicBool,
  /// Set once the node is linked at every level of its tower. A node that
  /// is not fully linked is never returned by a lookup and never has its
  /// value replaced.
  pub(super) fully_linked: AtomicBool,
  /// One forward pointer per level, `0..height`.
  tower: Box<[Atomic<Node<K, V>>]>,
}

impl<K, V> Node<K, V> {
  pub(super) fn new(key: K, value: V, height: usize) -> Owned<Self> {
    Owned::new(Self {
      key: Some(key),
      value: Atomic::new(value),
      marked: AtomicBool::new(false),
      fully_linked: AtomicBool::new(false),
      tower: (0..height).map(|_| Atomic::null()).collect(),
    })
  }

  /// A permanent head/tail sentinel. Sentinels hold no user key, are never
  /// marked and count as fully linked from birth.
  pub(super) fn sentinel(height: usize) -> Box<Self> {
    Box::new(Self {
      key: None,
      value: Atomic::null(),
      marked: AtomicBool::new(false),
      fully_linked: AtomicBool::new(true),
      tower: (0..height).map(|_| Atomic::null()).collect(),
    })
  }

  /// The number of levels this node is linked at.
  #[inline]
  pub(super) fn height(&self) -> usize {
    self.tower.len()
  }

  /// The user key, or `None` for a sentinel.
  #[inline]
  pub(super) fn entry_key(&self) -> Option<&K> {
    self.key.as_ref()
  }

  #[inline]
  pub(super) fn tower(&self, level: usize) -> &Atomic<Node<K, V>> {
    &self.tower[level]
  }

  /// Tags every forward pointer in the tower, from the top level down to
  /// level 0, sealing the node against new links at each level.
  pub(super) fn mark_tower(&self) {
    for level in (0..self.height()).rev() {
      // Tagging is idempotent; only the marked-CAS winner gets here.
      self.tower[level].fetch_or(1, Ordering::SeqCst, unsafe { epoch::unprotected() });
    }
  }

  /// Takes the key and value back out of a node that was never shared,
  /// i.e. a candidate whose level-0 link CAS lost the race.
  pub(super) fn into_parts(node: Owned<Self>) -> (K, V) {
    let mut node = node.into_box();
    let value = mem::replace(&mut node.value, Atomic::null());
    // Safety: the node was never linked, so this thread is the only owner
    // of both the node and its value.
    let value = unsafe {
      let shared = value.load(Ordering::Relaxed, epoch::unprotected());
      *shared.into_owned().into_box()
    };
    match node.key.take() {
      Some(key) => (key, value),
      None => unreachable!("candidate nodes always carry a key"),
    }
  }
}

impl<K, V> Drop for Node<K, V> {
  fn drop(&mut self) {
    // The node owns whatever value is current at destruction time; values
    // replaced earlier were retired by the thread that swapped them out.
    let value = mem::replace(&mut self.value, Atomic::null());
    unsafe {
      let shared = value.load(Ordering::Relaxed, epoch::unprotected());
      if !shared.is_null() {
        drop(shared.into_owned());
      }
    }
  }
}

/// The per-level predecessor/successor pairs recorded by a search, plus the
/// level-0 match if the key is present.
pub(super) struct Position<'g, K, V> {
  pub(super) found: Option<Shared<'g, Node<K, V>>>,
  pub(super) preds: [Shared<'g, Node<K, V>>; crate::MAX_HEIGHT],
  pub(super) succs: [Shared<'g, Node<K, V>>; crate::MAX_HEIGHT],
}
