use core::borrow::Borrow;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Guard, Shared};
use crossbeam_utils::CachePadded;

use crate::{options::Options, Error, MAX_HEIGHT};

mod node;
use node::{Node, Position};


/// A fast, concurrent, lock-free ordered map implementation based on a
/// skiplist.
///
/// Entries are linked into a multi-level probabilistic index; every mutation
/// is an optimistic attempt-verify-retry sequence of per-pointer CAS
/// operations, so readers and writers never block each other. Removal is
/// two-phase: an entry is first marked as logically deleted, then spliced
/// out of every level from the top down, and finally handed to the epoch
/// collector once no in-flight traversal can still reference it.
pub struct SkipMap<K, V> {
  head: Box<Node<K, V>>,
  tail: Box<Node<K, V>>,

  /// Current height. `1 <= height <= max_height`. CAS.
  height: CachePadded<AtomicUsize>,
  len: CachePadded<AtomicUsize>,

  max_height: usize,
  /// Promotion thresholds, one per level, precomputed from the
  /// level-promotion probability.
  probs: Box<[u32]>,
}

impl<K, V> Default for SkipMap<K, V> {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V> SkipMap<K, V> {
  /// Create a new empty skipmap with the default [`Options`].
  pub fn new() -> Self {
    Self::new_in(Options::new())
  }

  /// Create a new empty skipmap according to the given [`Options`].
  ///
  /// # Errors
  ///
  /// - Returns `Error::InvalidMaxHeight` if the max height is outside
  ///   `1..=MAX_HEIGHT`.
  /// - Returns `Error::InvalidProbability` if the level-promotion
  ///   probability is outside `(0, 1)`.
  pub fn with_options(opts: Options) -> Result<Self, Error> {
    opts.validate()?;
    Ok(Self::new_in(opts))
  }

  fn new_in(opts: Options) -> Self {
    let max_height = opts.max_height();
    let head = Node::sentinel(max_height);
    let tail = Node::sentinel(max_height);

    // Link head to tail at every level. The map is not shared yet, so
    // relaxed stores are enough.
    let tail_ptr = Shared::from(&*tail as *const Node<K, V>);
    for level in 0..max_height {
      head.tower(level).store(tail_ptr, Ordering::Relaxed);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(max_height, probability = opts.probability(), "created skipmap");

    Self {
      head,
      tail,
      height: CachePadded::new(AtomicUsize::new(1)),
      len: CachePadded::new(AtomicUsize::new(0)),
      max_height,
      probs: opts.promotion_table(),
    }
  }

  /// Returns the height of the highest tower within any of the entries that
  /// have ever been inserted into this skipmap.
  #[inline]
  pub fn height(&self) -> usize {
    self.height.load(Ordering::Acquire)
  }

  /// Returns the upper bound on the index height of this skipmap.
  #[inline]
  pub fn max_height(&self) -> usize {
    self.max_height
  }

  /// Returns the number of live entries in the skipmap.
  #[inline]
  pub fn len(&self) -> usize {
    self.len.load(Ordering::Acquire)
  }

  /// Returns true if the skipmap contains no live entries.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns a random height in `1..=max_height`, drawn from a geometric
  /// distribution so that the expected number of entries per level decays
  /// by the promotion probability.
  fn random_height(&self) -> usize {
    use rand::{thread_rng, Rng};
    let rnd: u32 = thread_rng().gen();
    let mut h = 1;

    while h < self.max_height && rnd <= self.probs[h] {
      h += 1;
    }
    h
  }

  #[inline]
  fn head_ptr<'g>(&'g self) -> Shared<'g, Node<K, V>> {
    Shared::from(&*self.head as *const Node<K, V>)
  }

  #[inline]
  fn tail_ptr<'g>(&'g self) -> Shared<'g, Node<K, V>> {
    Shared::from(&*self.tail as *const Node<K, V>)
  }
}

impl<K, V> SkipMap<K, V>
where
  K: Ord + Send + 'static,
  V: Send + 'static,
{
  /// Inserts a key-value pair into the map, overwriting the value in place
  /// if the key is already present.
  ///
  /// No distinction is reported between inserting a new entry and updating
  /// an existing one; both complete the upsert.
  pub fn insert(&self, key: K, value: V) {
    let guard = &epoch::pin();
    self.insert_in(key, value, guard)
  }

  /// Removes the entry for the given key.
  ///
  /// Returns `true` if this call logically removed the entry, `false` if
  /// the key was absent or a concurrent remover won the race. Repeated
  /// calls after a successful removal return `false`.
  pub fn remove<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    let guard = &epoch::pin();
    self.remove_in(key, guard)
  }

  /// Returns the entry for the given key, if it exists.
  ///
  /// The returned [`Entry`] borrows from the map under the caller's epoch
  /// guard; it stays valid for as long as the guard is held, even if the
  /// entry is concurrently removed or its value is concurrently replaced.
  pub fn get<'g, Q>(&'g self, key: &Q, guard: &'g Guard) -> Option<Entry<'g, K, V>>
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    let search = self.find_node(key, guard);
    let found = search.found?;
    // Safety: every pointer recorded by find_node was reachable under
    // `guard`.
    let node = unsafe { found.deref() };

    // A half-published or logically deleted entry is absent from the map.
    if !node.fully_linked.load(Ordering::Acquire) || node.marked.load(Ordering::Acquire) {
      return None;
    }

    let value = node.value.load(Ordering::Acquire, guard);
    node.entry_key().map(|key| Entry {
      key,
      // Safety: a live node's value pointer is never null, and a replaced
      // value is only retired through the epoch collector.
      value: unsafe { value.deref() },
    })
  }

  /// Returns true if the key exists in the map.
  #[inline]
  pub fn contains_key<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    let guard = &epoch::pin();
    self.get(key, guard).is_some()
  }

  fn insert_in(&self, key: K, value: V, guard: &Guard) {
    // The candidate height is drawn once; retries reuse it.
    let height = self.random_height();
    let mut key = key;
    let mut value = value;

    loop {
      let mut search = self.find_node(&key, guard);

      if let Some(found) = search.found {
        // Safety: reachable under `guard`.
        let node = unsafe { found.deref() };

        if node.marked.load(Ordering::Acquire) {
          // A removal of this key is in flight; wait for the structure to
          // settle and retry the whole operation.
          continue;
        }

        // The key exists: update the value in place. The owning inserter
        // is the only thread that can finish the publication we may be
        // waiting on.
        while !node.fully_linked.load(Ordering::Acquire) {
          core::hint::spin_loop();
        }

        let new_value = epoch::Owned::new(value).into_shared(guard);
        let old_value = node.value.swap(new_value, Ordering::AcqRel, guard);
        // Safety: the swap made the old value unreachable from the map and
        // no other thread retires it.
        unsafe { guard.defer_destroy(old_value) };
        return;
      }

      // The key is absent: splice a fresh node between each level's
      // pred/succ pair, starting from the bottom.
      let new_node = Node::new(key, value, height);
      for level in 0..height {
        new_node.tower(level).store(search.succs[level], Ordering::Relaxed);
      }
      let new_node = new_node.into_shared(guard);
      // Safety: `new_node` stays alive at least as long as `guard`.
      let node = unsafe { new_node.deref() };

      // The level-0 CAS establishes node identity: exactly one inserter
      // can win it for a given position, so a duplicate-insert race
      // collapses into the update path on the loser's retry.
      if unsafe { search.preds[0].deref() }
        .tower(0)
        .compare_exchange(
          search.succs[0],
          new_node,
          Ordering::SeqCst,
          Ordering::Acquire,
          guard,
        )
        .is_err()
      {
        // Safety: the node was never linked, so we still own it.
        let parts = Node::into_parts(unsafe { new_node.into_owned() });
        key = parts.0;
        value = parts.1;
        continue;
      }

      self.len.fetch_add(1, Ordering::AcqRel);

      // Raise the map height before building the upper tower so that
      // subsequent searches cover those levels and the per-level retries
      // below can terminate.
      let mut list_height = self.height();
      while height > list_height {
        match self.height.compare_exchange_weak(
          list_height,
          height,
          Ordering::SeqCst,
          Ordering::Acquire,
        ) {
          Ok(_) => break,
          Err(h) => list_height = h,
        }
      }

      let key = match node.entry_key() {
        Some(key) => key,
        None => unreachable!("user entries always carry a key"),
      };

      for level in 1..height {
        loop {
          let pred = search.preds[level];
          let succ = search.succs[level];

          // Never link two nodes with an equal key: an equal-key successor
          // at an upper level is a removed node that a fresh search will
          // splice out first.
          if let Some(succ_key) = unsafe { succ.deref() }.entry_key() {
            if succ_key == key {
              search = self.find_node(key, guard);
              continue;
            }
          }

          node.tower(level).store(succ, Ordering::SeqCst);
          if unsafe { pred.deref() }
            .tower(level)
            .compare_exchange(succ, new_node, Ordering::SeqCst, Ordering::Acquire, guard)
            .is_ok()
          {
            break;
          }

          // The splice moved under us; refresh it and retry this level.
          // Levels linked so far are never undone.
          search = self.find_node(key, guard);
        }
      }

      // Publish: the node is now reachable at all of its levels.
      node.fully_linked.store(true, Ordering::Release);

      #[cfg(feature = "tracing")]
      tracing::trace!(height, "inserted new entry");
      return;
    }
  }

  fn remove_in<Q>(&self, key: &Q, guard: &Guard) -> bool
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    let search = self.find_node(key, guard);
    let found = match search.found {
      Some(found) => found,
      None => return false,
    };
    // Safety: reachable under `guard`.
    let node = unsafe { found.deref() };

    // Wait out a publication in progress; the owning inserter is the only
    // thread that can finish it.
    while !node.fully_linked.load(Ordering::Acquire) {
      core::hint::spin_loop();
    }

    // Logical deletion point. The CAS has a single winner, which takes
    // over responsibility for unlinking and retiring the node.
    if node
      .marked
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return false;
    }

    self.len.fetch_sub(1, Ordering::AcqRel);

    // Seal the tower so traversals splice the node out and no new node can
    // be linked after it at any level.
    node.mark_tower();

    // Physically unlink from the top level down, so a concurrent top-down
    // traversal never sees the node gone below but still present above.
    let mut unlinked = true;
    for level in (0..node.height()).rev() {
      let succ = node
        .tower(level)
        .load(Ordering::SeqCst, guard)
        .with_tag(0);

      if unsafe { search.preds[level].deref() }
        .tower(level)
        .compare_exchange(found, succ, Ordering::SeqCst, Ordering::Acquire, guard)
        .is_err()
      {
        unlinked = false;
        break;
      }
    }

    if !unlinked {
      // A predecessor moved; one full search pass splices out whatever
      // links remain.
      self.find_node(key, guard);
    }

    // Safety: the node is unreachable at every level, and this thread is
    // the unique marked-CAS winner.
    unsafe { guard.defer_destroy(found) };
    true
  }

  /// The central traversal routine: walks the index from the current max
  /// level down to level 0, recording each level's predecessor/successor
  /// bracket around `key` and opportunistically splicing out any logically
  /// deleted node it encounters. Restarts from the head whenever a CAS
  /// observes a concurrent mutation.
  fn find_node<'g, Q>(&'g self, key: &Q, guard: &'g Guard) -> Position<'g, K, V>
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    let head = self.head_ptr();
    let tail = self.tail_ptr();

    'search: loop {
      // Levels above the current height keep the head/tail bracket; an
      // insert raising the height validates it with its own CAS.
      let mut preds = [head; MAX_HEIGHT];
      let mut succs = [tail; MAX_HEIGHT];
      let mut pred = head;

      for level in (0..self.height()).rev() {
        // Safety: `pred` is the head sentinel or a node that was reachable
        // at this level under `guard`.
        let mut curr = unsafe { pred.deref() }.tower(level).load(Ordering::SeqCst, guard);

        // The predecessor itself was removed while we were descending.
        if curr.tag() == 1 {
          continue 'search;
        }

        loop {
          // Safety: forward pointers below the current height are always
          // initialized and point at a node or the tail sentinel.
          let curr_ref = unsafe { curr.deref() };
          let curr_key = match curr_ref.entry_key() {
            Some(k) => k,
            // Reached the tail sentinel.
            None => break,
          };

          let succ = curr_ref.tower(level).load(Ordering::SeqCst, guard);
          if succ.tag() == 1 {
            // `curr` is logically deleted: splice it out of this level
            // before looking at its key.
            match unsafe { pred.deref() }.tower(level).compare_exchange(
              curr,
              succ.with_tag(0),
              Ordering::SeqCst,
              Ordering::Acquire,
              guard,
            ) {
              Ok(_) => {
                curr = succ.with_tag(0);
                continue;
              }
              Err(_) => continue 'search,
            }
          }

          if curr_key.borrow() < key {
            pred = curr;
            curr = succ;
            continue;
          }

          break;
        }

        preds[level] = pred;
        succs[level] = curr;
      }

      // Safety: `succs[0]` is the level-0 bracket node or the tail.
      let found = match unsafe { succs[0].deref() }.entry_key() {
        Some(k) if k.borrow() == key => Some(succs[0]),
        _ => None,
      };

      return Position { found, preds, succs };
    }
  }
}

impl<K, V> Drop for SkipMap<K, V> {
  fn drop(&mut self) {
    // Exclusive access: free every node still linked at level 0. Nodes
    // already unlinked were retired through the epoch collector by their
    // removers.
    unsafe {
      let guard = epoch::unprotected();
      let mut curr = self.head.tower(0).load(Ordering::Relaxed, guard).with_tag(0);

      while let Some(node) = curr.as_ref() {
        if node.entry_key().is_none() {
          break;
        }
        let next = node.tower(0).load(Ordering::Relaxed, guard).with_tag(0);
        drop(curr.into_owned());
        curr = next;
      }
    }
  }
}

impl<K, V> fmt::Debug for SkipMap<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SkipMap")
      .field("len", &self.len())
      .field("height", &self.height())
      .field("max_height", &self.max_height)
      .finish()
  }
}

#[cfg(test)]
impl<K, V> SkipMap<K, V>
where
  K: Ord + Clone + Send + 'static,
  V: Send + 'static,
{
  /// Snapshot of the live keys in level-0 order, for invariant checks.
  pub(crate) fn keys_in_order(&self) -> Vec<K> {
    let guard = &epoch::pin();
    let mut keys = Vec::new();
    let mut curr = self.head.tower(0).load(Ordering::SeqCst, guard).with_tag(0);

    unsafe {
      while let Some(node) = curr.as_ref() {
        let key = match node.entry_key() {
          Some(key) => key,
          None => break,
        };
        if node.fully_linked.load(Ordering::Acquire) && !node.marked.load(Ordering::Acquire) {
          keys.push(key.clone());
        }
        curr = node.tower(0).load(Ordering::SeqCst, guard).with_tag(0);
      }
    }
    keys
  }
}

/// A reference to a key-value pair in a [`SkipMap`], valid for as long as
/// the epoch [`Guard`] it was created under.
pub struct Entry<'g, K, V> {
  key: &'g K,
  value: &'g V,
}

impl<'g, K, V> Entry<'g, K, V> {
  /// Returns a reference to the key.
  #[inline]
  pub fn key(&self) -> &'g K {
    self.key
  }

  /// Returns a reference to the value.
  ///
  /// This is the value that was current when the entry was looked up; a
  /// concurrent upsert may have replaced it since.
  #[inline]
  pub fn value(&self) -> &'g V {
    self.value
  }
}

impl<K, V> Clone for Entry<'_, K, V> {
  #[inline]
  fn clone(&self) -> Self {
    *self
  }
}

impl<K, V> Copy for Entry<'_, K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<'_, K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Entry")
      .field("key", self.key)
      .field("value", self.value)
      .finish()
  }
}
