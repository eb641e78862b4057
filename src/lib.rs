//! StripeSet: a concurrent hash set backed by a contiguous arena of link nodes,
//! protected by lock striping.
//!
//! All element nodes live in one densely packed array addressed by 32-bit
//! indices. Buckets are chains threaded through that arena, mutation is
//! serialized per stripe, freed nodes are recycled through per-stripe
//! freelists, and growth is a stop-the-world rehash coordinated by a signal
//! flag. Membership queries and traversal run without locks and are only
//! defined while no mutation is in flight.

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::thread;

use ahash::RandomState;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

// ================================================================================================
// CONSTANTS
// ================================================================================================

/// Number of lock stripes. Also the number of freelist heads embedded at the
/// front of the arena, so element nodes start at this index.
const STRIPE_COUNT: usize = 1024;

/// Mask for mapping a bucket index to its stripe.
const STRIPE_MASK: usize = STRIPE_COUNT - 1;

/// Arena index 0 never holds an element; it doubles as the end-of-chain and
/// empty-bucket marker.
const NIL: u32 = 0;

/// Normalized hashes keep the low 31 bits. Hash 0 marks a freed node, so a
/// user hash that normalizes to 0 is replaced by this sentinel.
const HASH_SENTINEL: u32 = 0x7FFF_FFFF;

/// Pure CPU hints before any yield.
const SPIN_BEFORE_YIELD: i32 = 128;

/// Bucket counts walk this progression, roughly doubling per step. Each entry
/// is prime so `hash % len` spreads arbitrary integer hashes.
const BUCKET_PRIMES: [usize; 22] = [
    1367,
    2741,
    5471,
    10_937,
    19_841,
    40_241,
    84_463,
    174_767,
    349_529,
    699_053,
    1_398_107,
    2_796_221,
    5_592_407,
    11_184_829,
    22_369_661,
    44_739_259,
    89_478_503,
    178_956_983,
    357_913_951,
    715_827_947,
    1_431_655_777,
    2_147_483_629,
];

// ================================================================================================
// INTERNAL DATA STRUCTURES
// ================================================================================================

/// One arena entry: a chain link plus the element payload.
///
/// `hash == 0` means the payload slot is uninitialized (freshly allocated
/// storage, a freelist head, or a freed node waiting on a freelist).
struct Node<E> {
    hash: u32,
    next: u32,
    data: MaybeUninit<E>,
}

// ================================================================================================
// ERRORS
// ================================================================================================

/// Error returned by [`StripeSet::insert`] when the bucket progression is
/// exhausted and the set can no longer grow.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("bucket prime progression exhausted; the set is at maximum capacity")]
pub struct OutOfCapacity;

// ================================================================================================
// MAIN SET STRUCTURE
// ================================================================================================

/// Concurrent hash set with striped locking and arena-allocated chain nodes.
///
/// `insert` and `remove` may be called freely from many threads. `contains`,
/// [`iter`](StripeSet::iter) and `clear` are read/reset paths that the caller
/// must not run concurrently with mutation; `contains_locked` is the variant
/// that is safe under concurrent mutation.
pub struct StripeSet<E, S: BuildHasher = RandomState> {
    /// Bucket table: one chain-head arena index per bucket.
    slots: AtomicPtr<u32>,
    slots_len: AtomicUsize,
    /// Node arena. Indices `0..STRIPE_COUNT` are the freelist heads.
    arena: AtomicPtr<Node<E>>,
    arena_cap: AtomicUsize,
    /// Position in `BUCKET_PRIMES`; only advances.
    prime_index: AtomicUsize,
    /// Bump allocation frontier. Starts at `STRIPE_COUNT`.
    node_ptr: AtomicU32,
    /// Total length of all stripe freelists.
    free_nodes: AtomicU32,
    /// Set while a resize is pending or running; mutators back off and retry.
    signal_resize: AtomicBool,
    resize_lock: Mutex<()>,
    stripes: Box<[CachePadded<Mutex<()>>]>,
    hasher: S,
}

// SAFETY: the arena and slot table are only written under the owning stripe
// lock, or under every stripe lock during a resize. Elements are moved in and
// dropped by whichever thread holds the lock, so crossing threads requires
// E: Send; `contains`/`iter` hand out &E, so sharing requires E: Sync.
unsafe impl<E: Send, S: BuildHasher + Send> Send for StripeSet<E, S> {}
unsafe impl<E: Send + Sync, S: BuildHasher + Sync> Sync for StripeSet<E, S> {}

// ================================================================================================
// CONSTRUCTORS
// ================================================================================================

impl<E: Eq + Hash> StripeSet<E, RandomState> {
    /// Create an empty set at the smallest bucket count of the progression.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<E: Eq + Hash, S: BuildHasher> StripeSet<E, S> {
    /// Create an empty set using the provided hasher.
    ///
    /// The hasher cannot be changed afterwards because it determines bucket
    /// placement of every stored element.
    pub fn with_hasher(hasher: S) -> Self {
        let len = BUCKET_PRIMES[0];
        let cap = len + STRIPE_COUNT;
        let slots: *mut u32 = alloc_zeroed_array(len);
        // Zeroed nodes give every freelist head `next == NIL`.
        let arena: *mut Node<E> = alloc_zeroed_array(cap);
        let stripes = (0..STRIPE_COUNT)
            .map(|_| CachePadded::new(Mutex::new(())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots: AtomicPtr::new(slots),
            slots_len: AtomicUsize::new(len),
            arena: AtomicPtr::new(arena),
            arena_cap: AtomicUsize::new(cap),
            prime_index: AtomicUsize::new(0),
            node_ptr: AtomicU32::new(STRIPE_COUNT as u32),
            free_nodes: AtomicU32::new(0),
            signal_resize: AtomicBool::new(false),
            resize_lock: Mutex::new(()),
            stripes,
            hasher,
        }
    }

    // ============================================================================================
    // PUBLIC API METHODS
    // ============================================================================================

    /// Insert a value. Returns `Ok(true)` if it was inserted, `Ok(false)` if
    /// an equal value was already present.
    ///
    /// Concurrency-safe. Fails only with [`OutOfCapacity`] once the bucket
    /// progression is exhausted.
    pub fn insert(&self, value: E) -> Result<bool, OutOfCapacity> {
        let hash = self.hash_of(&value);
        if self.grow_needed() {
            self.grow()?;
        }

        let mut spins = 0;
        loop {
            while self.signal_resize.load(Ordering::Acquire) {
                delay(&mut spins);
            }
            let len = self.slots_len.load(Ordering::Acquire);
            let stripe = stripe_of(hash, len);
            let guard = self.stripes[stripe].lock();

            // A resize may have started, or completed, between our sample of
            // the table length and the lock acquisition. Start over if so.
            if self.signal_resize.load(Ordering::Acquire)
                || self.slots_len.load(Ordering::Acquire) != len
            {
                drop(guard);
                continue;
            }

            let slots = self.slots.load(Ordering::Relaxed);
            let arena = self.arena.load(Ordering::Relaxed);
            let bucket = (hash as usize) % len;
            unsafe {
                let head = *slots.add(bucket);
                let mut i = head;
                while i != NIL {
                    let node = &*arena.add(i as usize);
                    if node.hash == hash && node.data.assume_init_ref() == &value {
                        return Ok(false);
                    }
                    i = node.next;
                }

                let index = match self.allocate(arena, stripe) {
                    Some(index) => index,
                    None => {
                        // Bump frontier hit the end of the arena. Run the
                        // resize barrier to extend it, then retry.
                        drop(guard);
                        self.grow()?;
                        continue;
                    }
                };
                let node = &mut *arena.add(index as usize);
                node.hash = hash;
                node.next = head;
                node.data.write(value);
                *slots.add(bucket) = index;
            }
            return Ok(true);
        }
    }

    /// Remove a value. Returns `true` if it was present.
    ///
    /// Concurrency-safe. The freed node goes onto the freelist of the stripe
    /// the value currently hashes to.
    pub fn remove(&self, value: &E) -> bool {
        let hash = self.hash_of(value);
        let mut spins = 0;
        loop {
            while self.signal_resize.load(Ordering::Acquire) {
                delay(&mut spins);
            }
            let len = self.slots_len.load(Ordering::Acquire);
            let stripe = stripe_of(hash, len);
            let guard = self.stripes[stripe].lock();

            if self.signal_resize.load(Ordering::Acquire)
                || self.slots_len.load(Ordering::Acquire) != len
            {
                drop(guard);
                continue;
            }

            let slots = self.slots.load(Ordering::Relaxed);
            let arena = self.arena.load(Ordering::Relaxed);
            let bucket = (hash as usize) % len;
            unsafe {
                let mut prev = NIL;
                let mut i = *slots.add(bucket);
                while i != NIL {
                    let node = &*arena.add(i as usize);
                    let next = node.next;
                    if node.hash == hash && node.data.assume_init_ref() == value {
                        if prev == NIL {
                            *slots.add(bucket) = next;
                        } else {
                            (*arena.add(prev as usize)).next = next;
                        }
                        self.free(arena, i, stripe);
                        return true;
                    }
                    prev = i;
                    i = next;
                }
            }
            return false;
        }
    }

    /// Check whether an equal value is present, without taking any lock.
    ///
    /// Only defined when no concurrent mutation is in flight. This is the
    /// performance-critical read path; callers that cannot guarantee
    /// quiescence must use [`contains_locked`](StripeSet::contains_locked).
    pub fn contains(&self, value: &E) -> bool {
        debug_assert!(
            !self.signal_resize.load(Ordering::Acquire),
            "StripeSet::contains while a resize is in flight"
        );
        let hash = self.hash_of(value);
        let len = self.slots_len.load(Ordering::Acquire);
        unsafe { self.find_in_chain(hash, len, value) }
    }

    /// Check whether an equal value is present, under the stripe lock.
    ///
    /// Safe to call concurrently with `insert` and `remove`, at the cost of
    /// lock traffic on the read path.
    pub fn contains_locked(&self, value: &E) -> bool {
        let hash = self.hash_of(value);
        let mut spins = 0;
        loop {
            while self.signal_resize.load(Ordering::Acquire) {
                delay(&mut spins);
            }
            let len = self.slots_len.load(Ordering::Acquire);
            let guard = self.stripes[stripe_of(hash, len)].lock();

            if self.signal_resize.load(Ordering::Acquire)
                || self.slots_len.load(Ordering::Acquire) != len
            {
                drop(guard);
                continue;
            }
            return unsafe { self.find_in_chain(hash, len, value) };
        }
    }

    /// Number of elements in the set.
    ///
    /// Exact when quiescent, best-effort while mutation is in flight.
    pub fn len(&self) -> usize {
        let allocated = self.node_ptr.load(Ordering::Relaxed) as usize - STRIPE_COUNT;
        allocated.saturating_sub(self.free_nodes.load(Ordering::Relaxed) as usize)
    }

    /// Returns true if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current length of the bucket table. Grows along the prime progression
    /// and never shrinks.
    pub fn bucket_count(&self) -> usize {
        self.slots_len.load(Ordering::Relaxed)
    }

    /// Drop every element while retaining the allocated capacity.
    ///
    /// Exclusive access is required; the `&mut` receiver enforces it.
    pub fn clear(&mut self) {
        let arena = self.arena.load(Ordering::Relaxed);
        let node_ptr = self.node_ptr.load(Ordering::Relaxed) as usize;
        unsafe {
            for i in STRIPE_COUNT..node_ptr {
                let node = &mut *arena.add(i);
                if node.hash != 0 {
                    ptr::drop_in_place(node.data.as_mut_ptr());
                    node.hash = 0;
                }
            }
            for stripe in 0..STRIPE_COUNT {
                (*arena.add(stripe)).next = NIL;
            }
            let slots = self.slots.load(Ordering::Relaxed);
            ptr::write_bytes(slots, 0, self.slots_len.load(Ordering::Relaxed));
        }
        self.node_ptr.store(STRIPE_COUNT as u32, Ordering::Relaxed);
        self.free_nodes.store(0, Ordering::Relaxed);
    }

    /// Iterate over the elements in arena order.
    ///
    /// Lazy and lock-free; only defined while no mutation is in flight. The
    /// order is unrelated to insertion order.
    pub fn iter(&self) -> Iter<'_, E> {
        debug_assert!(
            !self.signal_resize.load(Ordering::Acquire),
            "StripeSet::iter while a resize is in flight"
        );
        Iter {
            arena: self.arena.load(Ordering::Acquire),
            index: STRIPE_COUNT,
            end: self.node_ptr.load(Ordering::Acquire) as usize,
            _marker: PhantomData,
        }
    }

    // ============================================================================================
    // PRIVATE HELPER METHODS
    // ============================================================================================

    #[inline(always)]
    fn hash_of(&self, value: &E) -> u32 {
        normalize_hash(self.hasher.hash_one(value))
    }

    /// Walk the chain for `hash` and compare payloads.
    ///
    /// Caller must hold the stripe lock for `hash`, or guarantee that no
    /// mutation is in flight.
    #[inline(always)]
    unsafe fn find_in_chain(&self, hash: u32, len: usize, value: &E) -> bool {
        let slots = self.slots.load(Ordering::Relaxed);
        let arena = self.arena.load(Ordering::Relaxed);
        let mut i = *slots.add((hash as usize) % len);
        while i != NIL {
            let node = &*arena.add(i as usize);
            // Integer compare first; the payload compare only runs on hash hits.
            if node.hash == hash && node.data.assume_init_ref() == value {
                return true;
            }
            i = node.next;
        }
        false
    }

    /// Pop a node off the stripe's freelist, or bump the arena frontier.
    /// Returns `None` when the frontier has reached the arena's end.
    ///
    /// Caller must hold the stripe lock; the bump path tolerates concurrent
    /// bumps from other stripes.
    unsafe fn allocate(&self, arena: *mut Node<E>, stripe: usize) -> Option<u32> {
        let head = &mut *arena.add(stripe);
        let first = head.next;
        if first != NIL {
            head.next = (*arena.add(first as usize)).next;
            self.free_nodes.fetch_sub(1, Ordering::Relaxed);
            return Some(first);
        }
        let cap = self.arena_cap.load(Ordering::Relaxed) as u32;
        self.node_ptr
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
                (p < cap).then_some(p + 1)
            })
            .ok()
    }

    /// Drop the payload and push the node onto the stripe's freelist.
    /// Caller must hold the stripe lock.
    unsafe fn free(&self, arena: *mut Node<E>, index: u32, stripe: usize) {
        let node = &mut *arena.add(index as usize);
        ptr::drop_in_place(node.data.as_mut_ptr());
        node.hash = 0;
        let head = &mut *arena.add(stripe);
        node.next = head.next;
        head.next = index;
        self.free_nodes.fetch_add(1, Ordering::Relaxed);
    }

    /// Grow predicate: load factor above 0.7, or the bump frontier at the
    /// arena's end. The latter can happen below the load threshold because
    /// freed nodes are only reusable by the stripe that freed them.
    #[inline(always)]
    fn grow_needed(&self) -> bool {
        let len = self.slots_len.load(Ordering::Relaxed);
        if 10 * self.len() > 7 * len {
            return true;
        }
        (self.node_ptr.load(Ordering::Relaxed) as usize) >= self.arena_cap.load(Ordering::Relaxed)
    }

    /// The resize barrier. Publishes the signal flag, wins or yields the
    /// coordinator role, then rehashes under every stripe lock.
    fn grow(&self) -> Result<(), OutOfCapacity> {
        self.signal_resize.store(true, Ordering::Release);
        let _coordinator = self.resize_lock.lock();
        if !self.signal_resize.load(Ordering::Acquire) {
            // Another coordinator finished while we waited.
            return Ok(());
        }

        // Serialize with every in-flight mutator. Ascending order; mutators
        // only ever hold one stripe lock, so this cannot deadlock.
        let mut guards = Vec::with_capacity(STRIPE_COUNT);
        for stripe in self.stripes.iter() {
            guards.push(stripe.lock());
        }

        // Re-evaluate with the world stopped; the trigger may have been
        // absorbed by a coordinator that ran between our sample and the
        // lock sweep.
        let result = if self.grow_needed() {
            self.grow_locked()
        } else {
            log::trace!("resize request already satisfied");
            Ok(())
        };

        self.signal_resize.store(false, Ordering::Release);
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        result
    }

    /// Move to the next prime and rehash. Caller holds the coordinator lock
    /// and all stripe locks.
    fn grow_locked(&self) -> Result<(), OutOfCapacity> {
        let next = self.prime_index.load(Ordering::Relaxed) + 1;
        if next >= BUCKET_PRIMES.len() {
            return Err(OutOfCapacity);
        }
        let old_len = self.slots_len.load(Ordering::Relaxed);
        let new_len = BUCKET_PRIMES[next];
        let node_ptr = self.node_ptr.load(Ordering::Relaxed) as usize;

        let new_slots: *mut u32 = alloc_zeroed_array(new_len);

        // The arena only ever extends, so node indices, chain links and the
        // embedded freelists all survive the move untouched.
        let old_cap = self.arena_cap.load(Ordering::Relaxed);
        let new_cap = new_len + STRIPE_COUNT;
        let old_arena = self.arena.load(Ordering::Relaxed);
        let new_arena: *mut Node<E> = alloc_zeroed_array(new_cap);
        unsafe {
            ptr::copy_nonoverlapping(old_arena, new_arena, node_ptr);
            dealloc_array(old_arena, old_cap);
        }

        // Rehash in place: prepend every live node onto its new chain. Freed
        // nodes keep hash == 0 and stay threaded on their freelist.
        unsafe {
            for i in STRIPE_COUNT..node_ptr {
                let node = &mut *new_arena.add(i);
                if node.hash == 0 {
                    continue;
                }
                let bucket = (node.hash as usize) % new_len;
                node.next = *new_slots.add(bucket);
                *new_slots.add(bucket) = i as u32;
            }
            dealloc_array(self.slots.load(Ordering::Relaxed), old_len);
        }

        self.arena.store(new_arena, Ordering::Release);
        self.arena_cap.store(new_cap, Ordering::Relaxed);
        self.slots.store(new_slots, Ordering::Release);
        self.prime_index.store(next, Ordering::Relaxed);
        self.slots_len.store(new_len, Ordering::Release);

        log::debug!(
            "grew slot table {} -> {} ({} elements live)",
            old_len,
            new_len,
            self.len()
        );
        Ok(())
    }
}

// ================================================================================================
// DROP IMPLEMENTATION
// ================================================================================================

impl<E, S: BuildHasher> Drop for StripeSet<E, S> {
    fn drop(&mut self) {
        let arena = self.arena.load(Ordering::Relaxed);
        let node_ptr = self.node_ptr.load(Ordering::Relaxed) as usize;
        unsafe {
            for i in STRIPE_COUNT..node_ptr {
                let node = &mut *arena.add(i);
                if node.hash != 0 {
                    ptr::drop_in_place(node.data.as_mut_ptr());
                }
            }
            dealloc_array(arena, self.arena_cap.load(Ordering::Relaxed));
            dealloc_array(
                self.slots.load(Ordering::Relaxed),
                self.slots_len.load(Ordering::Relaxed),
            );
        }
    }
}

// ================================================================================================
// STANDARD TRAIT IMPLEMENTATIONS
// ================================================================================================

impl<E: Eq + Hash, S: BuildHasher + Default> Default for StripeSet<E, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<E: Eq + Hash, S: BuildHasher> fmt::Debug for StripeSet<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeSet")
            .field("len", &self.len())
            .field("bucket_count", &self.bucket_count())
            .finish()
    }
}

impl<'a, E: Eq + Hash, S: BuildHasher> IntoIterator for &'a StripeSet<E, S> {
    type Item = &'a E;
    type IntoIter = Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E: Eq + Hash, S: BuildHasher + Default> FromIterator<E> for StripeSet<E, S> {
    fn from_iter<T: IntoIterator<Item = E>>(iter: T) -> Self {
        let set = StripeSet::with_hasher(S::default());
        for value in iter {
            let _ = set.insert(value);
        }
        set
    }
}

impl<E: Eq + Hash, S: BuildHasher> Extend<E> for StripeSet<E, S> {
    fn extend<T: IntoIterator<Item = E>>(&mut self, iter: T) {
        for value in iter {
            let _ = self.insert(value);
        }
    }
}

// ================================================================================================
// UTILITY FUNCTIONS
// ================================================================================================

/// Fold the 64-bit hasher output to a non-zero 31-bit value. Hash 0 is
/// reserved to mark freed arena nodes.
#[inline(always)]
fn normalize_hash(h64: u64) -> u32 {
    let h = ((h64 ^ (h64 >> 32)) as u32) & HASH_SENTINEL;
    if h == 0 {
        HASH_SENTINEL
    } else {
        h
    }
}

/// Stripe selection: bucket index modulo the stripe count. Must be recomputed
/// whenever the slot length may have changed.
#[inline(always)]
fn stripe_of(hash: u32, slots_len: usize) -> usize {
    ((hash as usize) % slots_len) & STRIPE_MASK
}

fn alloc_zeroed_array<T>(len: usize) -> *mut T {
    let layout = std::alloc::Layout::array::<T>(len).unwrap();
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) as *mut T };
    if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
    }
    ptr
}

unsafe fn dealloc_array<T>(ptr: *mut T, len: usize) {
    let layout = std::alloc::Layout::array::<T>(len).unwrap();
    std::alloc::dealloc(ptr as *mut u8, layout);
}

#[inline(always)]
fn try_spin(spins: &mut i32) -> bool {
    if *spins < SPIN_BEFORE_YIELD {
        *spins += *spins + 1;
        std::hint::spin_loop();
        true
    } else {
        false
    }
}

#[inline(always)]
fn delay(spins: &mut i32) {
    if !try_spin(spins) {
        *spins = 0;
        thread::yield_now();
    }
}

// ================================================================================================
// ITERATOR IMPLEMENTATIONS
// ================================================================================================

/// Lazy iterator over a [`StripeSet`], scanning the arena in index order and
/// skipping freed nodes.
pub struct Iter<'a, E> {
    arena: *const Node<E>,
    index: usize,
    end: usize,
    _marker: PhantomData<&'a E>,
}

impl<'a, E> Iterator for Iter<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.end {
            // In-bounds: `end` was the bump frontier when the iterator was
            // created, and the borrow on the set keeps the arena alive.
            let node = unsafe { &*self.arena.add(self.index) };
            self.index += 1;
            if node.hash != 0 {
                return Some(unsafe { node.data.assume_init_ref() });
            }
        }
        None
    }
}
