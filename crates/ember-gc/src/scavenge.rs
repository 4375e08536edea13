//! Parallel dirty-card scan of the old generation.
//!
//! At the start of a minor collection the old generation is walked for
//! references into the young generation, guided by the card table instead
//! of object headers. The space is divided into slices, each subdivided
//! into stripes of [`NUM_CARDS_IN_STRIPE`] cards, one stripe per worker:
//!
//! ```text
//!      +===============+        slice 0
//!      |  stripe 0     |
//!      +---------------+
//!      |  stripe 1     |
//!      +---------------+
//!      |  stripe 2     |
//!      +===============+        slice 1
//!      |  stripe 0     |
//!      +---------------+
//!      |  stripe 1     |
//!      +---------------+
//!      |  stripe 2     |
//!      +===============+        slice 2
//!      ...
//! ```
//!
//! With three workers, worker `t` scans stripe `t` of every slice,
//! stepping by one slice at a time until it passes the space's top. The
//! passed-in top bounds the walk: everything above it is promotion scratch
//! space that cannot be parsed yet.
//!
//! Objects starting in a stripe are scanned completely and exclusively by
//! the stripe owner, even when they extend beyond the stripe's end. Large
//! object arrays are the exception: every worker scans just the element
//! words lying on its own stripe, so one huge array does not serialise the
//! pass.

use std::sync::Barrier;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use crate::addr::Address;
use crate::card::{card_is_clean, is_card_aligned, CardTable, CARD_BYTE_SIZE, CARD_SIZE_IN_WORDS};
use crate::metrics::{record_scavenge, ScavengeMetrics};
use crate::object::ObjectRef;
use crate::promote::{ClaimBitmap, PromotionManager, PromotionStats, PromotionTarget};
use crate::space::{GenHeap, MutableSpace};
use crate::start_array::ObjectStartArray;
use crate::tracing::internal as trace;

/// Cards per stripe.
pub const NUM_CARDS_IN_STRIPE: usize = 128;

/// Words per stripe.
pub const STRIPE_SIZE_IN_WORDS: usize = NUM_CARDS_IN_STRIPE * CARD_SIZE_IN_WORDS;

/// Object arrays at or above this size are scanned element-wise, stripe by
/// stripe, instead of whole-object by one owner.
pub const LARGE_OBJ_ARRAY_MIN_WORDS: usize = 2 * STRIPE_SIZE_IN_WORDS;

/// How far ahead of the object being pushed to prefetch, in bytes.
const PREFETCH_SCAN_INTERVAL_BYTES: usize = 512;

/// Returns `true` for object arrays big enough to be scanned element-wise
/// across stripes.
#[inline]
#[must_use]
pub fn is_large_obj_array(obj: ObjectRef) -> bool {
    obj.is_obj_array() && obj.size_in_words() >= LARGE_OBJ_ARRAY_MIN_WORDS
}

#[inline]
fn prefetch_write(addr: Address) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetch is advisory and accepts any address.
    unsafe {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        _mm_prefetch::<_MM_HINT_T0>(
            addr.offset_bytes(PREFETCH_SCAN_INTERVAL_BYTES).as_ptr().cast(),
        );
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = addr;
}

/// One-entry cache over [`ObjectStartArray::object_start`].
///
/// Stripes dense with small objects would otherwise pay a start-array
/// query per stripe front; queries within one walk are monotonically
/// non-decreasing, so remembering the last object is enough.
struct StartCache {
    obj_start: Address,
    obj_end: Address,
    #[cfg(debug_assertions)]
    prev_query: Address,
}

impl StartCache {
    const fn new() -> Self {
        Self {
            obj_start: Address::null(),
            obj_end: Address::null(),
            #[cfg(debug_assertions)]
            prev_query: Address::null(),
        }
    }

    fn object_start(&mut self, addr: Address, start_array: &ObjectStartArray) -> Address {
        #[cfg(debug_assertions)]
        {
            debug_assert!(
                self.prev_query.is_null() || self.prev_query <= addr,
                "start-cache queries must not go backwards"
            );
            self.prev_query = addr;
        }
        if addr >= self.obj_end {
            self.obj_start = start_array.object_start(addr);
            // SAFETY: the start array indexes a parseable space.
            let obj = unsafe { ObjectRef::from_start(self.obj_start) };
            self.obj_end = obj.end();
        }
        self.obj_start
    }
}

/// Pushes every object starting in `[start, end)` to the promotion side.
///
/// `start` must be the beginning of an object; `end` may fall mid-object,
/// in which case the final object is still pushed whole. Large object
/// arrays must never reach this path.
pub fn scan_objects_in_range<P: PromotionTarget>(pm: &mut P, start: Address, end: Address) {
    let mut obj_addr = start;
    while obj_addr < end {
        // SAFETY: `obj_addr` is an object start in a parseable space.
        let obj = unsafe { ObjectRef::from_start(obj_addr) };
        debug_assert!(
            !is_large_obj_array(obj),
            "large object array reached the object-wise scan"
        );
        prefetch_write(obj_addr);
        pm.push_contents(obj);
        obj_addr = obj.end();
    }
    pm.drain_stacks_conditional();
}

impl CardTable {
    /// Scans the stripes owned by `stripe_index` out of `n_stripes` over
    /// the old generation's used region, forwarding young-pointing work to
    /// `pm` and clearing every dirty card it consumes.
    ///
    /// `space_top` bounds the walk; the region above it holds unparseable
    /// promotion scratch space. Workers with distinct stripe indices touch
    /// disjoint card ranges and may run concurrently.
    #[allow(clippy::too_many_lines)]
    pub fn scavenge_contents_parallel<P: PromotionTarget>(
        &self,
        start_array: &ObjectStartArray,
        space: &MutableSpace,
        space_top: Address,
        pm: &mut P,
        stripe_index: usize,
        n_stripes: usize,
    ) {
        debug_assert!(stripe_index < n_stripes);
        debug_assert!(space.bottom() <= space_top && space_top <= space.end());

        let slice_size_in_words = STRIPE_SIZE_IN_WORDS * n_stripes;

        // Cache object-start information across stripes: consecutive empty
        // stripes covered by one huge object would otherwise requery it.
        let mut start_cache = StartCache::new();

        let mut cur_stripe_addr = space.bottom().offset_words(stripe_index * STRIPE_SIZE_IN_WORDS);
        while cur_stripe_addr < space_top {
            let next_stripe_addr = cur_stripe_addr.offset_words(slice_size_in_words);
            let stripe_limit = cur_stripe_addr.offset_words(STRIPE_SIZE_IN_WORDS);
            let cur_stripe_end = if stripe_limit < space_top {
                stripe_limit
            } else {
                space_top
            };

            if !start_array.object_starts_in_range(cur_stripe_addr, cur_stripe_end) {
                // No object starts here, so a single earlier object covers
                // the whole stripe. Only a large object array leaves work
                // for this stripe's owner: its on-stripe elements.
                let covering = start_cache.object_start(cur_stripe_addr, start_array);
                // SAFETY: start-array results are live object starts.
                let covering = unsafe { ObjectRef::from_start(covering) };
                if is_large_obj_array(covering) {
                    self.scavenge_large_array_contents(
                        covering,
                        pm,
                        cur_stripe_addr,
                        cur_stripe_end,
                        space_top,
                        false,
                    );
                }
                cur_stripe_addr = next_stripe_addr;
                continue;
            }

            // Process objects starting in this stripe under four limits:
            // cards checked for dirt in [iter_limit_l, iter_limit_r),
            // cards cleared in [clear_limit_l, clear_limit_r), objects
            // scanned from first_obj_addr, large-array elements handled
            // separately at the end.

            // Left ends, and the first object starting inside the stripe.
            let mut first_obj_addr = start_array.object_start(cur_stripe_addr);
            let iter_limit_l;
            let clear_limit_l;
            if first_obj_addr < cur_stripe_addr {
                // SAFETY: live object start from the start array.
                let first_obj = unsafe { ObjectRef::from_start(first_obj_addr) };
                // The object belongs to the previous stripe's owner, unless
                // it is a large array whose on-stripe elements are ours.
                if is_large_obj_array(first_obj) {
                    self.scavenge_large_array_contents(
                        first_obj,
                        pm,
                        cur_stripe_addr,
                        cur_stripe_end,
                        space_top,
                        false,
                    );
                }
                // Continue with the first object that actually starts here.
                // Its card may be shared with the previous object's tail,
                // which the previous stripe's owner may still scan: iterate
                // over that card but never clear it from this stripe.
                first_obj_addr = first_obj.end();
                clear_limit_l = self.index_for(first_obj_addr.sub_words(1)) + 1;
                iter_limit_l = self.index_for(first_obj_addr);
            } else {
                debug_assert!(first_obj_addr == cur_stripe_addr, "start array out of sync");
                iter_limit_l = self.index_for(cur_stripe_addr);
                clear_limit_l = iter_limit_l;
            }

            debug_assert!(cur_stripe_addr <= first_obj_addr, "inside this stripe");
            debug_assert!(first_obj_addr <= cur_stripe_end, "can be empty");

            // Right ends, and whether a large array starts in the stripe.
            let mut large_arr: Option<ObjectRef> = None;
            let mut large_arr_cleared_first_card = false;
            let iter_limit_r;
            let clear_limit_r;
            {
                let obj_addr = start_array.object_start(cur_stripe_end.sub_words(1));
                // SAFETY: live object start from the start array.
                let obj = unsafe { ObjectRef::from_start(obj_addr) };
                if is_large_obj_array(obj) {
                    if obj_addr < cur_stripe_addr {
                        // Scanned by the left-end handling already.
                        debug_assert!(
                            obj_addr == start_array.object_start(cur_stripe_addr),
                            "distinct covering objects at both stripe ends"
                        );
                        cur_stripe_addr = next_stripe_addr;
                        continue;
                    }
                    // Object-wise scanning stops before the array; its
                    // elements are handled after the dirty-chunk loop. If
                    // the array's first card is shared with a preceding
                    // object, that card is consumed (and cleared) as part
                    // of the preceding run, and the element scan must know.
                    large_arr = Some(obj);
                    large_arr_cleared_first_card = !is_card_aligned(obj_addr)
                        && !card_is_clean(self.get(self.index_for(obj_addr)));
                    let limit = self.index_for(obj_addr.sub_words(1)) + 1;
                    clear_limit_r = limit;
                    iter_limit_r = limit;
                } else {
                    debug_assert!(obj.end() >= cur_stripe_end, "object must reach stripe end");
                    clear_limit_r = self.index_for(obj.end());
                    iter_limit_r = self.index_for(obj.end().sub_words(1)) + 1;
                }
            }

            debug_assert!(
                iter_limit_l <= clear_limit_l && clear_limit_r <= iter_limit_r,
                "clear cards only if we iterate over them"
            );

            // Consume dirty chunks [dirty_l, dirty_r) one at a time.
            let mut cur_card = iter_limit_l;
            while cur_card < iter_limit_r {
                let dirty_l = self.find_first_dirty_card(cur_card, iter_limit_r);
                let dirty_r =
                    self.find_first_clean_card_object_aware(start_array, dirty_l, iter_limit_r);
                debug_assert!(dirty_l <= dirty_r);

                if dirty_l == dirty_r {
                    debug_assert!(dirty_r == iter_limit_r, "no more dirty cards in this stripe");
                    break;
                }

                debug_assert!(!card_is_clean(self.get(dirty_l)));
                debug_assert!(
                    dirty_r == self.num_cards()
                        || card_is_clean(self.get(dirty_r))
                        || dirty_r >= clear_limit_r,
                    "chunk must end on a clean card or past this stripe's clears"
                );

                self.clear_cards(
                    dirty_l.max(clear_limit_l),
                    dirty_r.min(clear_limit_r),
                );

                let obj_l = start_array
                    .object_start(self.addr_for(dirty_l))
                    .max(first_obj_addr);
                let obj_r = self
                    .addr_for(dirty_r)
                    .min(large_arr.map_or(cur_stripe_end, ObjectRef::start));
                scan_objects_in_range(pm, obj_l, obj_r);

                cur_card = dirty_r + 1;
            }

            if let Some(arr) = large_arr {
                self.scavenge_large_array_contents(
                    arr,
                    pm,
                    cur_stripe_addr,
                    cur_stripe_end,
                    space_top,
                    large_arr_cleared_first_card,
                );
            }

            cur_stripe_addr = next_stripe_addr;
        }
    }

    /// Scans the elements of a large object array that lie on dirty cards
    /// within `[stripe_addr, stripe_end)`, clearing those cards.
    ///
    /// Limits are stripe-relative so that sibling workers never touch the
    /// same card. `first_card_already_cleared` reports that the array's
    /// first card was shared with a preceding object and consumed by that
    /// object's run; the sub-card prefix of elements is then pushed
    /// directly.
    pub fn scavenge_large_array_contents<P: PromotionTarget>(
        &self,
        arr: ObjectRef,
        pm: &mut P,
        stripe_addr: Address,
        stripe_end: Address,
        space_top: Address,
        first_card_already_cleared: bool,
    ) {
        debug_assert!(is_large_obj_array(arr));
        debug_assert!(is_card_aligned(stripe_addr), "stripe front off a card");
        debug_assert!(
            is_card_aligned(stripe_end) || stripe_end == space_top,
            "stripe end off a card"
        );

        let arr_addr = arr.start();
        let arr_end = arr.end();

        let mut iter_limit_l = self.index_for(stripe_addr);
        let mut iter_limit_r = self.index_for(stripe_end.sub_words(1)) + 1;
        let mut clear_limit_l = iter_limit_l;
        let mut clear_limit_r = self.index_for(stripe_end);

        // Tighten the left ends if the array starts inside this stripe.
        if stripe_addr <= arr_addr {
            if first_card_already_cleared {
                debug_assert!(
                    !is_card_aligned(arr_addr),
                    "an exclusive first card is never pre-cleared"
                );
                let limit = self.index_for(arr_addr) + 1;
                clear_limit_l = limit;
                iter_limit_l = limit;
                // The shared first card was dirty: its elements up to the
                // next card boundary still need forwarding.
                pm.push_obj_array_contents(arr, arr_addr, arr_addr.align_up(CARD_BYTE_SIZE));
            } else {
                iter_limit_l = self.index_for(arr_addr);
                clear_limit_l = self.index_for(arr_addr.sub_words(1)) + 1;
            }
        }

        // Tighten the right ends if the array ends inside this stripe.
        if arr_end <= stripe_end {
            clear_limit_r = self.index_for(arr_end);
            iter_limit_r = self.index_for(arr_end.sub_words(1)) + 1;
        }

        // Consume dirty chunks. Element granularity is word-level, so the
        // plain clean-card search suffices here.
        let mut cur_card = iter_limit_l;
        while cur_card < iter_limit_r {
            let dirty_l = self.find_first_dirty_card(cur_card, iter_limit_r);
            let dirty_r = self.find_first_clean_card(dirty_l, iter_limit_r);
            debug_assert!(dirty_l <= dirty_r);

            if dirty_l == dirty_r {
                debug_assert!(dirty_r == iter_limit_r, "no more dirty cards in this stripe");
                break;
            }

            self.clear_cards(
                dirty_l.max(clear_limit_l),
                dirty_r.min(clear_limit_r),
            );
            pm.push_obj_array_contents(arr, self.addr_for(dirty_l), self.addr_for(dirty_r));

            cur_card = dirty_r + 1;
        }
    }
}

/// What a full scan pass produced.
pub struct ScavengeOutcome {
    /// Aggregated counters for the pass.
    pub metrics: ScavengeMetrics,
    /// Every young referent claimed from old-generation cards, across all
    /// workers, ready for the evacuation machinery.
    pub young_referents: Vec<Address>,
}

/// Runs the card scan over all stripes with `n_workers` threads inside the
/// current stop-the-world pause.
///
/// Workers synchronise only at entry and exit barriers; in between each
/// owns its disjoint stripes.
///
/// # Panics
///
/// Panics if `n_workers` is zero.
#[must_use]
pub fn parallel_scavenge(heap: &GenHeap, n_workers: usize) -> ScavengeOutcome {
    assert!(n_workers > 0, "scan needs at least one worker");

    let scavenge_id = trace::next_scavenge_id();
    trace::log_scavenge_start(scavenge_id, n_workers);
    let started = Instant::now();

    let claimed = ClaimBitmap::for_young_gen(heap.young_gen());
    let space_top = heap.old_gen().space().top();
    let barrier = Barrier::new(n_workers);
    let results: Mutex<Vec<(Vec<Address>, PromotionStats)>> =
        Mutex::new(Vec::with_capacity(n_workers));

    thread::scope(|s| {
        for stripe_index in 0..n_workers {
            let claimed = &claimed;
            let barrier = &barrier;
            let results = &results;
            s.spawn(move || {
                let mut pm = PromotionManager::new(heap.young_gen(), claimed);
                barrier.wait();
                heap.card_table().scavenge_contents_parallel(
                    heap.old_gen().start_array(),
                    heap.old_gen().space(),
                    space_top,
                    &mut pm,
                    stripe_index,
                    n_workers,
                );
                barrier.wait();
                results.lock().push(pm.into_parts());
            });
        }
    });

    let mut metrics = ScavengeMetrics {
        duration: started.elapsed(),
        workers: n_workers,
        ..ScavengeMetrics::new()
    };
    let mut young_referents = Vec::new();
    for (drained, stats) in results.into_inner() {
        young_referents.extend(drained);
        metrics.objects_pushed += stats.objects_pushed;
        metrics.array_ranges_pushed += stats.ranges_pushed;
        metrics.young_refs_claimed += stats.young_claimed;
        metrics.queue_drains += stats.drains;
    }
    debug_assert_eq!(metrics.young_refs_claimed, claimed.claimed_count());

    record_scavenge(metrics);
    trace::log_scavenge_end(scavenge_id, metrics.objects_pushed, metrics.young_refs_claimed);

    ScavengeOutcome {
        metrics,
        young_referents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{encode_header, ObjectKind};

    #[test]
    fn large_array_threshold() {
        let header_small = encode_header(LARGE_OBJ_ARRAY_MIN_WORDS - 1, ObjectKind::ObjArray, 0);
        let header_large = encode_header(LARGE_OBJ_ARRAY_MIN_WORDS, ObjectKind::ObjArray, 0);
        let header_plain = encode_header(LARGE_OBJ_ARRAY_MIN_WORDS * 4, ObjectKind::Ordinary, 0);

        let small = [header_small];
        let large = [header_large];
        let plain = [header_plain];
        unsafe {
            assert!(!is_large_obj_array(ObjectRef::from_start(Address::from_ptr(
                small.as_ptr().cast()
            ))));
            assert!(is_large_obj_array(ObjectRef::from_start(Address::from_ptr(
                large.as_ptr().cast()
            ))));
            // Size alone never makes a plain object "large".
            assert!(!is_large_obj_array(ObjectRef::from_start(Address::from_ptr(
                plain.as_ptr().cast()
            ))));
        }
    }

    #[test]
    fn start_cache_refreshes_past_object_end() {
        use crate::space::OldGen;

        let old = OldGen::new(1 << 20).unwrap();
        let a = old.allocate_ordinary(100, 0).unwrap();
        let b = old.allocate_ordinary(50, 0).unwrap();

        let mut cache = StartCache::new();
        let sa = old.start_array();
        assert_eq!(cache.object_start(a.start(), sa), a.start());
        assert_eq!(cache.object_start(a.start().offset_words(99), sa), a.start());
        assert_eq!(cache.object_start(b.start().offset_words(3), sa), b.start());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "must not go backwards")]
    fn start_cache_rejects_backward_queries() {
        use crate::space::OldGen;

        let old = OldGen::new(1 << 20).unwrap();
        let a = old.allocate_ordinary(100, 0).unwrap();

        let mut cache = StartCache::new();
        let sa = old.start_array();
        let _ = cache.object_start(a.start().offset_words(10), sa);
        let _ = cache.object_start(a.start(), sa);
    }

    #[test]
    fn stripe_constants_line_up() {
        assert_eq!(STRIPE_SIZE_IN_WORDS % CARD_SIZE_IN_WORDS, 0);
        assert!(LARGE_OBJ_ARRAY_MIN_WORDS >= STRIPE_SIZE_IN_WORDS);
    }
}
