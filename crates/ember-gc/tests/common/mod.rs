//! Shared scaffolding for the card-scan integration tests.
#![allow(dead_code)]

use ember_gc::{
    Address, GenHeap, ObjectRef, PromotionTarget, CARD_SIZE_IN_WORDS, NUM_CARDS_IN_STRIPE,
};

/// Words per stripe, restated for test layouts.
pub const STRIPE_WORDS: usize = NUM_CARDS_IN_STRIPE * CARD_SIZE_IN_WORDS;

/// A promotion target that records exactly what the walker hands it.
#[derive(Default)]
pub struct RecordingPromotionManager {
    /// Start addresses of whole objects pushed, in push order.
    pub objects: Vec<Address>,
    /// Large-array element ranges pushed: (array start, left, right).
    pub ranges: Vec<(Address, Address, Address)>,
    /// Conditional drain hints received.
    pub drain_hints: usize,
}

impl RecordingPromotionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PromotionTarget for RecordingPromotionManager {
    fn push_contents(&mut self, obj: ObjectRef) {
        self.objects.push(obj.start());
    }

    fn push_obj_array_contents(&mut self, arr: ObjectRef, left: Address, right: Address) {
        self.ranges.push((arr.start(), left, right));
    }

    fn drain_stacks_conditional(&mut self) {
        self.drain_hints += 1;
    }
}

/// A heap whose old generation holds `stripes` stripes of address space.
pub fn heap_with_stripes(stripes: usize) -> GenHeap {
    let old_bytes = stripes * STRIPE_WORDS * ember_gc::HEAP_WORD_SIZE;
    GenHeap::new(old_bytes, 1 << 20).expect("reserving test heap")
}

/// Allocates filler (no reference slots) up to the given word offset from
/// the old generation's bottom. Panics if allocation already passed it.
pub fn pad_old_to(heap: &GenHeap, word_offset: usize) {
    let old = heap.old_gen();
    let bottom = old.space().bottom();
    let used = old.space().top().word_offset_from(bottom);
    assert!(
        used <= word_offset,
        "old gen already filled past word {word_offset}"
    );
    if used < word_offset {
        old.allocate_ordinary(word_offset - used, 0)
            .expect("padding allocation");
    }
}

/// Allocates filler up to the start of the given card.
pub fn pad_old_to_card(heap: &GenHeap, card: usize) {
    pad_old_to(heap, card * CARD_SIZE_IN_WORDS);
}

/// Runs the stripe walker for every stripe index with its own recorder,
/// sequentially. Stripes are disjoint, so this is equivalent to the
/// parallel pass but keeps per-worker observations.
pub fn run_all_stripes(heap: &GenHeap, n_stripes: usize) -> Vec<RecordingPromotionManager> {
    let space_top = heap.old_gen().space().top();
    (0..n_stripes)
        .map(|stripe_index| {
            let mut pm = RecordingPromotionManager::new();
            heap.card_table().scavenge_contents_parallel(
                heap.old_gen().start_array(),
                heap.old_gen().space(),
                space_top,
                &mut pm,
                stripe_index,
                n_stripes,
            );
            pm
        })
        .collect()
}

/// Indices of every non-clean card under the used region.
pub fn non_clean_cards(heap: &GenHeap) -> Vec<usize> {
    let ct = heap.card_table();
    let (bottom, top) = heap.old_gen().space().used_region();
    if bottom >= top {
        return Vec::new();
    }
    let last = ct.index_for(top.sub_words(1));
    (0..=last)
        .filter(|&card| !ember_gc::card::card_is_clean(ct.get(card)))
        .collect()
}

/// Dirties a contiguous card range `[from, to)`.
pub fn dirty_cards(heap: &GenHeap, from: usize, to: usize) {
    for card in from..to {
        heap.card_table().set_card_dirty(card);
    }
}
