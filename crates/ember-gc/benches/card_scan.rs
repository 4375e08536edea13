//! Throughput of the dirty-card search and the stripe walk.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ember_gc::{
    Address, CardTable, GenHeap, ObjectRef, PromotionTarget, CARD_SIZE_IN_WORDS,
    NUM_CARDS_IN_STRIPE,
};

struct NullPromotionManager;

impl PromotionTarget for NullPromotionManager {
    fn push_contents(&mut self, obj: ObjectRef) {
        black_box(obj.start());
    }

    fn push_obj_array_contents(&mut self, arr: ObjectRef, left: Address, right: Address) {
        black_box((arr.start(), left, right));
    }

    fn drain_stacks_conditional(&mut self) {}
}

fn bench_find_first_dirty(c: &mut Criterion) {
    let cards = 1 << 20;
    let table = CardTable::new(Address::new(1 << 32), cards << 9);
    // Single dirty card at the end: the search sweeps the whole table.
    table.set_card_dirty(cards - 1);

    c.bench_function("find_first_dirty_1m_cards", |b| {
        b.iter(|| black_box(table.find_first_dirty_card(0, cards)));
    });
}

fn bench_stripe_walk(c: &mut Criterion) {
    let stripes = 8;
    let old_bytes = stripes * NUM_CARDS_IN_STRIPE * CARD_SIZE_IN_WORDS * 8;
    let heap = GenHeap::new(old_bytes, 1 << 20).expect("bench heap");

    // Small objects back to back; every 16th card dirty.
    while heap.old_gen().allocate_ordinary(48, 2).is_some() {}
    let num_cards = heap.card_table().num_cards();

    let space_top = heap.old_gen().space().top();
    c.bench_function("stripe_walk_8_stripes_sparse_dirt", |b| {
        b.iter(|| {
            for card in (0..num_cards).step_by(16) {
                heap.card_table().set_card_dirty(card);
            }
            let mut pm = NullPromotionManager;
            for stripe_index in 0..2 {
                heap.card_table().scavenge_contents_parallel(
                    heap.old_gen().start_array(),
                    heap.old_gen().space(),
                    space_top,
                    &mut pm,
                    stripe_index,
                    2,
                );
            }
        });
    });
}

criterion_group!(benches, bench_find_first_dirty, bench_stripe_walk);
criterion_main!(benches);
