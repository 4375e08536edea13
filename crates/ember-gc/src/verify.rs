//! Card-table verification against the live heap.
//!
//! Two passes bracket a minor collection. Before the scan, the imprecise
//! pass checks that every old object holding a young-pointing reference
//! has at least its head card marked; the write barrier is allowed to mark
//! only the object head even when the store landed deeper inside. After
//! the scan, the precise pass checks every young-pointing slot against its
//! own card and settles the table: visited cards pass through the
//! transient `verify` state and come out as `youngergen`, and anything
//! else must be clean.
//!
//! Any mismatch is a fatal invariant violation: the card table no longer
//! describes the heap, and continuing would lose references.

use crate::addr::Address;
use crate::card::{
    card_is_clean, card_is_verify, CardTable, VERIFY_CARD, YOUNGERGEN_CARD,
};
use crate::space::GenHeap;
use crate::tracing::internal as trace;

/// Checks imprecise marks for every old-generation object.
///
/// Call immediately before a scan, while mutators are stopped.
///
/// # Panics
///
/// Panics if an object holds a young-pointing reference on an unmarked
/// card and the object's head card is unmarked too.
pub fn verify_all_young_refs_imprecise(heap: &GenHeap) {
    trace::log_verify_pass("imprecise");
    let young = heap.young_gen();
    let ct = heap.card_table();

    heap.old_gen().object_iterate(|obj| {
        // Imprecise marks may sit on the object head only, so a missing
        // mark on a slot's own card is not yet a failure.
        let mut unmarked_slot: Option<Address> = None;
        obj.each_ref_slot(|slot| {
            // SAFETY: slots of live old objects; mutators are stopped.
            let target = Address::new(unsafe { slot.load_word() });
            if young.is_in_reserved(target)
                && !ct.addr_is_marked_imprecise(slot)
                && unmarked_slot.is_none()
            {
                unmarked_slot = Some(slot);
            }
        });
        if let Some(slot) = unmarked_slot {
            assert!(
                ct.addr_is_marked_imprecise(obj.start()),
                "young reference at {slot} in object {} has no card mark",
                obj.start()
            );
        }
    });
}

/// Checks precise marks for every young-pointing slot and settles the
/// card table.
///
/// Call immediately after a scan, before mutators resume. Every visited
/// card is re-justified through the transient `verify` state; the final
/// sweep converts those to `youngergen` and demands every other card be
/// clean.
///
/// # Panics
///
/// Panics if a young-pointing slot sits on a card that is neither
/// `youngergen` nor `verify`, or if the sweep meets an unexpected value.
pub fn verify_all_young_refs_precise(heap: &GenHeap) {
    trace::log_verify_pass("precise");
    let young = heap.young_gen();
    let ct = heap.card_table();

    heap.old_gen().object_iterate(|obj| {
        obj.each_ref_slot(|slot| {
            // SAFETY: slots of live old objects; mutators are stopped.
            let target = Address::new(unsafe { slot.load_word() });
            if target.is_null() || !young.is_in_reserved(target) {
                return;
            }
            assert!(
                ct.addr_is_marked_precise(slot),
                "young reference at {slot} has no precise card mark"
            );
            // Re-justified cards enter the transient state; the sweep
            // below settles them to youngergen.
            ct.set(ct.index_for(slot), VERIFY_CARD);
        });
    });

    let (bottom, top) = heap.old_gen().space().used_region();
    verify_all_young_refs_precise_helper(ct, bottom, top);
}

/// Sweeps the cards covering `[bottom, top)`: transient `verify` cards
/// become `youngergen`, and every other card must be clean.
///
/// # Panics
///
/// Panics on any card that is neither clean nor `verify`.
pub fn verify_all_young_refs_precise_helper(ct: &CardTable, bottom: Address, top: Address) {
    if bottom >= top {
        return;
    }
    let first = ct.index_for(bottom);
    let last = ct.index_for(top.sub_words(1));
    for index in first..=last {
        let value = ct.get(index);
        if card_is_verify(value) {
            ct.set(index, YOUNGERGEN_CARD);
            continue;
        }
        assert!(
            card_is_clean(value),
            "unwanted card mark {value:#x} on card {index} after collection"
        );
    }
}

/// Asserts that no card in the old generation's used region carries the
/// transient `verify` state.
///
/// The state only exists inside [`verify_all_young_refs_precise`]; seeing
/// it at a collection boundary means a verifier was interrupted.
pub fn assert_no_transient_verify_cards(heap: &GenHeap) {
    let ct = heap.card_table();
    let (bottom, top) = heap.old_gen().space().used_region();
    if bottom >= top {
        return;
    }
    let first = ct.index_for(bottom);
    let last = ct.index_for(top.sub_words(1));
    for index in first..=last {
        assert!(
            !card_is_verify(ct.get(index)),
            "transient verify mark leaked to card {index}"
        );
    }
}
