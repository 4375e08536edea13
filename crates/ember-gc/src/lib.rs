//! Parallel remembered-set scanning for a generational scavenger.
//!
//! A minor collection must find every old-to-young reference without
//! walking the whole old generation. `ember-gc` implements the card-table
//! side of that bargain for a stop-the-world, parallel scavenger:
//!
//! - a byte-per-card table over the old generation with a write-barrier
//!   encoding (`clean` / `dirty` / `youngergen` / transient `verify`);
//! - a stripe-parallel walker that finds runs of dirty cards, forwards
//!   the objects they cover to the promotion side, and clears the cards
//!   it consumed;
//! - element-wise cooperative scanning of large object arrays, so a
//!   single huge array spreads across all workers;
//! - heap-against-table verification passes bracketing the collection.
//!
//! Object copying, work stealing and pause orchestration live elsewhere;
//! the scan talks to them through the [`PromotionTarget`] capability.
//!
//! # Example
//!
//! ```
//! use ember_gc::{parallel_scavenge, GenHeap};
//!
//! let heap = GenHeap::new(1 << 22, 1 << 20)?;
//! let obj = heap.old_gen().allocate_ordinary(8, 1).unwrap();
//! let target = heap.young_gen().allocate_raw(4).unwrap();
//! // A mutator store with the write barrier dirties the slot's card...
//! unsafe { heap.barriered_store(obj.ref_slots_start(), target) };
//!
//! // ...and the parallel scan finds the reference again.
//! let outcome = parallel_scavenge(&heap, 2);
//! assert_eq!(outcome.young_referents, vec![target]);
//! # Ok::<(), std::io::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod card;
pub mod metrics;
pub mod object;
pub mod promote;
pub mod scavenge;
pub mod space;
pub mod start_array;
pub mod tracing;
pub mod verify;

pub use addr::{Address, HEAP_WORD_SIZE};
pub use card::{CardTable, CardValue, CARD_BYTE_SIZE, CARD_SIZE_IN_WORDS};
pub use metrics::{global_scavenge_metrics, last_scavenge_metrics, ScavengeMetrics};
pub use object::{ObjectKind, ObjectRef};
pub use promote::{ClaimBitmap, PromotionManager, PromotionStats, PromotionTarget};
pub use scavenge::{
    is_large_obj_array, parallel_scavenge, scan_objects_in_range, ScavengeOutcome,
    LARGE_OBJ_ARRAY_MIN_WORDS, NUM_CARDS_IN_STRIPE, STRIPE_SIZE_IN_WORDS,
};
pub use space::{GenHeap, MutableSpace, OldGen, YoungGen};
pub use start_array::ObjectStartArray;
pub use verify::{
    assert_no_transient_verify_cards, verify_all_young_refs_imprecise,
    verify_all_young_refs_precise, verify_all_young_refs_precise_helper,
};
