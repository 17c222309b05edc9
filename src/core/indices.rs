use hashbrown::HashMap;

use crate::types::EventSeq;

/// Key to the sequences of its events, in insertion order.
pub type VecIndex<K> = HashMap<K, Vec<EventSeq>>;
