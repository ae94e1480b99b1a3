use crate::types::Key;
use serde::{Deserialize, Serialize};

const PARTITION_BITS: u32 = 13;
const KEY_BITS: u32 = 64 - 1 - PARTITION_BITS;

/// Encodes `counter` in the low bits and the partition id in the high bits.
pub fn encode_partition(partition_id: u16, counter: i64) -> Key {
    ((partition_id as i64) << KEY_BITS) + counter
}

pub fn decode_partition(key: Key) -> u16 {
    (key >> KEY_BITS) as u16
}

/// Issues unique, strictly increasing keys for one partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyGenerator {
    partition_id: u16,
    next: i64,
}

impl KeyGenerator {
    pub fn new(partition_id: u16) -> Self {
        Self {
            partition_id,
            next: 1,
        }
    }

    pub fn next_key(&mut self) -> Key {
        let key = encode_partition(self.partition_id, self.next);
        self.next += 1;
        key
    }

    /// The key the next call to `next_key` will return.
    pub fn peek(&self) -> Key {
        encode_partition(self.partition_id, self.next)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
