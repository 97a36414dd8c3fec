use std::sync::Mutex;

use crate::lock;

/// Sequence number handed out first.  Zero is left for packets a bulb sends on its own.
pub const SEQUENCE_BASE: u8 = 1;

/// How many distinct sequence numbers are used before wrapping.
pub const SEQUENCE_COUNT: u16 = 255;

/// Hands out wire sequence numbers, cycling through `1..=255`.
///
/// Numbers are reused as soon as the counter wraps, whether or not the command that last held one
/// has been acknowledged.  This only stays unambiguous while fewer than 255 commands are in flight.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    /// Offset from [SEQUENCE_BASE] of the next number to hand out
    next: Mutex<u16>,
}

impl SequenceAllocator {
    pub fn new() -> SequenceAllocator {
        SequenceAllocator::default()
    }

    pub fn next_seq(&self) -> u8 {
        let mut next = lock(&self.next);
        let seq = *next as u8 + SEQUENCE_BASE;
        *next = (*next + 1) % SEQUENCE_COUNT;
        seq
    }
}
