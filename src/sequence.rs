use std::fmt::{Display, Formatter};

/// Hands out the 16 bit sequence numbers that correlate responses with requests. Each
///  transport owns its own allocator: sequence numbers only need to be unique among the
///  requests outstanding on one connection, and sharing the number space between connections
///  would make replies ambiguous.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    next: u16,
}

impl SequenceAllocator {
    pub const NUM_SEQUENCES: usize = u16::MAX as usize + 1;

    pub fn new() -> SequenceAllocator {
        SequenceAllocator::default()
    }

    pub fn starting_at(first: u16) -> SequenceAllocator {
        SequenceAllocator { next: first }
    }

    /// the next sequence number, wrapping around at 65536
    pub fn next(&mut self) -> u16 {
        let result = self.next;
        self.next = self.next.wrapping_add(1);
        result
    }

    /// The next sequence number for which `in_use` returns false, or `None` if all numbers are
    ///  in use. Skipped numbers are consumed.
    pub fn next_free(&mut self, in_use: impl Fn(u16) -> bool) -> Option<u16> {
        for _ in 0..Self::NUM_SEQUENCES {
            let candidate = self.next();
            if !in_use(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    pub fn peek(&self) -> SequenceNumber {
        SequenceNumber(self.next)
    }
}

/// for logging
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SequenceNumber(pub u16);
impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
