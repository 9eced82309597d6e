//! Descriptor identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one open descriptor within a mount.
///
/// `index` is the arena slot (the small integer a C caller would see as the
/// fd). `generation` is bumped every time a slot is reused, so a stale id
/// held after `close` never aliases a later descriptor in the same slot.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DescriptorId {
    index: u32,
    generation: u32,
}

impl DescriptorId {
    /// Build an id from its parts.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}.{}", self.index, self.generation)
    }
}

impl fmt::Debug for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = DescriptorId::new(3, 7);
        assert_eq!(id.to_string(), "fd3.7");
        assert_eq!(format!("{id:?}"), "DescriptorId(fd3.7)");
    }

    #[test]
    fn test_generation_distinguishes_reuse() {
        assert_ne!(DescriptorId::new(0, 0), DescriptorId::new(0, 1));
    }
}
