//! Generation-checked object identifier.
//!
//! An `ObjId` is an index into the proactor's object arena plus the
//! generation the slot had when the object was added. A stale id (the slot
//! was reclaimed and reused) fails the generation check and resolves to
//! nothing — it can never alias a newer object.

/// Identifier of an `AsyncObject` inside a proactor's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId {
    pub index: u32,
    pub generation: u32,
}

impl ObjId {
    /// Sentinel id that resolves to nothing.
    pub const NONE: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.index == u32::MAX
    }
}

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj#{}.{}", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_sentinel() {
        assert!(ObjId::NONE.is_none());
        assert!(!ObjId::new(0, 1).is_none());
    }

    #[test]
    fn test_generation_distinguishes() {
        let a = ObjId::new(7, 1);
        let b = ObjId::new(7, 2);
        assert_ne!(a, b);
    }
}
