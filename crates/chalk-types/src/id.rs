use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter backing both id kinds. Starts at 1 so that 0 can
/// never collide with a minted id (useful as a sentinel in debug dumps).
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Advance the id counter past `raw`. Called after loading a saved sketch so
/// that freshly minted ids never collide with persisted ones.
pub fn reserve_ids_through(raw: u64) {
    NEXT_ID.fetch_max(raw.saturating_add(1), Ordering::Relaxed);
}

fn mint_raw() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity of a curve (point, line or arc). Minted once at construction and
/// stable for the lifetime of the curve, including across save/load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub fn mint() -> Self {
        EntityId(mint_raw())
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        EntityId(raw)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Identity of a constraint within a sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(u64);

impl ConstraintId {
    pub fn mint() -> Self {
        ConstraintId(mint_raw())
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        ConstraintId(raw)
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_ids_are_unique() {
        let a = EntityId::mint();
        let b = EntityId::mint();
        let c = ConstraintId::mint();
        assert_ne!(a, b);
        assert_ne!(a.raw(), c.raw());
    }

    #[test]
    fn test_reserve_skips_past_loaded_ids() {
        let high = EntityId::mint().raw() + 1000;
        reserve_ids_through(high);
        assert!(EntityId::mint().raw() > high);
    }

    #[test]
    fn test_serializes_as_bare_number() {
        let id = EntityId::from_raw(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
