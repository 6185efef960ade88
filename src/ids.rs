use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the identifiers minted while serving a request.
///
/// Production uses [`RandomIdGenerator`]; tests inject
/// [`SequentialIdGenerator`] so emitted events are reproducible.
pub trait IdGenerator: Send + Sync {
    /// `msg_` followed by a hyphenated UUID.
    fn message_id(&self) -> String;
    /// `toolu_` followed by 20 hex digits.
    fn tool_use_id(&self) -> String;
    /// Short hex segment used in upstream message ids.
    fn segment_id(&self) -> String;
    /// `sb-` followed by 20 hex digits.
    fn sandbox_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn message_id(&self) -> String {
        format!("msg_{}", uuid::Uuid::from_u128(fastrand::u128(..)))
    }

    fn tool_use_id(&self) -> String {
        format!("toolu_{}", random_hex_80())
    }

    fn segment_id(&self) -> String {
        format!("{:08x}", fastrand::u32(..))
    }

    fn sandbox_id(&self) -> String {
        format!("sb-{}", random_hex_80())
    }
}

#[inline]
fn random_hex_80() -> String {
    format!("{:016x}{:04x}", fastrand::u64(..), fastrand::u16(..))
}

/// Deterministic generator: every call draws the next value of one counter.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn message_id(&self) -> String {
        format!("msg_{}", uuid::Uuid::from_u128(u128::from(self.next())))
    }

    fn tool_use_id(&self) -> String {
        format!("toolu_{:020x}", self.next())
    }

    fn segment_id(&self) -> String {
        format!("{:08x}", self.next())
    }

    fn sandbox_id(&self) -> String {
        format!("sb-{:020x}", self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_lower_hex(s: &str) -> bool {
        s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    #[test]
    fn random_ids_have_expected_shape() {
        let ids = RandomIdGenerator;

        let msg = ids.message_id();
        let uuid = msg.strip_prefix("msg_").expect("prefix");
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.matches('-').count(), 4);

        let tool = ids.tool_use_id();
        let hex = tool.strip_prefix("toolu_").expect("prefix");
        assert_eq!(hex.len(), 20);
        assert!(is_lower_hex(hex));

        let sandbox = ids.sandbox_id();
        assert_eq!(sandbox.strip_prefix("sb-").map(str::len), Some(20));
        assert_eq!(ids.segment_id().len(), 8);
    }

    #[test]
    fn random_tool_ids_differ() {
        let ids = RandomIdGenerator;
        assert_ne!(ids.tool_use_id(), ids.tool_use_id());
    }

    #[test]
    fn sequential_ids_are_reproducible() {
        let a = SequentialIdGenerator::new();
        let b = SequentialIdGenerator::new();
        assert_eq!(a.message_id(), b.message_id());
        assert_eq!(a.tool_use_id(), "toolu_00000000000000000002");
        assert_eq!(a.segment_id(), "00000003");
        assert_eq!(a.sandbox_id(), "sb-00000000000000000004");
    }
}
