//! Ranking of compiled binaries. Lower is better.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cost(pub usize);

pub trait CostModel: Send + Sync {
    fn rate(&self, binary: &[u8]) -> Cost;
}

/// Rates a binary by its length in bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySizeCost;

impl CostModel for BinarySizeCost {
    fn rate(&self, binary: &[u8]) -> Cost {
        Cost(binary.len())
    }
}
