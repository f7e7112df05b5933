//! Deterministic percentage-rollout bucketing.
//!
//! A subject is placed into a bucket in `[0, 1)` by hashing `"<flag key>.<distinct id>"` with
//! SHA-1 and scaling the first 15 hex digits of the digest. The computation only depends on
//! SHA-1 and fixed-width integer math, so it agrees bit-for-bit with other PostHog libraries.
use sha1::{Digest, Sha1};

/// `0xFFFFFFFFFFFFFFF`, the largest value representable by 15 hex digits.
const LONG_SCALE: f64 = 0xFFF_FFFF_FFFF_FFFF_u64 as f64;

pub trait Bucketer {
    /// Returns a value in `[0, 1)` for the given flag key and subject.
    fn bucket(&self, key: &str, distinct_id: &str) -> f64;
}

pub struct Sha1Bucketer;

impl Bucketer for Sha1Bucketer {
    fn bucket(&self, key: &str, distinct_id: &str) -> f64 {
        let mut hash = Sha1::new();
        hash.update(key.as_bytes());
        hash.update(b".");
        hash.update(distinct_id.as_bytes());
        let digest = hash.finalize();

        // First 15 hex digits are the top 60 bits of the digest.
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let numhash = u64::from_be_bytes(head) >> 4;

        numhash as f64 / LONG_SCALE
    }
}

/// Decide whether a simple (rollout-only) flag is enabled for `distinct_id`.
///
/// A missing rollout percentage, or a rollout percentage of zero, means the flag is enabled for
/// everyone.
pub fn is_simple_flag_enabled(
    bucketer: &impl Bucketer,
    key: &str,
    distinct_id: &str,
    rollout_percentage: Option<f64>,
) -> bool {
    match rollout_percentage {
        Some(rollout) if rollout != 0.0 && !rollout.is_nan() => {
            bucketer.bucket(key, distinct_id) <= rollout / 100.0
        }
        _ => true,
    }
}

#[cfg(test)]
pub struct DeterministicBucketer(pub std::collections::HashMap<String, f64>);

#[cfg(test)]
impl Bucketer for DeterministicBucketer {
    fn bucket(&self, key: &str, distinct_id: &str) -> f64 {
        self.0
            .get(&format!("{key}.{distinct_id}"))
            .copied()
            .unwrap_or(0.0)
    }
}
