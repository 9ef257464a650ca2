//! Seeded committee selection
//!
//! Every eligible candidate gets a score `SHA-256(seed || identity)` and the
//! lowest scores win. Once the seed is fixed the outcome is fully
//! determined: the caller has no retry or reordering lever.

use sha2::{Digest, Sha256};

use super::node::Identity;

/// 32-byte selection seed
pub type Seed = [u8; 32];

/// What a seed is drawn for. Observer and auditor committees of the same
/// request use independent seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPurpose {
    Observers,
    Auditors,
}

impl SeedPurpose {
    fn tag(&self) -> &'static [u8] {
        match self {
            SeedPurpose::Observers => b"observers",
            SeedPurpose::Auditors => b"auditors",
        }
    }
}

/// Source of committee-selection randomness
pub trait SeedProvider: Send + Sync {
    fn seed(&self, request_id: u64, purpose: SeedPurpose) -> Seed;
}

/// Reproducible seeds derived from a fixed base, for tests and replays
#[derive(Debug, Clone)]
pub struct DeterministicSeeds {
    base: Seed,
}

impl DeterministicSeeds {
    pub fn new(base: Seed) -> Self {
        Self { base }
    }
}

impl SeedProvider for DeterministicSeeds {
    fn seed(&self, request_id: u64, purpose: SeedPurpose) -> Seed {
        derive_seed(&self.base, request_id, purpose)
    }
}

/// Fresh OS entropy mixed with the request id on every draw
#[derive(Debug, Clone, Default)]
pub struct EntropySeeds;

impl SeedProvider for EntropySeeds {
    fn seed(&self, request_id: u64, purpose: SeedPurpose) -> Seed {
        let entropy: [u8; 32] = rand::random();
        derive_seed(&entropy, request_id, purpose)
    }
}

fn derive_seed(base: &Seed, request_id: u64, purpose: SeedPurpose) -> Seed {
    let mut hasher = Sha256::new();
    hasher.update(base);
    hasher.update(request_id.to_be_bytes());
    hasher.update(purpose.tag());
    hasher.finalize().into()
}

/// Selection score of one candidate under `seed`
pub fn committee_score(seed: &Seed, identity: &Identity) -> Seed {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(identity.as_bytes());
    hasher.finalize().into()
}

/// Pick `count` candidates with the lowest scores, ordered by score.
///
/// Returns `None` if fewer than `count` candidates are supplied.
pub fn select_lowest<I>(seed: &Seed, candidates: I, count: usize) -> Option<Vec<Identity>>
where
    I: IntoIterator<Item = Identity>,
{
    let mut scored: Vec<(Seed, Identity)> = candidates
        .into_iter()
        .map(|id| (committee_score(seed, &id), id))
        .collect();

    if scored.len() < count {
        return None;
    }

    scored.sort_unstable();
    scored.dedup_by(|a, b| a.1 == b.1);
    if scored.len() < count {
        return None;
    }

    Some(scored.into_iter().take(count).map(|(_, id)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Identity {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Identity::new(bytes)
    }

    #[test]
    fn test_selection_is_deterministic() {
        let seed = [7u8; 32];
        let pool: Vec<Identity> = (1..=10).map(id).collect();

        let first = select_lowest(&seed, pool.clone(), 4).unwrap();
        let second = select_lowest(&seed, pool.into_iter().rev(), 4).unwrap();
        assert_eq!(first, second, "input order must not matter");
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_selection_distinct_members() {
        let seed = [1u8; 32];
        let pool = vec![id(1), id(2), id(2), id(3)];
        let picked = select_lowest(&seed, pool, 3).unwrap();
        let mut sorted = picked.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn test_selection_insufficient_pool() {
        let seed = [0u8; 32];
        assert!(select_lowest(&seed, vec![id(1), id(2)], 3).is_none());
        assert!(select_lowest(&seed, vec![id(1), id(1), id(1)], 2).is_none());
    }

    #[test]
    fn test_seed_purposes_differ() {
        let seeds = DeterministicSeeds::new([9u8; 32]);
        assert_ne!(
            seeds.seed(1, SeedPurpose::Observers),
            seeds.seed(1, SeedPurpose::Auditors)
        );
        assert_ne!(
            seeds.seed(1, SeedPurpose::Observers),
            seeds.seed(2, SeedPurpose::Observers)
        );
        assert_eq!(
            seeds.seed(3, SeedPurpose::Auditors),
            seeds.seed(3, SeedPurpose::Auditors)
        );
    }

    #[test]
    fn test_entropy_seeds_vary() {
        let seeds = EntropySeeds;
        assert_ne!(
            seeds.seed(1, SeedPurpose::Observers),
            seeds.seed(1, SeedPurpose::Observers)
        );
    }
}
