//! Node Registry
//!
//! Tracks who may take part in the protocol and under which role, and
//! draws committees for requests and audits.
//!
//! ## Committee Selection
//!
//! ```text
//! request id ──► SeedProvider ──► seed
//!                                  │
//!   eligible(role) ──► SHA-256(seed || identity) ──► lowest `count` scores
//! ```
//!
//! - Eligible = registered with the role and stake ≥ the role's current minimum
//! - Observer and auditor committees use independent seeds

mod node;
mod nodes;
mod selection;

pub use node::{Identity, Node, ParseIdentityError, Role};
pub use nodes::NodeRegistry;
pub use selection::{
    DeterministicSeeds, EntropySeeds, Seed, SeedProvider, SeedPurpose, committee_score,
    select_lowest,
};
