//! Silica Quorum Oracle
//!
//! Commit-reveal data oracle: a stake-weighted committee reports a value,
//! a median/MAD aggregation tolerates outliers, suspicious rounds go to an
//! audit committee, and an incentive ledger settles reputation and rewards.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Environment configuration and protocol defaults
//! ├── error.rs       - Typed protocol errors
//! ├── events.rs      - Typed events on a broadcast bus
//! ├── clock.rs       - Injected time source
//! ├── registry/      - Node membership and committee selection
//! │   ├── node.rs       - Identity, role and node view
//! │   ├── nodes.rs      - Registry with stake minimums
//! │   └── selection.rs  - Seed providers and score-based selection
//! ├── aggregation/   - Median/MAD consensus
//! ├── coordinator/   - Per-request state machine
//! │   ├── commitment.rs - Commitment hashing
//! │   ├── request.rs    - Request record and views
//! │   └── service.rs    - RequestCoordinator
//! ├── dispute/       - Audit committees, votes and tally
//! ├── ledger/        - Reputation, balances and settlement policy
//! └── api/           - HTTP API endpoints
//!     ├── protocol.rs - Requests and disputes
//!     └── accounts.rs - Nodes, ledger and admin
//! ```

pub mod aggregation;
pub mod api;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dispute;
pub mod error;
pub mod events;
pub mod ledger;
pub mod registry;

// Re-export main types for convenience
pub use aggregation::{AggregationParams, AggregationResult, WeightPolicy, compute};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OracleConfig, ProtocolDefaults, RegistryConfig, RequestParams, ResolvedParams};
pub use coordinator::{
    Commitment, RequestCoordinator, RequestResult, RequestSnapshot, RequestStatus, commitment_hash,
};
pub use dispute::{AuditOutcome, Dispute, DisputeResolver};
pub use error::{OracleError, Result};
pub use events::{EventBus, EventRecord, OracleEvent};
pub use ledger::{IncentiveLedger, ReferencePolicy, SettlementPlan, SettlementPolicy, Verdict};
pub use registry::{
    DeterministicSeeds, EntropySeeds, Identity, Node, NodeRegistry, Role, SeedProvider,
};
