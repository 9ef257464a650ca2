//! Node registry: membership, stake and committee selection

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::node::{Identity, Node, Role};
use super::selection::{Seed, select_lowest};
use crate::config::RegistryConfig;
use crate::error::{OracleError, Result};
use crate::ledger::IncentiveLedger;

#[derive(Debug, Clone)]
struct NodeEntry {
    role: Role,
    stake: u128,
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: HashMap<Identity, NodeEntry>,
    min_stakes: RegistryConfig,
}

/// Membership table shared by every request
pub struct NodeRegistry {
    state: RwLock<RegistryState>,
    ledger: Arc<IncentiveLedger>,
}

impl NodeRegistry {
    pub fn new(config: RegistryConfig, ledger: Arc<IncentiveLedger>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                nodes: HashMap::new(),
                min_stakes: config,
            }),
            ledger,
        }
    }

    /// Register `identity` under `role`, or top up its stake if it is
    /// already registered with the same role.
    pub async fn register(&self, identity: Identity, role: Role, stake: u128) -> Result<Node> {
        let node = {
            let mut state = self.state.write().await;
            let required = state.min_stakes.min_stake(role);

            if let Some(entry) = state.nodes.get_mut(&identity) {
                if entry.role != role {
                    warn!(
                        identity = %identity,
                        existing = %entry.role,
                        requested = %role,
                        "Registration with conflicting role"
                    );
                    return Err(OracleError::AlreadyRegistered {
                        identity,
                        existing: entry.role,
                    });
                }
                entry.stake = entry
                    .stake
                    .checked_add(stake)
                    .ok_or(OracleError::Overflow("stake"))?;
                debug!(identity = %identity, role = %role, stake = entry.stake, "Stake topped up");
                (entry.role, entry.stake)
            } else {
                if stake < required {
                    return Err(OracleError::InsufficientStake {
                        role,
                        provided: stake,
                        required,
                    });
                }
                state.nodes.insert(identity, NodeEntry { role, stake });
                info!(identity = %identity, role = %role, stake, "Node registered");
                (role, stake)
            }
        };

        Ok(Node {
            identity,
            role: Some(node.0),
            stake: node.1,
            reputation: self.ledger.reputation_of(&identity).await,
            registered: true,
        })
    }

    /// Pure lookup. Unknown identities yield the not-registered sentinel.
    pub async fn get_node(&self, identity: &Identity) -> Node {
        let entry = {
            let state = self.state.read().await;
            state.nodes.get(identity).cloned()
        };
        let reputation = self.ledger.reputation_of(identity).await;

        match entry {
            Some(entry) => Node {
                identity: *identity,
                role: Some(entry.role),
                stake: entry.stake,
                reputation,
                registered: true,
            },
            None => Node::unregistered(*identity, reputation),
        }
    }

    /// Identities currently eligible for `role` committees
    pub async fn eligible(&self, role: Role) -> Vec<Identity> {
        let state = self.state.read().await;
        let required = state.min_stakes.min_stake(role);
        state
            .nodes
            .iter()
            .filter(|(_, e)| e.role == role && e.stake >= required)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Select `count` distinct eligible identities of `role`, determined
    /// entirely by `seed`.
    pub async fn select_committee(
        &self,
        role: Role,
        count: usize,
        seed: &Seed,
    ) -> Result<Vec<Identity>> {
        let pool = self.eligible(role).await;
        let available = pool.len();

        let committee = select_lowest(seed, pool, count).ok_or(OracleError::InsufficientPool {
            role,
            needed: count,
            available,
        })?;

        debug!(role = %role, count, available, "Committee selected");
        Ok(committee)
    }

    pub async fn min_stake(&self, role: Role) -> u128 {
        self.state.read().await.min_stakes.min_stake(role)
    }

    /// Change a role minimum. Existing nodes below it stay registered but
    /// drop out of committee selection.
    pub async fn set_min_stake(&self, role: Role, amount: u128) {
        let mut state = self.state.write().await;
        state.min_stakes.set_min_stake(role, amount);
        info!(role = %role, amount, "Minimum stake updated");
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }
}
