//! External collaborator contracts.
//!
//! The manager never owns time, resource balances, regions, or randomness.
//! Those belong to peer data managers reached through the trait handles in
//! this module, passed at call time and never cached across a checkpoint
//! boundary. In-memory implementations are provided for embedded usage and
//! tests; a full simulation kernel supplies its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ContractError;
use crate::ids::{ProducerId, RegionId, ResourceId};
use crate::manager::MaterialsManager;
use crate::time::Time;

/// Declared role of a peer data manager, used for capability lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorRole {
    /// The fungible resource ledger.
    Resources,
    /// The spatial region registry.
    Regions,
    /// The serializable pseudo-random source.
    Randomness,
}

/// Read access to the scheduling collaborator's clock.
///
/// The core never calls back into the scheduler except to read time.
pub trait SimulationClock {
    /// Current simulation time.
    fn now(&self) -> Time;
}

/// Per-producer resource ledger, owned by the resources collaborator.
pub trait ResourceLedger {
    /// Registers a producer with its opening balances.
    fn open_account(
        &mut self,
        producer: ProducerId,
        opening: &BTreeMap<ResourceId, f64>,
    ) -> Result<(), ContractError>;

    /// Credits an amount of a resource to a producer.
    fn credit(
        &mut self,
        producer: ProducerId,
        resource: ResourceId,
        amount: f64,
    ) -> Result<(), ContractError>;

    /// Debits an amount of a resource from a producer.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InsufficientResource`] if the balance does
    /// not cover the requested amount.
    fn debit(
        &mut self,
        producer: ProducerId,
        resource: ResourceId,
        amount: f64,
    ) -> Result<(), ContractError>;

    /// Current balance of one resource for a producer.
    fn balance(&self, producer: ProducerId, resource: ResourceId) -> f64;

    /// All non-zero balances for a producer, ordered by resource id.
    fn balances(&self, producer: ProducerId) -> BTreeMap<ResourceId, f64>;
}

/// Region registry owned by the regions collaborator.
pub trait RegionRegistry {
    /// True if the region is registered.
    fn contains(&self, region: RegionId) -> bool;

    /// Credits an amount of a resource to a region.
    fn credit(
        &mut self,
        region: RegionId,
        resource: ResourceId,
        amount: f64,
    ) -> Result<(), ContractError>;
}

/// Serializable pseudo-random source owned by the randomness collaborator.
///
/// The materials core does not consume randomness itself; the handle exists
/// so plans can reach the peer through the same capability model.
pub trait RandomSource {
    /// Next raw 64-bit value from the stream.
    fn next_u64(&mut self) -> u64;
}

/// Callback registered with the scheduler, invoked at its planned time.
pub type Plan = Box<dyn FnOnce(&mut MaterialsManager, &mut dyn ResourceLedger)>;

/// The scheduling collaborator contract.
///
/// Callbacks fire strictly in non-decreasing time order, ties broken by
/// registration sequence, and never concurrently.
pub trait Scheduler: SimulationClock {
    /// Registers a plan for execution at the given time.
    fn schedule(&mut self, at: Time, plan: Plan);
}

/// In-memory resource ledger.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InMemoryResourceLedger {
    accounts: BTreeMap<ProducerId, BTreeMap<ResourceId, f64>>,
}

impl InMemoryResourceLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceLedger for InMemoryResourceLedger {
    fn open_account(
        &mut self,
        producer: ProducerId,
        opening: &BTreeMap<ResourceId, f64>,
    ) -> Result<(), ContractError> {
        for &amount in opening.values() {
            if !amount.is_finite() {
                return Err(ContractError::NonFiniteAmount { amount });
            }
            if amount < 0.0 {
                return Err(ContractError::NegativeAmount { amount });
            }
        }
        let account = self.accounts.entry(producer).or_default();
        for (&resource, &amount) in opening {
            *account.entry(resource).or_insert(0.0) += amount;
        }
        Ok(())
    }

    fn credit(
        &mut self,
        producer: ProducerId,
        resource: ResourceId,
        amount: f64,
    ) -> Result<(), ContractError> {
        if !amount.is_finite() {
            return Err(ContractError::NonFiniteAmount { amount });
        }
        if amount < 0.0 {
            return Err(ContractError::NegativeAmount { amount });
        }
        let account = self.accounts.entry(producer).or_default();
        *account.entry(resource).or_insert(0.0) += amount;
        Ok(())
    }

    fn debit(
        &mut self,
        producer: ProducerId,
        resource: ResourceId,
        amount: f64,
    ) -> Result<(), ContractError> {
        if !amount.is_finite() {
            return Err(ContractError::NonFiniteAmount { amount });
        }
        if amount < 0.0 {
            return Err(ContractError::NegativeAmount { amount });
        }
        let available = self.balance(producer, resource);
        if amount > available {
            return Err(ContractError::InsufficientResource {
                producer,
                resource,
                available,
                requested: amount,
            });
        }
        let account = self.accounts.entry(producer).or_default();
        *account.entry(resource).or_insert(0.0) -= amount;
        Ok(())
    }

    fn balance(&self, producer: ProducerId, resource: ResourceId) -> f64 {
        self.accounts
            .get(&producer)
            .and_then(|account| account.get(&resource))
            .copied()
            .unwrap_or(0.0)
    }

    fn balances(&self, producer: ProducerId) -> BTreeMap<ResourceId, f64> {
        self.accounts
            .get(&producer)
            .map(|account| {
                account
                    .iter()
                    .filter(|(_, &amount)| amount != 0.0)
                    .map(|(&resource, &amount)| (resource, amount))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-memory region registry.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InMemoryRegionRegistry {
    regions: BTreeMap<RegionId, BTreeMap<ResourceId, f64>>,
}

impl InMemoryRegionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a region. Idempotent.
    pub fn add_region(&mut self, region: RegionId) {
        self.regions.entry(region).or_default();
    }

    /// Amount of a resource held by a region.
    #[must_use]
    pub fn resource_level(&self, region: RegionId, resource: ResourceId) -> f64 {
        self.regions
            .get(&region)
            .and_then(|held| held.get(&resource))
            .copied()
            .unwrap_or(0.0)
    }
}

impl RegionRegistry for InMemoryRegionRegistry {
    fn contains(&self, region: RegionId) -> bool {
        self.regions.contains_key(&region)
    }

    fn credit(
        &mut self,
        region: RegionId,
        resource: ResourceId,
        amount: f64,
    ) -> Result<(), ContractError> {
        if !amount.is_finite() {
            return Err(ContractError::NonFiniteAmount { amount });
        }
        if amount < 0.0 {
            return Err(ContractError::NegativeAmount { amount });
        }
        let held = self
            .regions
            .get_mut(&region)
            .ok_or(ContractError::UnknownRegion { id: region })?;
        *held.entry(resource).or_insert(0.0) += amount;
        Ok(())
    }
}

/// Single-threaded sequential scheduler.
///
/// Plans execute strictly in increasing time order, ties broken by
/// registration sequence. `run_until` is the halt point used by the
/// continuity tests: no plan is in flight when it returns.
#[derive(Default)]
pub struct SequentialScheduler {
    now: Time,
    next_seq: u64,
    pending: Vec<(Time, u64, Plan)>,
}

impl SequentialScheduler {
    /// Creates a scheduler at time zero with no pending plans.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes every pending plan with time <= `halt`, advancing the clock.
    ///
    /// Plans mutate through the public API and handle their own errors; the
    /// scheduler itself is infallible.
    pub fn run_until(
        &mut self,
        halt: Time,
        manager: &mut MaterialsManager,
        ledger: &mut dyn ResourceLedger,
    ) {
        // Stable sort preserves registration order for equal times.
        self.pending
            .sort_by(|(ta, sa, _), (tb, sb, _)| ta.value().total_cmp(&tb.value()).then(sa.cmp(sb)));

        let mut remaining = Vec::new();
        for (time, seq, plan) in self.pending.drain(..) {
            if time <= halt {
                self.now = time;
                plan(manager, ledger);
            } else {
                remaining.push((time, seq, plan));
            }
        }
        self.pending = remaining;
        self.now = halt;
    }

    /// Number of plans not yet executed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl SimulationClock for SequentialScheduler {
    fn now(&self) -> Time {
        self.now
    }
}

impl Scheduler for SequentialScheduler {
    fn schedule(&mut self, at: Time, plan: Plan) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push((at, seq, plan));
    }
}
