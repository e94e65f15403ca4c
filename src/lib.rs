//! # materia - checkpointable materials data manager
//!
//! materia is the entity/state core of a materials-production data manager
//! embedded in a discrete-event simulation kernel. Producers own batches of
//! material, group them on stages, offer stages for transfer, and convert
//! staged content into new batches or resource credits.
//!
//! The load-bearing design goal is **run continuity**: the manager can halt
//! at an arbitrary point, externalize its entire state as an immutable
//! snapshot, and later be rebuilt from that snapshot so that splitting one
//! run into any number of halt/resume cycles produces identical final state
//! to running it uninterrupted. Nothing in the manager is hidden from the
//! snapshot: identifiers, memberships, property values, and id-allocation
//! cursors are all captured.
//!
//! ## Core Concepts
//!
//! - **Batch**: an amount of one material, living in exactly one location
//! - **Stage**: a transient grouping of batches under a producer,
//!   convertible or offerable as a unit
//! - **Offer**: a lock on a stage's content until released or transferred
//! - **Snapshot**: the immutable plugin-data value capturing all state
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use materia::{
//!     BatchConstruction, InMemoryResourceLedger, MaterialId, MaterialsManager, ProducerId,
//! };
//!
//! let mut manager = MaterialsManager::new();
//! let mut ledger = InMemoryResourceLedger::new();
//!
//! manager.add_material(MaterialId::new(1))?;
//! manager.add_producer(ProducerId::new(1), &BTreeMap::new(), &mut ledger)?;
//! let batch = manager.add_batch(BatchConstruction::new(
//!     MaterialId::new(1),
//!     ProducerId::new(1),
//!     10.0,
//! ))?;
//!
//! let snapshot = manager.snapshot(&ledger);
//! let mut fresh_ledger = InMemoryResourceLedger::new();
//! let restored = MaterialsManager::from_snapshot(&snapshot, &mut fresh_ledger)?;
//! assert_eq!(restored.batch_amount(batch)?, 10.0);
//! # Ok::<(), materia::MateriaError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod ids;
pub mod properties;
pub mod time;
pub mod value;

// State, mutation, and observation
pub mod events;
pub mod manager;
pub(crate) mod registry;

// Checkpointing and diagnostics
pub mod render;
pub mod snapshot;

// External collaborator contracts
pub mod collab;

// Re-export primary types at crate root for convenience
pub use collab::{
    CollaboratorRole, InMemoryRegionRegistry, InMemoryResourceLedger, Plan, RandomSource,
    RegionRegistry, ResourceLedger, Scheduler, SequentialScheduler, SimulationClock,
};
pub use error::{ContractError, MateriaError, MateriaResult, SnapshotError};
pub use events::{EventBus, EventBusConfig, EventStream, MaterialsEvent, RemovalCause};
pub use ids::{
    BatchId, BatchPropertyId, IdAllocator, MaterialId, ProducerId, ProducerPropertyId, RegionId,
    ResourceId, StageId,
};
pub use manager::{BatchConstruction, MaterialsManager};
pub use properties::PropertyDefinition;
pub use registry::BatchLocation;
pub use snapshot::{
    BatchPropertyDeclaration, BatchState, MaterialsSnapshot, ProducerPropertyDeclaration,
    ProducerState, SnapshotBuilder, StageState,
};
pub use time::Time;
pub use value::{PropertyKind, PropertyValue};
