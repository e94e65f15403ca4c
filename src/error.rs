//! Error types for materia.
//!
//! All errors are strongly typed using thiserror. Two classes exist:
//! caller-contract violations ([`ContractError`]), which are detected before
//! any mutation and are recoverable by the caller, and structural failures
//! ([`SnapshotError`]), which indicate an inconsistent snapshot and abort
//! manager initialization. Nothing in this crate retries automatically;
//! retry policy belongs to the caller.

use thiserror::Error;

use crate::ids::{
    BatchId, BatchPropertyId, MaterialId, ProducerId, ProducerPropertyId, RegionId, ResourceId,
    StageId,
};
use crate::value::PropertyKind;

/// Caller-contract violations.
///
/// Every operation validates its full precondition set before touching any
/// state, so observing one of these errors guarantees the manager is exactly
/// as it was before the call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    #[error("material not registered: {id}")]
    UnknownMaterial { id: MaterialId },

    #[error("material already registered: {id}")]
    DuplicateMaterial { id: MaterialId },

    #[error("producer not registered: {id}")]
    UnknownProducer { id: ProducerId },

    #[error("producer already registered: {id}")]
    DuplicateProducer { id: ProducerId },

    #[error("batch not found: {id}")]
    UnknownBatch { id: BatchId },

    #[error("stage not found: {id}")]
    UnknownStage { id: StageId },

    #[error("region not registered: {id}")]
    UnknownRegion { id: RegionId },

    #[error("batch property {property} is not declared for material {material}")]
    UnknownBatchProperty {
        material: MaterialId,
        property: BatchPropertyId,
    },

    #[error("batch property {property} is already declared for material {material}")]
    DuplicateBatchProperty {
        material: MaterialId,
        property: BatchPropertyId,
    },

    #[error("producer property not declared: {property}")]
    UnknownProducerProperty { property: ProducerPropertyId },

    #[error("producer property already declared: {property}")]
    DuplicateProducerProperty { property: ProducerPropertyId },

    #[error("property value has kind {actual}, declaration requires {expected}")]
    PropertyKindMismatch {
        expected: PropertyKind,
        actual: PropertyKind,
    },

    #[error("batch property {property} of material {material} is immutable")]
    ImmutableBatchProperty {
        material: MaterialId,
        property: BatchPropertyId,
    },

    #[error("producer property {property} is immutable")]
    ImmutableProducerProperty { property: ProducerPropertyId },

    #[error("batch property {property} has no default and no value was supplied")]
    UnsetBatchProperty { property: BatchPropertyId },

    #[error("no initial value for batch {batch} while declaring property {property} without a default")]
    MissingBatchInitialValue {
        batch: BatchId,
        property: BatchPropertyId,
    },

    #[error("no initial value for producer {producer} while declaring property {property} without a default")]
    MissingProducerInitialValue {
        producer: ProducerId,
        property: ProducerPropertyId,
    },

    #[error("amount {amount} is negative")]
    NegativeAmount { amount: f64 },

    #[error("amount {amount} is not a finite number")]
    NonFiniteAmount { amount: f64 },

    #[error("amount {requested} exceeds available amount {available}")]
    InsufficientAmount { available: f64, requested: f64 },

    #[error(
        "producer {producer} holds {available} of resource {resource}, cannot debit {requested}"
    )]
    InsufficientResource {
        producer: ProducerId,
        resource: ResourceId,
        available: f64,
        requested: f64,
    },

    #[error("source and destination are the same batch: {batch}")]
    SelfTransfer { batch: BatchId },

    #[error("cannot transfer between material {source_material} and material {destination}")]
    MaterialMismatch {
        source_material: MaterialId,
        destination: MaterialId,
    },

    #[error("stage {stage} is offered; its content is locked until the offer is released")]
    OfferedStage { stage: StageId },

    #[error("stage {stage} is not offered")]
    StageNotOffered { stage: StageId },

    #[error("batch {batch} is already at the requested location")]
    BatchAlreadyAtLocation { batch: BatchId },

    #[error("batch {batch} and stage {stage} belong to different producers")]
    CrossProducerMove { batch: BatchId, stage: StageId },

    #[error("initial value targets batch {batch}, which is not of material {material}")]
    PropertyMaterialMismatch {
        batch: BatchId,
        material: MaterialId,
    },
}

/// Structural snapshot failures.
///
/// These indicate an internally inconsistent snapshot value. They are
/// programming-error-class: restoring from such a snapshot aborts manager
/// initialization rather than proceeding with undefined state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    #[error("snapshot declares material {id} more than once")]
    DuplicateMaterial { id: MaterialId },

    #[error("snapshot declares producer {id} more than once")]
    DuplicateProducer { id: ProducerId },

    #[error("snapshot contains batch {id} more than once")]
    DuplicateBatch { id: BatchId },

    #[error("snapshot contains stage {id} more than once")]
    DuplicateStage { id: StageId },

    #[error("snapshot declares property {property} of material {material} more than once")]
    DuplicateBatchProperty {
        material: MaterialId,
        property: BatchPropertyId,
    },

    #[error("snapshot declares producer property {property} more than once")]
    DuplicateProducerProperty { property: ProducerPropertyId },

    #[error("property {property} is declared for unregistered material {material}")]
    PropertyMaterialUnknown {
        material: MaterialId,
        property: BatchPropertyId,
    },

    #[error("batch {batch} references undeclared material {material}")]
    BatchMaterialUnknown {
        batch: BatchId,
        material: MaterialId,
    },

    #[error("batch {batch} references unknown stage {stage}")]
    BatchStageUnknown { batch: BatchId, stage: StageId },

    #[error("batch {batch} references unknown producer {producer}")]
    BatchProducerUnknown {
        batch: BatchId,
        producer: ProducerId,
    },

    #[error("stage {stage} references unknown producer {producer}")]
    StageProducerUnknown {
        stage: StageId,
        producer: ProducerId,
    },

    #[error("stage {stage} lists unknown batch {batch}")]
    StagedBatchUnknown { stage: StageId, batch: BatchId },

    #[error("batch {batch} location disagrees with stage membership")]
    LocationConflict { batch: BatchId },

    #[error("batch {batch} carries a value for undeclared property {property}")]
    UndeclaredBatchProperty {
        batch: BatchId,
        property: BatchPropertyId,
    },

    #[error("producer {producer} carries a value for undeclared property {property}")]
    UndeclaredProducerProperty {
        producer: ProducerId,
        property: ProducerPropertyId,
    },

    #[error("value for property {property} has kind {actual}, declaration requires {expected}")]
    PropertyKindMismatch {
        property: u64,
        expected: PropertyKind,
        actual: PropertyKind,
    },

    #[error("batch {batch} is missing a value for non-defaulted property {property}")]
    MissingBatchProperty {
        batch: BatchId,
        property: BatchPropertyId,
    },

    #[error("producer {producer} is missing a value for non-defaulted property {property}")]
    MissingProducerProperty {
        producer: ProducerId,
        property: ProducerPropertyId,
    },

    #[error("batch {batch} has invalid amount {amount}")]
    InvalidAmount { batch: BatchId, amount: f64 },

    #[error("producer {producer} has invalid balance {amount} of resource {resource}")]
    InvalidResourceBalance {
        producer: ProducerId,
        resource: ResourceId,
        amount: f64,
    },

    #[error("{kind} id cursor {cursor} does not exceed highest allocated id {highest}")]
    CursorRegression {
        kind: &'static str,
        cursor: u64,
        highest: u64,
    },
}

/// Top-level error type for materia.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MateriaError {
    #[error("contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("snapshot inconsistency: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl MateriaError {
    /// Returns true if this is a recoverable caller-contract violation.
    #[must_use]
    pub const fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Returns true if this is a fatal snapshot inconsistency.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }
}

/// Result type alias for materia operations.
pub type MateriaResult<T> = Result<T, MateriaError>;
