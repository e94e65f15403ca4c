//! Snapshot protocol: the immutable plugin-data value and its restorer.
//!
//! A snapshot is the sole externalized artifact of the manager: everything
//! needed to rebuild an operationally identical manager, including the id
//! allocation cursors. The aggregate itself is immutable; construction goes
//! through [`SnapshotBuilder`], a mutable staging structure validated once
//! at `build()` time. Restoring re-validates, because snapshot values also
//! arrive through deserialization and must never be trusted structurally.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collab::ResourceLedger;
use crate::error::{MateriaResult, SnapshotError};
use crate::ids::{
    BatchId, BatchPropertyId, IdAllocator, MaterialId, ProducerId, ProducerPropertyId, ResourceId,
    StageId,
};
use crate::manager::MaterialsManager;
use crate::properties::PropertyDefinition;
use crate::registry::{BatchLocation, BatchRecord, ProducerRecord, Registry, StageRecord};
use crate::value::PropertyValue;

/// A batch property declaration captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPropertyDeclaration {
    /// Material the property is scoped to.
    pub material: MaterialId,
    /// Property id.
    pub property: BatchPropertyId,
    /// The declaration itself.
    pub definition: PropertyDefinition,
}

/// A producer property declaration captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerPropertyDeclaration {
    /// Property id.
    pub property: ProducerPropertyId,
    /// The declaration itself.
    pub definition: PropertyDefinition,
}

/// State of one producer at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerState {
    /// Producer id.
    pub id: ProducerId,
    /// Property values, keyed by declared producer-property id.
    pub properties: BTreeMap<ProducerPropertyId, PropertyValue>,
    /// Resource balances read from the ledger collaborator.
    pub resources: BTreeMap<ResourceId, f64>,
}

/// State of one batch at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    /// Batch id.
    pub id: BatchId,
    /// Material of the batch.
    pub material: MaterialId,
    /// Current amount.
    pub amount: f64,
    /// Owning location.
    pub location: BatchLocation,
    /// Property values, keyed by declared batch-property id.
    pub properties: BTreeMap<BatchPropertyId, PropertyValue>,
}

/// State of one stage at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    /// Stage id.
    pub id: StageId,
    /// Owning producer.
    pub producer: ProducerId,
    /// Offer lock state.
    pub offered: bool,
    /// Staged batches, in id order.
    pub batches: Vec<BatchId>,
}

/// Immutable externalized state of a materials manager.
///
/// Produced by [`MaterialsManager::snapshot`] or assembled through
/// [`SnapshotBuilder`]; consumed by [`MaterialsManager::from_snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialsSnapshot {
    materials: Vec<MaterialId>,
    batch_property_declarations: Vec<BatchPropertyDeclaration>,
    producer_property_declarations: Vec<ProducerPropertyDeclaration>,
    producers: Vec<ProducerState>,
    batches: Vec<BatchState>,
    stages: Vec<StageState>,
    next_batch_id: u64,
    next_stage_id: u64,
}

impl MaterialsSnapshot {
    /// Starts a staging builder for assembling a snapshot by hand.
    #[must_use]
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// Materials in declaration order.
    #[must_use]
    pub fn materials(&self) -> &[MaterialId] {
        &self.materials
    }

    /// Batch property declarations in declaration order.
    #[must_use]
    pub fn batch_property_declarations(&self) -> &[BatchPropertyDeclaration] {
        &self.batch_property_declarations
    }

    /// Producer property declarations in declaration order.
    #[must_use]
    pub fn producer_property_declarations(&self) -> &[ProducerPropertyDeclaration] {
        &self.producer_property_declarations
    }

    /// Producers in id order.
    #[must_use]
    pub fn producers(&self) -> &[ProducerState] {
        &self.producers
    }

    /// Batches in id order.
    #[must_use]
    pub fn batches(&self) -> &[BatchState] {
        &self.batches
    }

    /// Stages in id order.
    #[must_use]
    pub fn stages(&self) -> &[StageState] {
        &self.stages
    }

    /// The batch id cursor: next id to be allocated.
    #[must_use]
    pub const fn next_batch_id(&self) -> u64 {
        self.next_batch_id
    }

    /// The stage id cursor: next id to be allocated.
    #[must_use]
    pub const fn next_stage_id(&self) -> u64 {
        self.next_stage_id
    }
}

/// Mutable staging structure for snapshot assembly.
///
/// Owned solely during construction; `build()` validates the staged state
/// once and produces the immutable aggregate.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    materials: Vec<MaterialId>,
    batch_property_declarations: Vec<BatchPropertyDeclaration>,
    producer_property_declarations: Vec<ProducerPropertyDeclaration>,
    producers: Vec<ProducerState>,
    batches: Vec<BatchState>,
    stages: Vec<StageState>,
    next_batch_id: u64,
    next_stage_id: u64,
}

impl SnapshotBuilder {
    /// Declares a material.
    #[must_use]
    pub fn material(mut self, material: MaterialId) -> Self {
        self.materials.push(material);
        self
    }

    /// Declares a batch property for a material.
    #[must_use]
    pub fn batch_property(
        mut self,
        material: MaterialId,
        property: BatchPropertyId,
        definition: PropertyDefinition,
    ) -> Self {
        self.batch_property_declarations.push(BatchPropertyDeclaration {
            material,
            property,
            definition,
        });
        self
    }

    /// Declares a producer property.
    #[must_use]
    pub fn producer_property(
        mut self,
        property: ProducerPropertyId,
        definition: PropertyDefinition,
    ) -> Self {
        self.producer_property_declarations
            .push(ProducerPropertyDeclaration {
                property,
                definition,
            });
        self
    }

    /// Stages a producer.
    #[must_use]
    pub fn producer(mut self, state: ProducerState) -> Self {
        self.producers.push(state);
        self
    }

    /// Stages a batch.
    #[must_use]
    pub fn batch(mut self, state: BatchState) -> Self {
        self.batches.push(state);
        self
    }

    /// Stages a stage.
    #[must_use]
    pub fn stage(mut self, state: StageState) -> Self {
        self.stages.push(state);
        self
    }

    /// Sets the id allocation cursors.
    #[must_use]
    pub fn cursors(mut self, next_batch_id: u64, next_stage_id: u64) -> Self {
        self.next_batch_id = next_batch_id;
        self.next_stage_id = next_stage_id;
        self
    }

    /// Validates the staged state and produces the immutable snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first [`SnapshotError`] found; the staged state is
    /// checked in full exactly as [`MaterialsManager::from_snapshot`]
    /// checks a deserialized value.
    pub fn build(mut self) -> Result<MaterialsSnapshot, SnapshotError> {
        self.producers.sort_by_key(|state| state.id);
        self.batches.sort_by_key(|state| state.id);
        self.stages.sort_by_key(|state| state.id);
        let snapshot = MaterialsSnapshot {
            materials: self.materials,
            batch_property_declarations: self.batch_property_declarations,
            producer_property_declarations: self.producer_property_declarations,
            producers: self.producers,
            batches: self.batches,
            stages: self.stages,
            next_batch_id: self.next_batch_id,
            next_stage_id: self.next_stage_id,
        };
        validate(&snapshot)?;
        Ok(snapshot)
    }
}

/// Full structural validation of a snapshot value.
///
/// Restores must never proceed on an inconsistent value; failure here is
/// programming-error-class and aborts initialization.
fn validate(snapshot: &MaterialsSnapshot) -> Result<(), SnapshotError> {
    let mut materials = BTreeSet::new();
    for &material in &snapshot.materials {
        if !materials.insert(material) {
            return Err(SnapshotError::DuplicateMaterial { id: material });
        }
    }

    let mut batch_defs: BTreeMap<(MaterialId, BatchPropertyId), &PropertyDefinition> =
        BTreeMap::new();
    for decl in &snapshot.batch_property_declarations {
        if !materials.contains(&decl.material) {
            return Err(SnapshotError::PropertyMaterialUnknown {
                material: decl.material,
                property: decl.property,
            });
        }
        if batch_defs
            .insert((decl.material, decl.property), &decl.definition)
            .is_some()
        {
            return Err(SnapshotError::DuplicateBatchProperty {
                material: decl.material,
                property: decl.property,
            });
        }
    }

    let mut producer_defs: BTreeMap<ProducerPropertyId, &PropertyDefinition> = BTreeMap::new();
    for decl in &snapshot.producer_property_declarations {
        if producer_defs.insert(decl.property, &decl.definition).is_some() {
            return Err(SnapshotError::DuplicateProducerProperty {
                property: decl.property,
            });
        }
    }

    let mut producers = BTreeSet::new();
    for state in &snapshot.producers {
        if !producers.insert(state.id) {
            return Err(SnapshotError::DuplicateProducer { id: state.id });
        }
        for (&property, value) in &state.properties {
            let def = producer_defs.get(&property).ok_or(
                SnapshotError::UndeclaredProducerProperty {
                    producer: state.id,
                    property,
                },
            )?;
            if !value.matches(def.kind()) {
                return Err(SnapshotError::PropertyKindMismatch {
                    property: property.raw(),
                    expected: def.kind(),
                    actual: value.kind(),
                });
            }
        }
        for (&property, def) in &producer_defs {
            if def.default_value().is_none() && !state.properties.contains_key(&property) {
                return Err(SnapshotError::MissingProducerProperty {
                    producer: state.id,
                    property,
                });
            }
        }
        for (&resource, &amount) in &state.resources {
            if !amount.is_finite() || amount < 0.0 {
                return Err(SnapshotError::InvalidResourceBalance {
                    producer: state.id,
                    resource,
                    amount,
                });
            }
        }
    }

    let mut stage_members: BTreeMap<StageId, BTreeSet<BatchId>> = BTreeMap::new();
    let mut stages = BTreeSet::new();
    for state in &snapshot.stages {
        if !stages.insert(state.id) {
            return Err(SnapshotError::DuplicateStage { id: state.id });
        }
        if !producers.contains(&state.producer) {
            return Err(SnapshotError::StageProducerUnknown {
                stage: state.id,
                producer: state.producer,
            });
        }
        stage_members.insert(state.id, state.batches.iter().copied().collect());
    }

    let mut batch_by_id: BTreeMap<BatchId, &BatchState> = BTreeMap::new();
    for state in &snapshot.batches {
        if batch_by_id.insert(state.id, state).is_some() {
            return Err(SnapshotError::DuplicateBatch { id: state.id });
        }
        if !materials.contains(&state.material) {
            return Err(SnapshotError::BatchMaterialUnknown {
                batch: state.id,
                material: state.material,
            });
        }
        if !state.amount.is_finite() || state.amount < 0.0 {
            return Err(SnapshotError::InvalidAmount {
                batch: state.id,
                amount: state.amount,
            });
        }
        match state.location {
            BatchLocation::Inventory(producer) => {
                if !producers.contains(&producer) {
                    return Err(SnapshotError::BatchProducerUnknown {
                        batch: state.id,
                        producer,
                    });
                }
            }
            BatchLocation::OnStage(stage) => {
                let members = stage_members.get(&stage).ok_or(
                    SnapshotError::BatchStageUnknown {
                        batch: state.id,
                        stage,
                    },
                )?;
                if !members.contains(&state.id) {
                    return Err(SnapshotError::LocationConflict { batch: state.id });
                }
            }
        }
        for (&property, value) in &state.properties {
            let def = batch_defs.get(&(state.material, property)).ok_or(
                SnapshotError::UndeclaredBatchProperty {
                    batch: state.id,
                    property,
                },
            )?;
            if !value.matches(def.kind()) {
                return Err(SnapshotError::PropertyKindMismatch {
                    property: property.raw(),
                    expected: def.kind(),
                    actual: value.kind(),
                });
            }
        }
        for ((material, property), def) in &batch_defs {
            if *material == state.material
                && def.default_value().is_none()
                && !state.properties.contains_key(property)
            {
                return Err(SnapshotError::MissingBatchProperty {
                    batch: state.id,
                    property: *property,
                });
            }
        }
    }

    // Every staged batch must exist and point back at its stage.
    for state in &snapshot.stages {
        for &batch in &state.batches {
            let member = batch_by_id.get(&batch).ok_or(SnapshotError::StagedBatchUnknown {
                stage: state.id,
                batch,
            })?;
            if member.location != BatchLocation::OnStage(state.id) {
                return Err(SnapshotError::LocationConflict { batch });
            }
        }
    }

    if let Some(highest) = snapshot.batches.iter().map(|b| b.id.raw()).max() {
        if snapshot.next_batch_id <= highest {
            return Err(SnapshotError::CursorRegression {
                kind: "batch",
                cursor: snapshot.next_batch_id,
                highest,
            });
        }
    }
    if let Some(highest) = snapshot.stages.iter().map(|s| s.id.raw()).max() {
        if snapshot.next_stage_id <= highest {
            return Err(SnapshotError::CursorRegression {
                kind: "stage",
                cursor: snapshot.next_stage_id,
                highest,
            });
        }
    }

    Ok(())
}

impl MaterialsManager {
    /// Externalizes the manager's full state as an immutable snapshot.
    ///
    /// Producer resource balances are read from the ledger collaborator at
    /// snapshot time; the halt point is a scheduling-level barrier, so no
    /// mutation is in flight here.
    #[must_use]
    pub fn snapshot(&self, ledger: &dyn ResourceLedger) -> MaterialsSnapshot {
        let registry = &self.registry;
        let snapshot = MaterialsSnapshot {
            materials: registry.materials.clone(),
            batch_property_declarations: registry
                .batch_property_defs
                .iter()
                .flat_map(|(&material, defs)| {
                    defs.iter().map(move |(property, definition)| {
                        BatchPropertyDeclaration {
                            material,
                            property: *property,
                            definition: definition.clone(),
                        }
                    })
                })
                .collect(),
            producer_property_declarations: registry
                .producer_property_defs
                .iter()
                .map(|(property, definition)| ProducerPropertyDeclaration {
                    property: *property,
                    definition: definition.clone(),
                })
                .collect(),
            producers: registry
                .producers
                .iter()
                .map(|(&id, record)| ProducerState {
                    id,
                    properties: record.properties.clone(),
                    resources: ledger.balances(id),
                })
                .collect(),
            batches: registry
                .batches
                .iter()
                .map(|(&id, record)| BatchState {
                    id,
                    material: record.material,
                    amount: record.amount,
                    location: record.location,
                    properties: record.properties.clone(),
                })
                .collect(),
            stages: registry
                .stages
                .iter()
                .map(|(&id, record)| StageState {
                    id,
                    producer: record.producer,
                    offered: record.offered,
                    batches: record.batches.iter().copied().collect(),
                })
                .collect(),
            next_batch_id: registry.batch_ids.cursor(),
            next_stage_id: registry.stage_ids.cursor(),
        };
        debug!(
            batches = snapshot.batches.len(),
            stages = snapshot.stages.len(),
            producers = snapshot.producers.len(),
            "snapshot built"
        );
        snapshot
    }

    /// Rebuilds a manager from a snapshot.
    ///
    /// Producer resource balances are seeded into the ledger collaborator;
    /// pass a ledger that does not already hold balances for these
    /// producers. Subsequent behavior, including future id allocation, is
    /// indistinguishable from the manager that produced the snapshot.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`SnapshotError`] if the value is internally
    /// inconsistent; initialization aborts and nothing is seeded.
    pub fn from_snapshot(
        snapshot: &MaterialsSnapshot,
        ledger: &mut dyn ResourceLedger,
    ) -> MateriaResult<Self> {
        validate(snapshot)?;

        let mut registry = Registry {
            materials: snapshot.materials.clone(),
            batch_ids: IdAllocator::starting_at(snapshot.next_batch_id),
            stage_ids: IdAllocator::starting_at(snapshot.next_stage_id),
            ..Registry::default()
        };

        for decl in &snapshot.batch_property_declarations {
            registry
                .batch_property_defs
                .entry(decl.material)
                .or_default()
                .push((decl.property, decl.definition.clone()));
        }
        for decl in &snapshot.producer_property_declarations {
            registry
                .producer_property_defs
                .push((decl.property, decl.definition.clone()));
        }

        for state in &snapshot.producers {
            registry.producers.insert(
                state.id,
                ProducerRecord {
                    properties: state.properties.clone(),
                    inventory: BTreeSet::new(),
                    stages: BTreeSet::new(),
                },
            );
            ledger.open_account(state.id, &state.resources)?;
        }

        for state in &snapshot.stages {
            registry.stages.insert(
                state.id,
                StageRecord {
                    producer: state.producer,
                    offered: state.offered,
                    batches: state.batches.iter().copied().collect(),
                },
            );
            if let Some(owner) = registry.producers.get_mut(&state.producer) {
                owner.stages.insert(state.id);
            }
        }

        for state in &snapshot.batches {
            registry.batches.insert(
                state.id,
                BatchRecord {
                    material: state.material,
                    amount: state.amount,
                    location: state.location,
                    properties: state.properties.clone(),
                },
            );
            if let BatchLocation::Inventory(producer) = state.location {
                if let Some(owner) = registry.producers.get_mut(&producer) {
                    owner.inventory.insert(state.id);
                }
            }
        }

        debug!(
            batches = snapshot.batches.len(),
            stages = snapshot.stages.len(),
            "manager restored from snapshot"
        );
        Ok(Self::from_registry(registry))
    }
}
