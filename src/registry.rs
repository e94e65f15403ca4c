//! Authoritative entity graph.
//!
//! The registry owns producers, batches, stages, their membership relations,
//! the property declaration tables, and the id allocation cursors. All
//! collections are ordered maps so iteration order is a function of ids
//! alone, never of insertion history; the snapshot determinism contract
//! depends on this.
//!
//! The registry exposes lookup helpers and link-maintaining primitives; the
//! precondition checking that makes operations atomic lives in the manager.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ContractError;
use crate::ids::{
    BatchId, BatchPropertyId, IdAllocator, MaterialId, ProducerId, ProducerPropertyId, StageId,
};
use crate::properties::PropertyDefinition;
use crate::value::PropertyValue;

/// The single owning location of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchLocation {
    /// In a producer's inventory.
    Inventory(ProducerId),
    /// Staged on a stage.
    OnStage(StageId),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchRecord {
    pub material: MaterialId,
    pub amount: f64,
    pub location: BatchLocation,
    pub properties: BTreeMap<BatchPropertyId, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StageRecord {
    pub producer: ProducerId,
    pub offered: bool,
    pub batches: BTreeSet<BatchId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ProducerRecord {
    pub properties: BTreeMap<ProducerPropertyId, PropertyValue>,
    pub inventory: BTreeSet<BatchId>,
    pub stages: BTreeSet<StageId>,
}

/// Registry state: entities, memberships, declarations, cursors.
#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    /// Materials in declaration order.
    pub materials: Vec<MaterialId>,
    /// Batch property declarations per material, in declaration order.
    pub batch_property_defs: BTreeMap<MaterialId, Vec<(BatchPropertyId, PropertyDefinition)>>,
    /// Producer property declarations in declaration order.
    pub producer_property_defs: Vec<(ProducerPropertyId, PropertyDefinition)>,
    pub producers: BTreeMap<ProducerId, ProducerRecord>,
    pub batches: BTreeMap<BatchId, BatchRecord>,
    pub stages: BTreeMap<StageId, StageRecord>,
    pub batch_ids: IdAllocator<BatchId>,
    pub stage_ids: IdAllocator<StageId>,
}

impl Registry {
    pub fn has_material(&self, id: MaterialId) -> bool {
        self.materials.contains(&id)
    }

    pub fn require_material(&self, id: MaterialId) -> Result<(), ContractError> {
        if self.has_material(id) {
            Ok(())
        } else {
            Err(ContractError::UnknownMaterial { id })
        }
    }

    pub fn producer(&self, id: ProducerId) -> Result<&ProducerRecord, ContractError> {
        self.producers
            .get(&id)
            .ok_or(ContractError::UnknownProducer { id })
    }

    pub fn producer_mut(&mut self, id: ProducerId) -> Result<&mut ProducerRecord, ContractError> {
        self.producers
            .get_mut(&id)
            .ok_or(ContractError::UnknownProducer { id })
    }

    pub fn batch(&self, id: BatchId) -> Result<&BatchRecord, ContractError> {
        self.batches.get(&id).ok_or(ContractError::UnknownBatch { id })
    }

    pub fn batch_mut(&mut self, id: BatchId) -> Result<&mut BatchRecord, ContractError> {
        self.batches
            .get_mut(&id)
            .ok_or(ContractError::UnknownBatch { id })
    }

    pub fn stage(&self, id: StageId) -> Result<&StageRecord, ContractError> {
        self.stages.get(&id).ok_or(ContractError::UnknownStage { id })
    }

    pub fn stage_mut(&mut self, id: StageId) -> Result<&mut StageRecord, ContractError> {
        self.stages
            .get_mut(&id)
            .ok_or(ContractError::UnknownStage { id })
    }

    /// Looks up a batch property declaration for a material.
    pub fn batch_property_def(
        &self,
        material: MaterialId,
        property: BatchPropertyId,
    ) -> Result<&PropertyDefinition, ContractError> {
        self.batch_property_defs
            .get(&material)
            .and_then(|defs| {
                defs.iter()
                    .find(|(id, _)| *id == property)
                    .map(|(_, def)| def)
            })
            .ok_or(ContractError::UnknownBatchProperty { material, property })
    }

    /// Declarations for a material, in declaration order. Empty if none.
    pub fn batch_property_defs_for(
        &self,
        material: MaterialId,
    ) -> &[(BatchPropertyId, PropertyDefinition)] {
        self.batch_property_defs
            .get(&material)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn producer_property_def(
        &self,
        property: ProducerPropertyId,
    ) -> Result<&PropertyDefinition, ContractError> {
        self.producer_property_defs
            .iter()
            .find(|(id, _)| *id == property)
            .map(|(_, def)| def)
            .ok_or(ContractError::UnknownProducerProperty { property })
    }

    /// Inserts a batch record under a fresh id, linking it into its
    /// location. The record's location must name a registered owner.
    pub fn insert_batch(&mut self, record: BatchRecord) -> BatchId {
        let id = self.batch_ids.allocate();
        match record.location {
            BatchLocation::Inventory(producer) => {
                if let Some(owner) = self.producers.get_mut(&producer) {
                    owner.inventory.insert(id);
                }
            }
            BatchLocation::OnStage(stage) => {
                if let Some(stage) = self.stages.get_mut(&stage) {
                    stage.batches.insert(id);
                }
            }
        }
        self.batches.insert(id, record);
        id
    }

    /// Inserts an empty, non-offered stage under a producer.
    pub fn insert_stage(&mut self, producer: ProducerId) -> StageId {
        let id = self.stage_ids.allocate();
        self.stages.insert(
            id,
            StageRecord {
                producer,
                offered: false,
                batches: BTreeSet::new(),
            },
        );
        if let Some(owner) = self.producers.get_mut(&producer) {
            owner.stages.insert(id);
        }
        id
    }

    /// Unlinks a batch from its current location. The batch stays in the
    /// batch table; callers either relink it or remove it.
    pub fn detach_batch(&mut self, id: BatchId) {
        let Some(record) = self.batches.get(&id) else {
            return;
        };
        match record.location {
            BatchLocation::Inventory(producer) => {
                if let Some(owner) = self.producers.get_mut(&producer) {
                    owner.inventory.remove(&id);
                }
            }
            BatchLocation::OnStage(stage) => {
                if let Some(stage) = self.stages.get_mut(&stage) {
                    stage.batches.remove(&id);
                }
            }
        }
    }

    /// Links a batch into a producer's inventory and records the location.
    pub fn attach_batch_to_inventory(&mut self, id: BatchId, producer: ProducerId) {
        if let Some(owner) = self.producers.get_mut(&producer) {
            owner.inventory.insert(id);
        }
        if let Some(record) = self.batches.get_mut(&id) {
            record.location = BatchLocation::Inventory(producer);
        }
    }

    /// Links a batch onto a stage and records the location.
    pub fn attach_batch_to_stage(&mut self, id: BatchId, stage: StageId) {
        if let Some(record) = self.stages.get_mut(&stage) {
            record.batches.insert(id);
        }
        if let Some(record) = self.batches.get_mut(&id) {
            record.location = BatchLocation::OnStage(stage);
        }
    }

    /// Removes a batch entirely, unlinking its location first.
    pub fn remove_batch(&mut self, id: BatchId) -> Option<BatchRecord> {
        self.detach_batch(id);
        self.batches.remove(&id)
    }

    /// Removes a stage record and its owner link. Staged batches must have
    /// been detached or removed by the caller beforehand.
    pub fn remove_stage(&mut self, id: StageId) -> Option<StageRecord> {
        let record = self.stages.remove(&id)?;
        if let Some(owner) = self.producers.get_mut(&record.producer) {
            owner.stages.remove(&id);
        }
        Some(record)
    }

    /// The producer that owns a batch, through its location.
    pub fn batch_owner(&self, id: BatchId) -> Result<ProducerId, ContractError> {
        let record = self.batch(id)?;
        match record.location {
            BatchLocation::Inventory(producer) => Ok(producer),
            BatchLocation::OnStage(stage) => Ok(self.stage(stage)?.producer),
        }
    }

    /// True if the batch currently sits on an offered stage.
    pub fn batch_on_offered_stage(&self, id: BatchId) -> Result<bool, ContractError> {
        let record = self.batch(id)?;
        match record.location {
            BatchLocation::Inventory(_) => Ok(false),
            BatchLocation::OnStage(stage) => Ok(self.stage(stage)?.offered),
        }
    }
}
