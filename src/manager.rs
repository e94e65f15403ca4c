//! The materials data manager and its mutation API.
//!
//! Every public operation validates its complete precondition set before
//! touching any state, then mutates, then publishes one or more notification
//! events in call order. There is no rollback mechanism anywhere: a failed
//! validation returns a [`ContractError`] and the manager is untouched.
//!
//! External state (resource balances, regions) is reached only through
//! collaborator handles passed at call time; the manager never caches a
//! handle across a checkpoint boundary.

use std::collections::BTreeMap;

use tracing::debug;

use crate::collab::{RegionRegistry, ResourceLedger};
use crate::error::{ContractError, MateriaResult};
use crate::events::{EventBus, EventBusConfig, EventStream, MaterialsEvent, RemovalCause};
use crate::ids::{
    BatchId, BatchPropertyId, MaterialId, ProducerId, ProducerPropertyId, RegionId, ResourceId,
    StageId,
};
use crate::properties::PropertyDefinition;
use crate::registry::{BatchLocation, BatchRecord, ProducerRecord, Registry};
use crate::value::PropertyValue;

/// Construction request for a new batch.
///
/// # Examples
///
/// ```
/// use materia::{BatchConstruction, BatchPropertyId, MaterialId, ProducerId, PropertyValue};
///
/// let construction = BatchConstruction::new(MaterialId::new(1), ProducerId::new(1), 10.0)
///     .with_property(BatchPropertyId::new(1), PropertyValue::Float(0.8));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConstruction {
    /// Material of the new batch.
    pub material: MaterialId,
    /// Producer whose inventory receives the batch.
    pub producer: ProducerId,
    /// Initial amount.
    pub amount: f64,
    /// Explicit initial property values; unspecified-but-defaulted
    /// properties are filled from their declarations.
    pub properties: BTreeMap<BatchPropertyId, PropertyValue>,
}

impl BatchConstruction {
    /// Starts a construction request with no explicit property values.
    #[must_use]
    pub const fn new(material: MaterialId, producer: ProducerId, amount: f64) -> Self {
        Self {
            material,
            producer,
            amount,
            properties: BTreeMap::new(),
        }
    }

    /// Adds an explicit initial property value.
    #[must_use]
    pub fn with_property(mut self, property: BatchPropertyId, value: PropertyValue) -> Self {
        self.properties.insert(property, value);
        self
    }
}

/// Checkpointable materials data manager.
///
/// Owns the entity registry and property store exclusively; all external
/// access goes through this API. The scheduling collaborator invokes these
/// operations at planned times; the manager itself never drives time.
#[derive(Debug)]
pub struct MaterialsManager {
    pub(crate) registry: Registry,
    events: EventBus,
}

impl MaterialsManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Creates an empty manager with explicit notification configuration.
    #[must_use]
    pub fn with_config(cfg: EventBusConfig) -> Self {
        Self {
            registry: Registry::default(),
            events: EventBus::new(cfg),
        }
    }

    pub(crate) fn from_registry(registry: Registry) -> Self {
        Self {
            registry,
            events: EventBus::default(),
        }
    }

    /// Registers a notification subscriber.
    pub fn subscribe(&mut self) -> EventStream {
        self.events.subscribe()
    }

    /// Notifications dropped because a subscriber stream was full.
    #[must_use]
    pub const fn dropped_events(&self) -> u64 {
        self.events.dropped_events()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registers a material. Registration is monotonic; materials are
    /// never removed.
    pub fn add_material(&mut self, material: MaterialId) -> MateriaResult<()> {
        if self.registry.has_material(material) {
            return Err(ContractError::DuplicateMaterial { id: material }.into());
        }
        self.registry.materials.push(material);
        debug!(%material, "material registered");
        self.events
            .publish(&MaterialsEvent::MaterialAdded { material });
        Ok(())
    }

    /// Registers a producer with its opening resource balances.
    ///
    /// Balances are delegated to the ledger collaborator. Every declared
    /// producer property must carry a default, otherwise the new producer
    /// would be created without a value for it.
    pub fn add_producer(
        &mut self,
        producer: ProducerId,
        opening_resources: &BTreeMap<ResourceId, f64>,
        ledger: &mut dyn ResourceLedger,
    ) -> MateriaResult<()> {
        if self.registry.producers.contains_key(&producer) {
            return Err(ContractError::DuplicateProducer { id: producer }.into());
        }
        for &amount in opening_resources.values() {
            check_amount(amount)?;
        }
        let mut properties = BTreeMap::new();
        for (property, def) in &self.registry.producer_property_defs {
            match def.default_value() {
                Some(value) => {
                    properties.insert(*property, value.clone());
                }
                None => {
                    return Err(ContractError::MissingProducerInitialValue {
                        producer,
                        property: *property,
                    }
                    .into())
                }
            }
        }

        ledger.open_account(producer, opening_resources)?;
        self.registry.producers.insert(
            producer,
            ProducerRecord {
                properties,
                ..ProducerRecord::default()
            },
        );
        debug!(%producer, "producer registered");
        self.events
            .publish(&MaterialsEvent::ProducerAdded { producer });
        Ok(())
    }

    /// Declares a batch property for a material.
    ///
    /// If the definition carries no default, every currently existing batch
    /// of the material must receive an explicit initial value; there is no
    /// implicit null state.
    pub fn define_batch_property(
        &mut self,
        material: MaterialId,
        property: BatchPropertyId,
        definition: PropertyDefinition,
        initial_values: &BTreeMap<BatchId, PropertyValue>,
    ) -> MateriaResult<()> {
        self.registry.require_material(material)?;
        if self.registry.batch_property_def(material, property).is_ok() {
            return Err(ContractError::DuplicateBatchProperty { material, property }.into());
        }
        for (&batch, value) in initial_values {
            let record = self.registry.batch(batch)?;
            if record.material != material {
                return Err(ContractError::PropertyMaterialMismatch { batch, material }.into());
            }
            definition.check_value(value)?;
        }
        if definition.default_value().is_none() {
            for (&batch, record) in &self.registry.batches {
                if record.material == material && !initial_values.contains_key(&batch) {
                    return Err(ContractError::MissingBatchInitialValue { batch, property }.into());
                }
            }
        }

        for (&batch, record) in &mut self.registry.batches {
            if record.material != material {
                continue;
            }
            let value = initial_values
                .get(&batch)
                .or_else(|| definition.default_value())
                .cloned();
            if let Some(value) = value {
                record.properties.insert(property, value);
            }
        }
        self.registry
            .batch_property_defs
            .entry(material)
            .or_default()
            .push((property, definition));
        self.events
            .publish(&MaterialsEvent::BatchPropertyDefined { material, property });
        Ok(())
    }

    /// Declares a producer property, with the same initial-value contract
    /// as [`define_batch_property`](Self::define_batch_property).
    pub fn define_producer_property(
        &mut self,
        property: ProducerPropertyId,
        definition: PropertyDefinition,
        initial_values: &BTreeMap<ProducerId, PropertyValue>,
    ) -> MateriaResult<()> {
        if self.registry.producer_property_def(property).is_ok() {
            return Err(ContractError::DuplicateProducerProperty { property }.into());
        }
        for (&producer, value) in initial_values {
            self.registry.producer(producer)?;
            definition.check_value(value)?;
        }
        if definition.default_value().is_none() {
            for &producer in self.registry.producers.keys() {
                if !initial_values.contains_key(&producer) {
                    return Err(
                        ContractError::MissingProducerInitialValue { producer, property }.into(),
                    );
                }
            }
        }

        for (&producer, record) in &mut self.registry.producers {
            let value = initial_values
                .get(&producer)
                .or_else(|| definition.default_value())
                .cloned();
            if let Some(value) = value {
                record.properties.insert(property, value);
            }
        }
        self.registry.producer_property_defs.push((property, definition));
        self.events
            .publish(&MaterialsEvent::ProducerPropertyDefined { property });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Batch and stage lifecycle
    // ------------------------------------------------------------------

    /// Constructs a batch in the producer's inventory.
    pub fn add_batch(&mut self, construction: BatchConstruction) -> MateriaResult<BatchId> {
        let BatchConstruction {
            material,
            producer,
            amount,
            properties,
        } = construction;

        check_amount(amount)?;
        self.registry.require_material(material)?;
        self.registry.producer(producer)?;
        let materialized = self.validate_batch_properties(material, &properties)?;

        let batch = self.registry.insert_batch(BatchRecord {
            material,
            amount,
            location: BatchLocation::Inventory(producer),
            properties: materialized,
        });
        debug!(%batch, %material, %producer, amount, "batch added");
        self.events.publish(&MaterialsEvent::BatchAdded {
            batch,
            material,
            producer,
            amount,
        });
        Ok(batch)
    }

    /// Creates an empty, non-offered stage under a producer.
    pub fn add_stage(&mut self, producer: ProducerId) -> MateriaResult<StageId> {
        self.registry.producer(producer)?;
        let stage = self.registry.insert_stage(producer);
        debug!(%stage, %producer, "stage added");
        self.events
            .publish(&MaterialsEvent::StageAdded { stage, producer });
        Ok(stage)
    }

    /// Destroys a batch.
    ///
    /// Fails if the batch sits on an offered stage; the offer is a
    /// transactional lock on staged content.
    pub fn remove_batch(&mut self, batch: BatchId) -> MateriaResult<()> {
        if self.registry.batch_on_offered_stage(batch)? {
            let record = self.registry.batch(batch)?;
            if let BatchLocation::OnStage(stage) = record.location {
                return Err(ContractError::OfferedStage { stage }.into());
            }
        }
        self.registry.remove_batch(batch);
        self.events.publish(&MaterialsEvent::BatchRemoved {
            batch,
            cause: RemovalCause::Direct,
        });
        Ok(())
    }

    /// Destroys a stage.
    ///
    /// With `destroy_batches = false`, staged batches return to the owning
    /// producer's inventory instead of being destroyed.
    pub fn remove_stage(&mut self, stage: StageId, destroy_batches: bool) -> MateriaResult<()> {
        let record = self.registry.stage(stage)?;
        if record.offered {
            return Err(ContractError::OfferedStage { stage }.into());
        }
        let producer = record.producer;
        let staged: Vec<BatchId> = record.batches.iter().copied().collect();

        for batch in staged {
            if destroy_batches {
                self.registry.remove_batch(batch);
                self.events.publish(&MaterialsEvent::BatchRemoved {
                    batch,
                    cause: RemovalCause::StageDestroyed,
                });
            } else {
                self.registry.detach_batch(batch);
                self.registry.attach_batch_to_inventory(batch, producer);
                self.events.publish(&MaterialsEvent::BatchMoved {
                    batch,
                    previous: BatchLocation::OnStage(stage),
                    current: BatchLocation::Inventory(producer),
                });
            }
        }
        self.registry.remove_stage(stage);
        self.events.publish(&MaterialsEvent::StageRemoved {
            stage,
            cause: RemovalCause::Direct,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------

    /// Moves a batch from its current location onto a stage of the same
    /// producer.
    pub fn move_batch_to_stage(&mut self, batch: BatchId, stage: StageId) -> MateriaResult<()> {
        let target = self.registry.stage(stage)?;
        if target.offered {
            return Err(ContractError::OfferedStage { stage }.into());
        }
        let record = self.registry.batch(batch)?;
        let previous = record.location;
        match previous {
            BatchLocation::OnStage(current) if current == stage => {
                return Err(ContractError::BatchAlreadyAtLocation { batch }.into());
            }
            BatchLocation::OnStage(current) => {
                if self.registry.stage(current)?.offered {
                    return Err(ContractError::OfferedStage { stage: current }.into());
                }
            }
            BatchLocation::Inventory(_) => {}
        }
        if self.registry.batch_owner(batch)? != self.registry.stage(stage)?.producer {
            return Err(ContractError::CrossProducerMove { batch, stage }.into());
        }

        self.registry.detach_batch(batch);
        self.registry.attach_batch_to_stage(batch, stage);
        self.events.publish(&MaterialsEvent::BatchMoved {
            batch,
            previous,
            current: BatchLocation::OnStage(stage),
        });
        Ok(())
    }

    /// Moves a staged batch back to its producer's inventory.
    pub fn move_batch_to_inventory(&mut self, batch: BatchId) -> MateriaResult<()> {
        let record = self.registry.batch(batch)?;
        let previous = record.location;
        let stage = match previous {
            BatchLocation::Inventory(_) => {
                return Err(ContractError::BatchAlreadyAtLocation { batch }.into());
            }
            BatchLocation::OnStage(stage) => stage,
        };
        let stage_record = self.registry.stage(stage)?;
        if stage_record.offered {
            return Err(ContractError::OfferedStage { stage }.into());
        }
        let producer = stage_record.producer;

        self.registry.detach_batch(batch);
        self.registry.attach_batch_to_inventory(batch, producer);
        self.events.publish(&MaterialsEvent::BatchMoved {
            batch,
            previous,
            current: BatchLocation::Inventory(producer),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Amounts and conversion
    // ------------------------------------------------------------------

    /// Transfers an amount of material between two batches of the same
    /// material. A batch whose amount reaches exactly zero is not deleted.
    pub fn transfer_between_batches(
        &mut self,
        source: BatchId,
        destination: BatchId,
        amount: f64,
    ) -> MateriaResult<()> {
        if source == destination {
            return Err(ContractError::SelfTransfer { batch: source }.into());
        }
        check_amount(amount)?;
        let source_record = self.registry.batch(source)?;
        let destination_record = self.registry.batch(destination)?;
        if source_record.material != destination_record.material {
            return Err(ContractError::MaterialMismatch {
                source_material: source_record.material,
                destination: destination_record.material,
            }
            .into());
        }
        if amount > source_record.amount {
            return Err(ContractError::InsufficientAmount {
                available: source_record.amount,
                requested: amount,
            }
            .into());
        }
        for batch in [source, destination] {
            if self.registry.batch_on_offered_stage(batch)? {
                if let BatchLocation::OnStage(stage) = self.registry.batch(batch)?.location {
                    return Err(ContractError::OfferedStage { stage }.into());
                }
            }
        }

        let source_previous = source_record.amount;
        let destination_previous = destination_record.amount;
        self.registry.batch_mut(source)?.amount -= amount;
        self.registry.batch_mut(destination)?.amount += amount;
        let source_current = self.registry.batch(source)?.amount;
        let destination_current = self.registry.batch(destination)?.amount;

        self.events.publish(&MaterialsEvent::BatchAmountChanged {
            batch: source,
            previous: source_previous,
            current: source_current,
        });
        self.events.publish(&MaterialsEvent::BatchAmountChanged {
            batch: destination,
            previous: destination_previous,
            current: destination_current,
        });
        Ok(())
    }

    /// Atomically consumes a stage and all its batches, producing one new
    /// inventory batch under the stage's producer.
    ///
    /// The new batch must satisfy the same validation as
    /// [`add_batch`](Self::add_batch); a validation failure leaves the stage
    /// and its batches untouched.
    pub fn convert_stage_to_batch(
        &mut self,
        stage: StageId,
        material: MaterialId,
        amount: f64,
        properties: &BTreeMap<BatchPropertyId, PropertyValue>,
    ) -> MateriaResult<BatchId> {
        let record = self.registry.stage(stage)?;
        if record.offered {
            return Err(ContractError::OfferedStage { stage }.into());
        }
        let producer = record.producer;
        check_amount(amount)?;
        self.registry.require_material(material)?;
        let materialized = self.validate_batch_properties(material, properties)?;

        let consumed: Vec<BatchId> = self.registry.stage(stage)?.batches.iter().copied().collect();
        for &batch in &consumed {
            self.registry.remove_batch(batch);
            self.events.publish(&MaterialsEvent::BatchRemoved {
                batch,
                cause: RemovalCause::Converted,
            });
        }
        self.registry.remove_stage(stage);
        self.events.publish(&MaterialsEvent::StageRemoved {
            stage,
            cause: RemovalCause::Converted,
        });

        let batch = self.registry.insert_batch(BatchRecord {
            material,
            amount,
            location: BatchLocation::Inventory(producer),
            properties: materialized,
        });
        debug!(%stage, %batch, consumed = consumed.len(), "stage converted to batch");
        self.events.publish(&MaterialsEvent::BatchAdded {
            batch,
            material,
            producer,
            amount,
        });
        self.events.publish(&MaterialsEvent::StageConvertedToBatch {
            stage,
            batch,
            consumed,
        });
        Ok(batch)
    }

    /// Atomically consumes a stage and all its batches, crediting an amount
    /// of a resource to the stage's producer via the ledger collaborator.
    pub fn convert_stage_to_resource(
        &mut self,
        stage: StageId,
        resource: ResourceId,
        amount: f64,
        ledger: &mut dyn ResourceLedger,
    ) -> MateriaResult<()> {
        let record = self.registry.stage(stage)?;
        if record.offered {
            return Err(ContractError::OfferedStage { stage }.into());
        }
        let producer = record.producer;
        check_amount(amount)?;

        // The ledger is the only fallible collaborator here; credit before
        // touching the registry so a ledger refusal leaves us unchanged.
        ledger.credit(producer, resource, amount)?;

        let consumed: Vec<BatchId> = self.registry.stage(stage)?.batches.iter().copied().collect();
        for &batch in &consumed {
            self.registry.remove_batch(batch);
            self.events.publish(&MaterialsEvent::BatchRemoved {
                batch,
                cause: RemovalCause::Converted,
            });
        }
        self.registry.remove_stage(stage);
        self.events.publish(&MaterialsEvent::StageRemoved {
            stage,
            cause: RemovalCause::Converted,
        });
        debug!(%stage, %resource, amount, consumed = consumed.len(), "stage converted to resource");
        self.events.publish(&MaterialsEvent::StageConvertedToResource {
            stage,
            resource,
            amount,
            consumed,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Offers
    // ------------------------------------------------------------------

    /// Toggles the offer lock on a stage. Setting the current state is a
    /// no-op, not an error, and publishes no event.
    pub fn set_stage_offer_state(&mut self, stage: StageId, offered: bool) -> MateriaResult<()> {
        let record = self.registry.stage_mut(stage)?;
        if record.offered == offered {
            return Ok(());
        }
        record.offered = offered;
        self.events
            .publish(&MaterialsEvent::StageOfferChanged { stage, offered });
        Ok(())
    }

    /// Reassigns an offered stage to a new producer without touching its
    /// batch contents. The stage remains offered until released.
    pub fn transfer_offered_stage(
        &mut self,
        stage: StageId,
        new_producer: ProducerId,
    ) -> MateriaResult<()> {
        let record = self.registry.stage(stage)?;
        if !record.offered {
            return Err(ContractError::StageNotOffered { stage }.into());
        }
        let previous = record.producer;
        self.registry.producer(new_producer)?;

        if let Some(owner) = self.registry.producers.get_mut(&previous) {
            owner.stages.remove(&stage);
        }
        if let Some(owner) = self.registry.producers.get_mut(&new_producer) {
            owner.stages.insert(stage);
        }
        self.registry.stage_mut(stage)?.producer = new_producer;
        self.events.publish(&MaterialsEvent::StageOwnerChanged {
            stage,
            previous,
            current: new_producer,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Moves an amount of a producer's resource to a region, through the
    /// ledger and region collaborators.
    pub fn transfer_resource_to_region(
        &mut self,
        producer: ProducerId,
        resource: ResourceId,
        region: RegionId,
        amount: f64,
        ledger: &mut dyn ResourceLedger,
        regions: &mut dyn RegionRegistry,
    ) -> MateriaResult<()> {
        self.registry.producer(producer)?;
        check_amount(amount)?;
        if !regions.contains(region) {
            return Err(ContractError::UnknownRegion { id: region }.into());
        }

        ledger.debit(producer, resource, amount)?;
        regions.credit(region, resource, amount)?;
        self.events
            .publish(&MaterialsEvent::ResourceTransferredToRegion {
                producer,
                resource,
                region,
                amount,
            });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Property setters
    // ------------------------------------------------------------------

    /// Sets a batch property value.
    ///
    /// Fails if the property is immutable, undeclared for the batch's
    /// material, the value kind mismatches, or the batch sits on an offered
    /// stage.
    pub fn set_batch_property_value(
        &mut self,
        batch: BatchId,
        property: BatchPropertyId,
        value: PropertyValue,
    ) -> MateriaResult<()> {
        let record = self.registry.batch(batch)?;
        let material = record.material;
        let def = self.registry.batch_property_def(material, property)?;
        if !def.is_mutable() {
            return Err(ContractError::ImmutableBatchProperty { material, property }.into());
        }
        def.check_value(&value)?;
        if self.registry.batch_on_offered_stage(batch)? {
            if let BatchLocation::OnStage(stage) = self.registry.batch(batch)?.location {
                return Err(ContractError::OfferedStage { stage }.into());
            }
        }

        let record = self.registry.batch_mut(batch)?;
        let previous = record
            .properties
            .insert(property, value.clone())
            .unwrap_or_else(|| value.clone());
        self.events.publish(&MaterialsEvent::BatchPropertyChanged {
            batch,
            property,
            previous,
            current: value,
        });
        Ok(())
    }

    /// Sets a producer property value.
    pub fn set_producer_property_value(
        &mut self,
        producer: ProducerId,
        property: ProducerPropertyId,
        value: PropertyValue,
    ) -> MateriaResult<()> {
        self.registry.producer(producer)?;
        let def = self.registry.producer_property_def(property)?;
        if !def.is_mutable() {
            return Err(ContractError::ImmutableProducerProperty { property }.into());
        }
        def.check_value(&value)?;

        let record = self.registry.producer_mut(producer)?;
        let previous = record
            .properties
            .insert(property, value.clone())
            .unwrap_or_else(|| value.clone());
        self.events.publish(&MaterialsEvent::ProducerPropertyChanged {
            producer,
            property,
            previous,
            current: value,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Registered materials in declaration order.
    #[must_use]
    pub fn material_ids(&self) -> Vec<MaterialId> {
        self.registry.materials.clone()
    }

    /// Registered producers in id order.
    #[must_use]
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.registry.producers.keys().copied().collect()
    }

    #[must_use]
    pub fn contains_material(&self, material: MaterialId) -> bool {
        self.registry.has_material(material)
    }

    #[must_use]
    pub fn contains_producer(&self, producer: ProducerId) -> bool {
        self.registry.producers.contains_key(&producer)
    }

    #[must_use]
    pub fn contains_batch(&self, batch: BatchId) -> bool {
        self.registry.batches.contains_key(&batch)
    }

    #[must_use]
    pub fn contains_stage(&self, stage: StageId) -> bool {
        self.registry.stages.contains_key(&stage)
    }

    pub fn batch_amount(&self, batch: BatchId) -> MateriaResult<f64> {
        Ok(self.registry.batch(batch)?.amount)
    }

    pub fn batch_material(&self, batch: BatchId) -> MateriaResult<MaterialId> {
        Ok(self.registry.batch(batch)?.material)
    }

    /// The producer owning a batch, through its location.
    pub fn batch_producer(&self, batch: BatchId) -> MateriaResult<ProducerId> {
        Ok(self.registry.batch_owner(batch)?)
    }

    /// The stage a batch is on, or `None` for inventory.
    pub fn batch_stage(&self, batch: BatchId) -> MateriaResult<Option<StageId>> {
        Ok(match self.registry.batch(batch)?.location {
            BatchLocation::Inventory(_) => None,
            BatchLocation::OnStage(stage) => Some(stage),
        })
    }

    pub fn batch_property_value(
        &self,
        batch: BatchId,
        property: BatchPropertyId,
    ) -> MateriaResult<PropertyValue> {
        let record = self.registry.batch(batch)?;
        record.properties.get(&property).cloned().ok_or_else(|| {
            ContractError::UnknownBatchProperty {
                material: record.material,
                property,
            }
            .into()
        })
    }

    /// Inventory batches of a producer, in id order.
    pub fn inventory_batches(&self, producer: ProducerId) -> MateriaResult<Vec<BatchId>> {
        Ok(self.registry.producer(producer)?.inventory.iter().copied().collect())
    }

    /// Inventory batches of a producer holding a given material.
    pub fn inventory_batches_of_material(
        &self,
        producer: ProducerId,
        material: MaterialId,
    ) -> MateriaResult<Vec<BatchId>> {
        self.registry.require_material(material)?;
        Ok(self
            .registry
            .producer(producer)?
            .inventory
            .iter()
            .copied()
            .filter(|id| {
                self.registry
                    .batches
                    .get(id)
                    .is_some_and(|record| record.material == material)
            })
            .collect())
    }

    /// Stages owned by a producer, in id order.
    pub fn stages(&self, producer: ProducerId) -> MateriaResult<Vec<StageId>> {
        Ok(self.registry.producer(producer)?.stages.iter().copied().collect())
    }

    /// Batches on a stage, in id order.
    pub fn stage_batches(&self, stage: StageId) -> MateriaResult<Vec<BatchId>> {
        Ok(self.registry.stage(stage)?.batches.iter().copied().collect())
    }

    pub fn stage_producer(&self, stage: StageId) -> MateriaResult<ProducerId> {
        Ok(self.registry.stage(stage)?.producer)
    }

    pub fn is_stage_offered(&self, stage: StageId) -> MateriaResult<bool> {
        Ok(self.registry.stage(stage)?.offered)
    }

    /// Offered stages of a producer, in id order.
    pub fn offered_stages(&self, producer: ProducerId) -> MateriaResult<Vec<StageId>> {
        Ok(self
            .registry
            .producer(producer)?
            .stages
            .iter()
            .copied()
            .filter(|id| self.registry.stages.get(id).is_some_and(|record| record.offered))
            .collect())
    }

    pub fn producer_property_value(
        &self,
        producer: ProducerId,
        property: ProducerPropertyId,
    ) -> MateriaResult<PropertyValue> {
        self.registry.producer_property_def(property)?;
        self.registry
            .producer(producer)?
            .properties
            .get(&property)
            .cloned()
            .ok_or_else(|| ContractError::UnknownProducerProperty { property }.into())
    }

    pub fn batch_property_definition(
        &self,
        material: MaterialId,
        property: BatchPropertyId,
    ) -> MateriaResult<PropertyDefinition> {
        Ok(self.registry.batch_property_def(material, property)?.clone())
    }

    pub fn producer_property_definition(
        &self,
        property: ProducerPropertyId,
    ) -> MateriaResult<PropertyDefinition> {
        Ok(self.registry.producer_property_def(property)?.clone())
    }

    /// Declared batch properties for a material, in declaration order.
    pub fn batch_property_ids(&self, material: MaterialId) -> MateriaResult<Vec<BatchPropertyId>> {
        self.registry.require_material(material)?;
        Ok(self
            .registry
            .batch_property_defs_for(material)
            .iter()
            .map(|(id, _)| *id)
            .collect())
    }

    /// Declared producer properties, in declaration order.
    #[must_use]
    pub fn producer_property_ids(&self) -> Vec<ProducerPropertyId> {
        self.registry
            .producer_property_defs
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// The next batch id that allocation would hand out.
    #[must_use]
    pub fn next_batch_id_cursor(&self) -> u64 {
        self.registry.batch_ids.cursor()
    }

    /// The next stage id that allocation would hand out.
    #[must_use]
    pub fn next_stage_id_cursor(&self) -> u64 {
        self.registry.stage_ids.cursor()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Validates supplied property values against the material's
    /// declarations and materializes the full value map (declared defaults
    /// overridden by supplied values).
    fn validate_batch_properties(
        &self,
        material: MaterialId,
        supplied: &BTreeMap<BatchPropertyId, PropertyValue>,
    ) -> Result<BTreeMap<BatchPropertyId, PropertyValue>, ContractError> {
        for (&property, value) in supplied {
            let def = self.registry.batch_property_def(material, property)?;
            def.check_value(value)?;
        }
        let mut materialized = BTreeMap::new();
        for (property, def) in self.registry.batch_property_defs_for(material) {
            match supplied.get(property).or_else(|| def.default_value()) {
                Some(value) => {
                    materialized.insert(*property, value.clone());
                }
                None => return Err(ContractError::UnsetBatchProperty { property: *property }),
            }
        }
        Ok(materialized)
    }
}

impl Default for MaterialsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn check_amount(amount: f64) -> Result<(), ContractError> {
    if !amount.is_finite() {
        return Err(ContractError::NonFiniteAmount { amount });
    }
    if amount < 0.0 {
        return Err(ContractError::NegativeAmount { amount });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::InMemoryRegionRegistry;
    use crate::collab::InMemoryResourceLedger;
    use crate::error::MateriaError;
    use crate::properties::PropertyDefinition;
    use crate::value::PropertyKind;

    const ORE: MaterialId = MaterialId::new(1);
    const SLAG: MaterialId = MaterialId::new(2);
    const SMELTER: ProducerId = ProducerId::new(10);
    const FOUNDRY: ProducerId = ProducerId::new(11);
    const PURITY: BatchPropertyId = BatchPropertyId::new(1);
    const GRADE: BatchPropertyId = BatchPropertyId::new(2);
    const CAPACITY: ProducerPropertyId = ProducerPropertyId::new(1);
    const IRON: ResourceId = ResourceId::new(1);

    fn contract(err: MateriaError) -> ContractError {
        match err {
            MateriaError::Contract(err) => err,
            MateriaError::Snapshot(err) => panic!("expected contract error, got {err}"),
        }
    }

    fn seeded() -> (MaterialsManager, InMemoryResourceLedger) {
        let mut manager = MaterialsManager::new();
        let mut ledger = InMemoryResourceLedger::new();
        manager.add_material(ORE).unwrap();
        manager.add_material(SLAG).unwrap();
        manager
            .add_producer(SMELTER, &BTreeMap::new(), &mut ledger)
            .unwrap();
        manager
            .add_producer(FOUNDRY, &BTreeMap::new(), &mut ledger)
            .unwrap();
        manager
            .define_batch_property(
                ORE,
                PURITY,
                PropertyDefinition::new(PropertyKind::Float, Some(PropertyValue::Float(0.5)), true)
                    .unwrap(),
                &BTreeMap::new(),
            )
            .unwrap();
        (manager, ledger)
    }

    fn ore_batch(manager: &mut MaterialsManager, amount: f64) -> BatchId {
        manager
            .add_batch(BatchConstruction::new(ORE, SMELTER, amount))
            .unwrap()
    }

    #[test]
    fn test_duplicate_registrations_fail() {
        let (mut manager, mut ledger) = seeded();
        assert!(matches!(
            contract(manager.add_material(ORE).unwrap_err()),
            ContractError::DuplicateMaterial { .. }
        ));
        assert!(matches!(
            contract(
                manager
                    .add_producer(SMELTER, &BTreeMap::new(), &mut ledger)
                    .unwrap_err()
            ),
            ContractError::DuplicateProducer { .. }
        ));
    }

    #[test]
    fn test_add_batch_fills_defaults_and_validates() {
        let (mut manager, _) = seeded();
        let batch = ore_batch(&mut manager, 3.0);
        assert_eq!(
            manager.batch_property_value(batch, PURITY).unwrap(),
            PropertyValue::Float(0.5)
        );
        assert_eq!(manager.batch_amount(batch).unwrap(), 3.0);
        assert_eq!(manager.batch_producer(batch).unwrap(), SMELTER);
        assert_eq!(manager.batch_stage(batch).unwrap(), None);

        let err = manager
            .add_batch(BatchConstruction::new(ORE, SMELTER, -1.0))
            .unwrap_err();
        assert!(matches!(contract(err), ContractError::NegativeAmount { .. }));

        let err = manager
            .add_batch(BatchConstruction::new(MaterialId::new(99), SMELTER, 1.0))
            .unwrap_err();
        assert!(matches!(contract(err), ContractError::UnknownMaterial { .. }));

        let err = manager
            .add_batch(
                BatchConstruction::new(ORE, SMELTER, 1.0)
                    .with_property(PURITY, PropertyValue::Int(3)),
            )
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::PropertyKindMismatch { .. }
        ));
    }

    #[test]
    fn test_add_batch_requires_non_defaulted_property() {
        let (mut manager, _) = seeded();
        manager
            .define_batch_property(
                ORE,
                GRADE,
                PropertyDefinition::new(PropertyKind::Int, None, false).unwrap(),
                &BTreeMap::new(),
            )
            .unwrap();

        let err = manager
            .add_batch(BatchConstruction::new(ORE, SMELTER, 1.0))
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::UnsetBatchProperty { property: GRADE }
        ));

        let batch = manager
            .add_batch(
                BatchConstruction::new(ORE, SMELTER, 1.0)
                    .with_property(GRADE, PropertyValue::Int(2)),
            )
            .unwrap();
        assert_eq!(
            manager.batch_property_value(batch, GRADE).unwrap(),
            PropertyValue::Int(2)
        );
    }

    #[test]
    fn test_define_property_backfills_existing_batches() {
        let (mut manager, _) = seeded();
        let existing = ore_batch(&mut manager, 2.0);

        // Without a default, the existing batch must receive a value.
        let err = manager
            .define_batch_property(
                ORE,
                GRADE,
                PropertyDefinition::new(PropertyKind::Int, None, true).unwrap(),
                &BTreeMap::new(),
            )
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::MissingBatchInitialValue { batch, .. } if batch == existing
        ));

        let mut initial = BTreeMap::new();
        initial.insert(existing, PropertyValue::Int(7));
        manager
            .define_batch_property(
                ORE,
                GRADE,
                PropertyDefinition::new(PropertyKind::Int, None, true).unwrap(),
                &initial,
            )
            .unwrap();
        assert_eq!(
            manager.batch_property_value(existing, GRADE).unwrap(),
            PropertyValue::Int(7)
        );
    }

    #[test]
    fn test_define_property_rejects_wrong_material_instance() {
        let (mut manager, _) = seeded();
        let slag = manager
            .add_batch(BatchConstruction::new(SLAG, SMELTER, 1.0))
            .unwrap();
        let mut initial = BTreeMap::new();
        initial.insert(slag, PropertyValue::Int(1));
        let err = manager
            .define_batch_property(
                ORE,
                GRADE,
                PropertyDefinition::new(PropertyKind::Int, None, true).unwrap(),
                &initial,
            )
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::PropertyMaterialMismatch { .. }
        ));
    }

    #[test]
    fn test_producer_property_lifecycle() {
        let (mut manager, _) = seeded();
        manager
            .define_producer_property(
                CAPACITY,
                PropertyDefinition::new(PropertyKind::Int, Some(PropertyValue::Int(100)), true)
                    .unwrap(),
                &BTreeMap::new(),
            )
            .unwrap();
        assert_eq!(
            manager.producer_property_value(SMELTER, CAPACITY).unwrap(),
            PropertyValue::Int(100)
        );

        manager
            .set_producer_property_value(SMELTER, CAPACITY, PropertyValue::Int(150))
            .unwrap();
        assert_eq!(
            manager.producer_property_value(SMELTER, CAPACITY).unwrap(),
            PropertyValue::Int(150)
        );
        assert_eq!(
            manager.producer_property_value(FOUNDRY, CAPACITY).unwrap(),
            PropertyValue::Int(100)
        );
    }

    #[test]
    fn test_add_producer_rejects_non_defaulted_property() {
        let (mut manager, mut ledger) = seeded();
        let mut initial = BTreeMap::new();
        initial.insert(SMELTER, PropertyValue::Bool(true));
        initial.insert(FOUNDRY, PropertyValue::Bool(false));
        manager
            .define_producer_property(
                ProducerPropertyId::new(9),
                PropertyDefinition::new(PropertyKind::Bool, None, true).unwrap(),
                &initial,
            )
            .unwrap();

        let err = manager
            .add_producer(ProducerId::new(12), &BTreeMap::new(), &mut ledger)
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::MissingProducerInitialValue { .. }
        ));
    }

    #[test]
    fn test_move_between_inventory_and_stage() {
        let (mut manager, _) = seeded();
        let batch = ore_batch(&mut manager, 1.0);
        let stage = manager.add_stage(SMELTER).unwrap();

        manager.move_batch_to_stage(batch, stage).unwrap();
        assert_eq!(manager.batch_stage(batch).unwrap(), Some(stage));
        assert_eq!(manager.stage_batches(stage).unwrap(), vec![batch]);
        assert!(manager.inventory_batches(SMELTER).unwrap().is_empty());

        let err = manager.move_batch_to_stage(batch, stage).unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::BatchAlreadyAtLocation { .. }
        ));

        manager.move_batch_to_inventory(batch).unwrap();
        assert_eq!(manager.batch_stage(batch).unwrap(), None);
        assert_eq!(manager.inventory_batches(SMELTER).unwrap(), vec![batch]);

        let err = manager.move_batch_to_inventory(batch).unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::BatchAlreadyAtLocation { .. }
        ));
    }

    #[test]
    fn test_cross_producer_move_fails() {
        let (mut manager, _) = seeded();
        let batch = ore_batch(&mut manager, 1.0);
        let stage = manager.add_stage(FOUNDRY).unwrap();
        let err = manager.move_batch_to_stage(batch, stage).unwrap_err();
        assert!(matches!(contract(err), ContractError::CrossProducerMove { .. }));
    }

    #[test]
    fn test_offer_locks_stage_content() {
        let (mut manager, _) = seeded();
        let batch = ore_batch(&mut manager, 1.0);
        let outside = ore_batch(&mut manager, 1.0);
        let stage = manager.add_stage(SMELTER).unwrap();
        manager.move_batch_to_stage(batch, stage).unwrap();

        manager.set_stage_offer_state(stage, true).unwrap();
        // Idempotent no-op.
        manager.set_stage_offer_state(stage, true).unwrap();

        let err = manager.move_batch_to_inventory(batch).unwrap_err();
        assert!(matches!(contract(err), ContractError::OfferedStage { .. }));

        let err = manager.move_batch_to_stage(outside, stage).unwrap_err();
        assert!(matches!(contract(err), ContractError::OfferedStage { .. }));

        let err = manager
            .set_batch_property_value(batch, PURITY, PropertyValue::Float(0.9))
            .unwrap_err();
        assert!(matches!(contract(err), ContractError::OfferedStage { .. }));

        let err = manager.remove_batch(batch).unwrap_err();
        assert!(matches!(contract(err), ContractError::OfferedStage { .. }));

        let err = manager.remove_stage(stage, true).unwrap_err();
        assert!(matches!(contract(err), ContractError::OfferedStage { .. }));

        manager.set_stage_offer_state(stage, false).unwrap();
        manager.move_batch_to_inventory(batch).unwrap();
    }

    #[test]
    fn test_transfer_between_batches_conserves_amount() {
        let (mut manager, _) = seeded();
        let source = ore_batch(&mut manager, 10.0);
        let destination = ore_batch(&mut manager, 2.0);

        manager
            .transfer_between_batches(source, destination, 3.5)
            .unwrap();
        assert_eq!(manager.batch_amount(source).unwrap(), 6.5);
        assert_eq!(manager.batch_amount(destination).unwrap(), 5.5);

        let err = manager
            .transfer_between_batches(source, destination, 100.0)
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::InsufficientAmount { .. }
        ));

        let err = manager
            .transfer_between_batches(source, source, 1.0)
            .unwrap_err();
        assert!(matches!(contract(err), ContractError::SelfTransfer { .. }));

        // Draining to exactly zero keeps the batch alive.
        manager
            .transfer_between_batches(source, destination, 6.5)
            .unwrap();
        assert_eq!(manager.batch_amount(source).unwrap(), 0.0);
        assert!(manager.contains_batch(source));
    }

    #[test]
    fn test_transfer_rejects_material_mismatch() {
        let (mut manager, _) = seeded();
        let ore = ore_batch(&mut manager, 1.0);
        let slag = manager
            .add_batch(BatchConstruction::new(SLAG, SMELTER, 1.0))
            .unwrap();
        let err = manager.transfer_between_batches(ore, slag, 0.5).unwrap_err();
        assert!(matches!(contract(err), ContractError::MaterialMismatch { .. }));
    }

    #[test]
    fn test_remove_stage_returns_batches_to_inventory() {
        let (mut manager, _) = seeded();
        let a = ore_batch(&mut manager, 1.0);
        let b = ore_batch(&mut manager, 2.0);
        let stage = manager.add_stage(SMELTER).unwrap();
        manager.move_batch_to_stage(a, stage).unwrap();
        manager.move_batch_to_stage(b, stage).unwrap();

        manager.remove_stage(stage, false).unwrap();
        assert!(!manager.contains_stage(stage));
        assert_eq!(manager.inventory_batches(SMELTER).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_remove_stage_destroying_batches() {
        let (mut manager, _) = seeded();
        let a = ore_batch(&mut manager, 1.0);
        let stage = manager.add_stage(SMELTER).unwrap();
        manager.move_batch_to_stage(a, stage).unwrap();

        manager.remove_stage(stage, true).unwrap();
        assert!(!manager.contains_stage(stage));
        assert!(!manager.contains_batch(a));
    }

    #[test]
    fn test_convert_stage_to_batch_is_atomic() {
        let (mut manager, _) = seeded();
        let mut staged = Vec::new();
        let stage = manager.add_stage(SMELTER).unwrap();
        for i in 0..5 {
            let batch = ore_batch(&mut manager, 8.0 + f64::from(i));
            manager.move_batch_to_stage(batch, stage).unwrap();
            staged.push(batch);
        }

        // Invalid target property: nothing changes.
        let mut bad = BTreeMap::new();
        bad.insert(PURITY, PropertyValue::Int(1));
        let err = manager
            .convert_stage_to_batch(stage, ORE, 40.0, &bad)
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::PropertyKindMismatch { .. }
        ));
        assert!(manager.contains_stage(stage));
        for &batch in &staged {
            assert!(manager.contains_batch(batch));
        }

        let new_batch = manager
            .convert_stage_to_batch(stage, ORE, 40.0, &BTreeMap::new())
            .unwrap();
        assert!(!manager.contains_stage(stage));
        for &batch in &staged {
            assert!(!manager.contains_batch(batch));
        }
        assert_eq!(manager.batch_amount(new_batch).unwrap(), 40.0);
        assert_eq!(manager.batch_stage(new_batch).unwrap(), None);
        assert_eq!(manager.batch_producer(new_batch).unwrap(), SMELTER);
    }

    #[test]
    fn test_convert_stage_to_resource_credits_ledger() {
        let (mut manager, mut ledger) = seeded();
        let batch = ore_batch(&mut manager, 4.0);
        let stage = manager.add_stage(SMELTER).unwrap();
        manager.move_batch_to_stage(batch, stage).unwrap();

        manager
            .convert_stage_to_resource(stage, IRON, 4.0, &mut ledger)
            .unwrap();
        assert!(!manager.contains_stage(stage));
        assert!(!manager.contains_batch(batch));
        assert_eq!(ledger.balance(SMELTER, IRON), 4.0);
    }

    #[test]
    fn test_transfer_offered_stage() {
        let (mut manager, _) = seeded();
        let batch = ore_batch(&mut manager, 1.0);
        let stage = manager.add_stage(SMELTER).unwrap();
        manager.move_batch_to_stage(batch, stage).unwrap();

        let err = manager.transfer_offered_stage(stage, FOUNDRY).unwrap_err();
        assert!(matches!(contract(err), ContractError::StageNotOffered { .. }));

        manager.set_stage_offer_state(stage, true).unwrap();
        manager.transfer_offered_stage(stage, FOUNDRY).unwrap();

        assert_eq!(manager.stage_producer(stage).unwrap(), FOUNDRY);
        assert_eq!(manager.batch_producer(batch).unwrap(), FOUNDRY);
        assert_eq!(manager.stage_batches(stage).unwrap(), vec![batch]);
        assert!(manager.is_stage_offered(stage).unwrap());
        assert_eq!(manager.stages(FOUNDRY).unwrap(), vec![stage]);
        assert!(manager.stages(SMELTER).unwrap().is_empty());
    }

    #[test]
    fn test_transfer_resource_to_region() {
        let (mut manager, mut ledger) = seeded();
        let mut regions = InMemoryRegionRegistry::new();
        let region = RegionId::new(5);
        regions.add_region(region);
        ledger.credit(SMELTER, IRON, 10.0).unwrap();

        manager
            .transfer_resource_to_region(SMELTER, IRON, region, 4.0, &mut ledger, &mut regions)
            .unwrap();
        assert_eq!(ledger.balance(SMELTER, IRON), 6.0);
        assert_eq!(regions.resource_level(region, IRON), 4.0);

        let err = manager
            .transfer_resource_to_region(SMELTER, IRON, region, 100.0, &mut ledger, &mut regions)
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::InsufficientResource { .. }
        ));
    }

    #[test]
    fn test_immutable_property_rejects_set() {
        let (mut manager, _) = seeded();
        manager
            .define_batch_property(
                ORE,
                GRADE,
                PropertyDefinition::new(PropertyKind::Int, Some(PropertyValue::Int(1)), false)
                    .unwrap(),
                &BTreeMap::new(),
            )
            .unwrap();
        let batch = ore_batch(&mut manager, 1.0);
        let err = manager
            .set_batch_property_value(batch, GRADE, PropertyValue::Int(2))
            .unwrap_err();
        assert!(matches!(
            contract(err),
            ContractError::ImmutableBatchProperty { .. }
        ));
    }

    #[test]
    fn test_events_are_fifo() {
        let (mut manager, _) = seeded();
        let stream = manager.subscribe();
        let batch = ore_batch(&mut manager, 1.0);
        let stage = manager.add_stage(SMELTER).unwrap();
        manager.move_batch_to_stage(batch, stage).unwrap();

        let events = stream.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], MaterialsEvent::BatchAdded { .. }));
        assert!(matches!(events[1], MaterialsEvent::StageAdded { .. }));
        assert!(matches!(events[2], MaterialsEvent::BatchMoved { .. }));
    }

    #[test]
    fn test_failed_operation_emits_no_event() {
        let (mut manager, _) = seeded();
        let stream = manager.subscribe();
        let _ = manager.add_material(ORE);
        assert!(stream.drain().is_empty());
    }
}
