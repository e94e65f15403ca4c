//! Snapshot round-trip end-to-end tests over a populated registry.

use std::collections::BTreeMap;

use materia::{
    render, BatchConstruction, BatchPropertyId, InMemoryResourceLedger, MaterialId,
    MaterialsManager, MateriaError, ProducerId, ProducerPropertyId, PropertyDefinition,
    PropertyKind, PropertyValue, ResourceId, SnapshotError,
};

const MATERIALS: [MaterialId; 3] = [MaterialId::new(1), MaterialId::new(2), MaterialId::new(3)];
const PRODUCERS: [ProducerId; 3] = [ProducerId::new(1), ProducerId::new(2), ProducerId::new(3)];

/// Builds a registry with 3 producers, 50 batches, 25 stages, and mixed
/// property definitions, with a third of the batches staged.
fn populated() -> (MaterialsManager, InMemoryResourceLedger) {
    let mut manager = MaterialsManager::new();
    let mut ledger = InMemoryResourceLedger::new();

    for material in MATERIALS {
        manager.add_material(material).unwrap();
    }
    for (i, producer) in PRODUCERS.into_iter().enumerate() {
        let mut opening = BTreeMap::new();
        opening.insert(ResourceId::new(1), 10.0 * (i as f64 + 1.0));
        manager.add_producer(producer, &opening, &mut ledger).unwrap();
    }

    manager
        .define_producer_property(
            ProducerPropertyId::new(1),
            PropertyDefinition::new(PropertyKind::Int, Some(PropertyValue::Int(8)), true).unwrap(),
            &BTreeMap::new(),
        )
        .unwrap();
    manager
        .define_batch_property(
            MATERIALS[0],
            BatchPropertyId::new(1),
            PropertyDefinition::new(PropertyKind::Float, Some(PropertyValue::Float(0.1)), true)
                .unwrap(),
            &BTreeMap::new(),
        )
        .unwrap();
    manager
        .define_batch_property(
            MATERIALS[1],
            BatchPropertyId::new(2),
            PropertyDefinition::new(
                PropertyKind::String,
                Some(PropertyValue::String("raw".into())),
                false,
            )
            .unwrap(),
            &BTreeMap::new(),
        )
        .unwrap();

    let mut batches = Vec::new();
    for i in 0..50u64 {
        let material = MATERIALS[(i % 3) as usize];
        let producer = PRODUCERS[(i % 3) as usize];
        let batch = manager
            .add_batch(BatchConstruction::new(material, producer, i as f64))
            .unwrap();
        batches.push((batch, producer));
    }

    let mut stages = Vec::new();
    for i in 0..25u64 {
        let producer = PRODUCERS[(i % 3) as usize];
        stages.push((manager.add_stage(producer).unwrap(), producer));
    }

    // Stage every third batch on a same-producer stage; offer a few stages.
    for (i, &(batch, producer)) in batches.iter().enumerate() {
        if i % 3 != 0 {
            continue;
        }
        let &(stage, _) = stages
            .iter()
            .find(|(_, owner)| *owner == producer)
            .unwrap();
        manager.move_batch_to_stage(batch, stage).unwrap();
    }
    for &(stage, _) in stages.iter().skip(20) {
        manager.set_stage_offer_state(stage, true).unwrap();
    }

    (manager, ledger)
}

#[test]
fn round_trip_preserves_rendering_and_cursors() {
    let (manager, ledger) = populated();
    let before = render::canonical(&manager, &ledger);
    let snapshot = manager.snapshot(&ledger);

    let mut fresh_ledger = InMemoryResourceLedger::new();
    let restored = MaterialsManager::from_snapshot(&snapshot, &mut fresh_ledger).unwrap();

    assert_eq!(render::canonical(&restored, &fresh_ledger), before);
    assert_eq!(
        render::fingerprint(&restored, &fresh_ledger),
        render::fingerprint(&manager, &ledger)
    );

    // Next allocated ids are strictly greater than any id present.
    let highest_batch = snapshot.batches().iter().map(|b| b.id).max().unwrap();
    assert!(restored.next_batch_id_cursor() > highest_batch.raw());
    let highest_stage = snapshot.stages().iter().map(|s| s.id).max().unwrap();
    assert!(restored.next_stage_id_cursor() > highest_stage.raw());
}

#[test]
fn snapshot_is_value_semantics() {
    let (mut manager, ledger) = populated();
    let snapshot = manager.snapshot(&ledger);
    let copy = snapshot.clone();

    // Mutating the live manager does not reach into the snapshot.
    manager
        .add_batch(BatchConstruction::new(MATERIALS[0], PRODUCERS[0], 1.0))
        .unwrap();
    assert_eq!(snapshot, copy);
    assert_eq!(snapshot.batches().len(), 50);
}

#[test]
fn snapshot_survives_serialization() {
    let (manager, ledger) = populated();
    let snapshot = manager.snapshot(&ledger);

    let json = serde_json::to_string(&snapshot).unwrap();
    let decoded: materia::MaterialsSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, snapshot);

    let mut fresh_ledger = InMemoryResourceLedger::new();
    let restored = MaterialsManager::from_snapshot(&decoded, &mut fresh_ledger).unwrap();
    assert_eq!(
        render::canonical(&restored, &fresh_ledger),
        render::canonical(&manager, &ledger)
    );
}

#[test]
fn restore_rejects_tampered_cursor() {
    let (manager, ledger) = populated();
    let snapshot = manager.snapshot(&ledger);

    // Corrupt the cursor through the serialized form.
    let mut value: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
    value["next_batch_id"] = serde_json::json!(3);
    let tampered: materia::MaterialsSnapshot = serde_json::from_value(value).unwrap();

    let mut fresh_ledger = InMemoryResourceLedger::new();
    let err = MaterialsManager::from_snapshot(&tampered, &mut fresh_ledger).unwrap_err();
    assert!(matches!(
        err,
        MateriaError::Snapshot(SnapshotError::CursorRegression { kind: "batch", .. })
    ));
}

#[test]
fn restore_rejects_dangling_references() {
    let (manager, ledger) = populated();
    let snapshot = manager.snapshot(&ledger);

    let mut value: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
    value["batches"][0]["material"] = serde_json::json!(99);
    let tampered: materia::MaterialsSnapshot = serde_json::from_value(value).unwrap();

    let mut fresh_ledger = InMemoryResourceLedger::new();
    let err = MaterialsManager::from_snapshot(&tampered, &mut fresh_ledger).unwrap_err();
    assert!(matches!(
        err,
        MateriaError::Snapshot(SnapshotError::BatchMaterialUnknown { .. })
    ));
}

#[test]
fn restored_manager_enforces_the_same_contracts() {
    let (manager, ledger) = populated();
    let snapshot = manager.snapshot(&ledger);
    let mut fresh_ledger = InMemoryResourceLedger::new();
    let mut restored = MaterialsManager::from_snapshot(&snapshot, &mut fresh_ledger).unwrap();

    // Offered stages restored offered: their content is still locked.
    let offered = restored.offered_stages(PRODUCERS[2]).unwrap();
    assert!(!offered.is_empty());

    // Immutable property still immutable after restore.
    let batch = restored
        .inventory_batches_of_material(PRODUCERS[1], MATERIALS[1])
        .unwrap()[0];
    let err = restored
        .set_batch_property_value(batch, BatchPropertyId::new(2), PropertyValue::String("x".into()))
        .unwrap_err();
    assert!(matches!(
        err,
        MateriaError::Contract(materia::ContractError::ImmutableBatchProperty { .. })
    ));
}

#[test]
fn empty_manager_round_trips() {
    let manager = MaterialsManager::new();
    let ledger = InMemoryResourceLedger::new();
    let snapshot = manager.snapshot(&ledger);
    assert!(snapshot.materials().is_empty());
    assert_eq!(snapshot.next_batch_id(), 0);

    let mut fresh_ledger = InMemoryResourceLedger::new();
    let restored = MaterialsManager::from_snapshot(&snapshot, &mut fresh_ledger).unwrap();
    assert_eq!(
        render::canonical(&restored, &fresh_ledger),
        render::canonical(&manager, &ledger)
    );
}
