//! Canonical diagnostic rendering.
//!
//! The canonical dump is the mechanism by which run continuity is verified
//! externally: two managers with equal dumps are observably identical. All
//! sections sort by identifier before rendering, never by insertion or
//! declaration order, so the dump is a pure function of state.

use std::fmt::Write as _;

use crate::collab::ResourceLedger;
use crate::manager::MaterialsManager;
use crate::registry::BatchLocation;

/// Renders the full registry state as a canonical string, sorted by entity
/// kind then identifier.
#[must_use]
pub fn canonical(manager: &MaterialsManager, ledger: &dyn ResourceLedger) -> String {
    let registry = &manager.registry;
    let mut out = String::new();

    out.push_str("materials\n");
    let mut materials = registry.materials.clone();
    materials.sort_unstable();
    for material in &materials {
        let _ = writeln!(out, "  material {material}");
        let mut defs: Vec<_> = registry.batch_property_defs_for(*material).to_vec();
        defs.sort_by_key(|(property, _)| *property);
        for (property, def) in defs {
            let _ = writeln!(
                out,
                "    property {property} kind={} default={} mutable={}",
                def.kind(),
                def.default_value()
                    .map_or_else(|| "none".to_string(), |v| v.to_string()),
                def.is_mutable(),
            );
        }
    }

    out.push_str("producer properties\n");
    let mut producer_defs = registry.producer_property_defs.clone();
    producer_defs.sort_by_key(|(property, _)| *property);
    for (property, def) in producer_defs {
        let _ = writeln!(
            out,
            "  property {property} kind={} default={} mutable={}",
            def.kind(),
            def.default_value()
                .map_or_else(|| "none".to_string(), |v| v.to_string()),
            def.is_mutable(),
        );
    }

    out.push_str("producers\n");
    for (producer, record) in &registry.producers {
        let _ = writeln!(out, "  producer {producer}");
        for (property, value) in &record.properties {
            let _ = writeln!(out, "    property {property} = {value}");
        }
        for (resource, amount) in ledger.balances(*producer) {
            let _ = writeln!(out, "    resource {resource} = {amount:?}");
        }
    }

    out.push_str("batches\n");
    for (batch, record) in &registry.batches {
        let location = match record.location {
            BatchLocation::Inventory(producer) => format!("inventory({producer})"),
            BatchLocation::OnStage(stage) => format!("stage({stage})"),
        };
        let _ = writeln!(
            out,
            "  batch {batch} material={} amount={:?} location={location}",
            record.material, record.amount,
        );
        for (property, value) in &record.properties {
            let _ = writeln!(out, "    property {property} = {value}");
        }
    }

    out.push_str("stages\n");
    for (stage, record) in &registry.stages {
        let batches: Vec<String> = record.batches.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "  stage {stage} producer={} offered={} batches=[{}]",
            record.producer,
            record.offered,
            batches.join(", "),
        );
    }

    out.push_str("cursors\n");
    let _ = writeln!(out, "  next batch id {}", registry.batch_ids.cursor());
    let _ = writeln!(out, "  next stage id {}", registry.stage_ids.cursor());

    out
}

/// Stable fingerprint of the canonical rendering.
///
/// Equal fingerprints across independent runs are the continuity check.
#[must_use]
pub fn fingerprint(manager: &MaterialsManager, ledger: &dyn ResourceLedger) -> blake3::Hash {
    blake3::hash(canonical(manager, ledger).as_bytes())
}
