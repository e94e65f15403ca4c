//! Observable mutation notifications.
//!
//! Every mutating operation emits one event describing the before/after
//! state. Delivery order is call order. Events are a side channel: a full or
//! disconnected subscriber stream never fails or rolls back the mutation,
//! the event is counted as dropped instead.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::ids::{
    BatchId, BatchPropertyId, MaterialId, ProducerId, ProducerPropertyId, RegionId, ResourceId,
    StageId,
};
use crate::registry::BatchLocation;
use crate::value::PropertyValue;

/// Why a batch left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalCause {
    /// Explicit `remove_batch` / `remove_stage` call.
    Direct,
    /// Destroyed together with its stage by `remove_stage(_, true)`.
    StageDestroyed,
    /// Consumed by a stage conversion.
    Converted,
}

/// Notification describing one observable mutation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialsEvent {
    MaterialAdded {
        material: MaterialId,
    },
    ProducerAdded {
        producer: ProducerId,
    },
    BatchPropertyDefined {
        material: MaterialId,
        property: BatchPropertyId,
    },
    ProducerPropertyDefined {
        property: ProducerPropertyId,
    },
    BatchAdded {
        batch: BatchId,
        material: MaterialId,
        producer: ProducerId,
        amount: f64,
    },
    BatchRemoved {
        batch: BatchId,
        cause: RemovalCause,
    },
    BatchAmountChanged {
        batch: BatchId,
        previous: f64,
        current: f64,
    },
    BatchPropertyChanged {
        batch: BatchId,
        property: BatchPropertyId,
        previous: PropertyValue,
        current: PropertyValue,
    },
    BatchMoved {
        batch: BatchId,
        previous: BatchLocation,
        current: BatchLocation,
    },
    StageAdded {
        stage: StageId,
        producer: ProducerId,
    },
    StageRemoved {
        stage: StageId,
        cause: RemovalCause,
    },
    StageOfferChanged {
        stage: StageId,
        offered: bool,
    },
    StageOwnerChanged {
        stage: StageId,
        previous: ProducerId,
        current: ProducerId,
    },
    StageConvertedToBatch {
        stage: StageId,
        batch: BatchId,
        consumed: Vec<BatchId>,
    },
    StageConvertedToResource {
        stage: StageId,
        resource: ResourceId,
        amount: f64,
        consumed: Vec<BatchId>,
    },
    ProducerPropertyChanged {
        producer: ProducerId,
        property: ProducerPropertyId,
        previous: PropertyValue,
        current: PropertyValue,
    },
    ResourceTransferredToRegion {
        producer: ProducerId,
        resource: ResourceId,
        region: RegionId,
        amount: f64,
    },
}

/// Configuration for notification streams.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Per-subscriber stream buffer capacity.
    pub stream_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 1024,
        }
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<MaterialsEvent>,
}

impl EventStream {
    /// Next pending event, if any. Never blocks.
    pub fn try_next(&self) -> Option<MaterialsEvent> {
        self.rx.try_recv().ok()
    }

    /// Drains all pending events in delivery order.
    pub fn drain(&self) -> Vec<MaterialsEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Fan-out of mutation notifications to subscriber streams.
///
/// Dispatch is synchronous and FIFO; `publish` runs after the mutation has
/// fully committed, so subscribers never observe partial state.
#[derive(Debug)]
pub struct EventBus {
    cfg: EventBusConfig,
    streams: Vec<Sender<MaterialsEvent>>,
    dropped: u64,
}

impl EventBus {
    /// Creates a bus with the given configuration.
    #[must_use]
    pub fn new(cfg: EventBusConfig) -> Self {
        Self {
            cfg,
            streams: Vec::new(),
            dropped: 0,
        }
    }

    /// Registers a new subscriber and returns its stream.
    pub fn subscribe(&mut self) -> EventStream {
        let (tx, rx) = bounded(self.cfg.stream_capacity.max(1));
        self.streams.push(tx);
        EventStream { rx }
    }

    /// Delivers an event to every live subscriber.
    pub fn publish(&mut self, event: &MaterialsEvent) {
        let mut dropped = 0u64;
        self.streams.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        self.dropped += dropped;
    }

    /// Events dropped because a subscriber stream was full.
    #[must_use]
    pub const fn dropped_events(&self) -> u64 {
        self.dropped
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.streams.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}
