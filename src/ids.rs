//! Typed identifiers and monotonic allocation.
//!
//! Every entity kind in the manager is addressed by its own opaque integer
//! id type, so identifiers of different kinds cannot be mixed up at compile
//! time. Materials and producers carry caller-chosen ids validated through
//! explicit registration; batches and stages receive ids from a monotonic
//! allocator whose cursor is part of the snapshot. Ids are never reused
//! within a run and never recycled across a checkpoint boundary.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw identifier value.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type! {
    /// Caller-chosen identifier for a category of material.
    ///
    /// Valid only once registered via `add_material`; registration is
    /// monotonic and materials are never removed.
    MaterialId
}

id_type! {
    /// Caller-chosen identifier for a materials producer.
    ProducerId
}

id_type! {
    /// Allocator-assigned identifier for a batch of material.
    BatchId
}

id_type! {
    /// Allocator-assigned identifier for a stage.
    StageId
}

id_type! {
    /// Identifier for a batch property, scoped to a [`MaterialId`].
    BatchPropertyId
}

id_type! {
    /// Identifier for a producer property.
    ProducerPropertyId
}

id_type! {
    /// Identifier for a resource kind, owned by the resources collaborator.
    ResourceId
}

id_type! {
    /// Identifier for a region, owned by the regions collaborator.
    RegionId
}

/// Monotonic id allocator for one entity kind.
///
/// The cursor only ever moves forward. Snapshots capture the cursor value so
/// a restored manager continues allocation exactly where the original left
/// off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator<I> {
    next: u64,
    _kind: PhantomData<I>,
}

impl<I: From<u64>> IdAllocator<I> {
    /// Creates an allocator whose first allocated id is zero.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates an allocator resuming from a snapshot cursor.
    #[must_use]
    pub const fn starting_at(next: u64) -> Self {
        Self {
            next,
            _kind: PhantomData,
        }
    }

    /// Allocates the next identifier, advancing the cursor.
    pub fn allocate(&mut self) -> I {
        let id = I::from(self.next);
        self.next += 1;
        id
    }

    /// Returns the next id value that `allocate` would hand out.
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.next
    }
}

impl<I: From<u64>> Default for IdAllocator<I> {
    fn default() -> Self {
        Self::new()
    }
}
