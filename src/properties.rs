//! Property declarations.
//!
//! A property is declared once per (entity-kind, property-id) pair and never
//! redefined or removed. The declaration fixes the value kind, an optional
//! default, and whether post-construction mutation is allowed. Declarations
//! without a default demand an explicit value for every instance, so there is
//! no implicit null state anywhere in the manager.

use serde::{Deserialize, Serialize};

use crate::error::ContractError;
use crate::value::{PropertyKind, PropertyValue};

/// Declaration of a property: value kind, optional default, mutability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    kind: PropertyKind,
    default: Option<PropertyValue>,
    mutable: bool,
}

impl PropertyDefinition {
    /// Creates a definition, validating that the default (if any) matches
    /// the declared kind.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::PropertyKindMismatch`] if the default value
    /// has a different kind than declared.
    pub fn new(
        kind: PropertyKind,
        default: Option<PropertyValue>,
        mutable: bool,
    ) -> Result<Self, ContractError> {
        if let Some(value) = &default {
            if !value.matches(kind) {
                return Err(ContractError::PropertyKindMismatch {
                    expected: kind,
                    actual: value.kind(),
                });
            }
        }
        Ok(Self {
            kind,
            default,
            mutable,
        })
    }

    /// The kind every value of this property must have.
    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// The default value, if one was declared.
    #[must_use]
    pub const fn default_value(&self) -> Option<&PropertyValue> {
        self.default.as_ref()
    }

    /// Whether the value may change after construction.
    #[must_use]
    pub const fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Validates a candidate value against this declaration.
    pub fn check_value(&self, value: &PropertyValue) -> Result<(), ContractError> {
        if value.matches(self.kind) {
            Ok(())
        } else {
            Err(ContractError::PropertyKindMismatch {
                expected: self.kind,
                actual: value.kind(),
            })
        }
    }
}
