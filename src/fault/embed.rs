//! Embeddable fault container for workflow and schedule templates.
//!
//! External layers (workflows, schedules) embed "any one of N fault
//! specs" in their own documents. [`EmbedFault`] is that container: a
//! string tag naming the kind plus the payload. The payload is a proper
//! enum ([`FaultSpec`]), so an ambiguous or half-populated union is
//! unrepresentable; what remains checkable at runtime is whether the tag,
//! the payload and a concrete instance agree with each other.
//!
//! ## Errors
//! - [`SpecError::InvalidTemplateType`] — the tag is unknown to the
//!   registry, the payload is missing, or the payload's kind does not
//!   match the tag.
//! - [`SpecError::TypeMismatch`] — restoring from an instance whose kind
//!   disagrees with the container tag.

use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::fault::instance::FaultInstance;
use crate::fault::spec::FaultSpec;
use crate::kinds::KindRegistry;

/// "Any one of N fault specs", as embedded by workflow/schedule layers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedFault {
    /// Wire name of the embedded kind (the template's declared type).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// The embedded spec; must match `kind` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultSpec>,
}

impl EmbedFault {
    /// A consistent container wrapping the given spec.
    pub fn new(spec: FaultSpec) -> Self {
        Self {
            kind: spec.kind().name().to_string(),
            fault: Some(spec),
        }
    }

    /// Allocates a concrete instance of the kind named by the tag and
    /// copies the embedded spec into it.
    ///
    /// The returned instance has blank meta; callers name it and persist
    /// it themselves. The payload is validated before any use.
    pub fn spawn_new_object(&self, registry: &KindRegistry) -> Result<FaultInstance, SpecError> {
        let entry = registry
            .lookup_name(&self.kind)
            .ok_or_else(|| SpecError::InvalidTemplateType {
                tag: self.kind.clone(),
            })?;

        let spec = self
            .fault
            .as_ref()
            .ok_or_else(|| SpecError::InvalidTemplateType {
                tag: self.kind.clone(),
            })?;

        if spec.kind() != entry.kind {
            return Err(SpecError::InvalidTemplateType {
                tag: self.kind.clone(),
            });
        }

        let mut instance = registry.spawn_object(entry.kind)?;
        instance.spec = spec.clone();
        Ok(instance)
    }

    /// Inverse of [`spawn_new_object`](Self::spawn_new_object): copies the
    /// instance's spec back into the matching payload slot.
    pub fn restore_fault_spec(&mut self, instance: &FaultInstance) -> Result<(), SpecError> {
        if !self.kind.is_empty() && self.kind != instance.kind().name() {
            return Err(SpecError::TypeMismatch {
                expected: self.kind.clone(),
                found: instance.kind().name().to_string(),
            });
        }
        self.kind = instance.kind().name().to_string();
        self.fault = Some(instance.spec.clone());
        Ok(())
    }
}
