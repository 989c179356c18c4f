//! Registry mapping `(StreamRole, DeviceKind)` to stream type constructors.

use std::collections::BTreeMap;

use tracing::warn;

use crate::device::DeviceKind;
use crate::error::{Result, VmError};
use crate::role::StreamRole;
use crate::stream_type::{StreamType, StreamTypeFactory};

/// Table of registered stream types.
///
/// Built once at startup from an explicit table and shared (read-only) by
/// every thread context.
#[derive(Default, Clone)]
pub struct StreamTypeRegistry {
    factories: BTreeMap<(StreamRole, DeviceKind), StreamTypeFactory>,
}

impl StreamTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for a role on a device kind.
    ///
    /// A second registration for the same pair replaces the first.
    pub fn register(
        &mut self,
        role: StreamRole,
        kind: DeviceKind,
        factory: StreamTypeFactory,
    ) -> &mut Self {
        if self.factories.insert((role, kind), factory).is_some() {
            warn!(%role, %kind, "Replacing registered stream type");
        }
        self
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, role: StreamRole, kind: DeviceKind, factory: StreamTypeFactory) -> Self {
        self.register(role, kind, factory);
        self
    }

    /// Instantiate the stream type for a role on a device kind.
    pub fn resolve(&self, role: StreamRole, kind: DeviceKind) -> Result<Box<dyn StreamType>> {
        self.factories
            .get(&(role, kind))
            .map(|factory| factory(role, kind))
            .ok_or(VmError::StreamTypeNotRegistered { role, kind })
    }

    /// Check whether a pair is registered.
    pub fn contains(&self, role: StreamRole, kind: DeviceKind) -> bool {
        self.factories.contains_key(&(role, kind))
    }

    /// Registered pairs in deterministic order.
    pub fn entries(&self) -> impl Iterator<Item = (StreamRole, DeviceKind)> + '_ {
        self.factories.keys().copied()
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for StreamTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
