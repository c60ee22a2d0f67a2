//! CapabilityDescriptor -- object-safe, shareable wrapper for `Capability`.
//!
//! Same shape as the generation backend wrapper:
//! 1. An object-safe `CapabilityDyn` trait with boxed futures
//! 2. A blanket impl of `CapabilityDyn` for every `T: Capability`
//! 3. `CapabilityDescriptor` holds `Arc<dyn CapabilityDyn>` and delegates
//!
//! The `Arc` lets one registered implementation back many sessions.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use domchat_types::capability::CapabilitySpec;
use domchat_types::error::CapabilityError;

use crate::partition::ScopedStore;

use super::handler::Capability;

/// Object-safe version of [`Capability`].
pub trait CapabilityDyn: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;

    fn invoke_boxed<'a>(
        &'a self,
        arguments: Value,
        store: &'a mut dyn ScopedStore,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CapabilityError>> + Send + 'a>>;
}

impl<T: Capability> CapabilityDyn for T {
    fn spec(&self) -> &CapabilitySpec {
        Capability::spec(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        arguments: Value,
        store: &'a mut dyn ScopedStore,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CapabilityError>> + Send + 'a>> {
        Box::pin(self.invoke(arguments, store))
    }
}

/// A resolved capability: its model-facing spec plus the callable behind it.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    inner: Arc<dyn CapabilityDyn>,
}

impl CapabilityDescriptor {
    pub fn new<T: Capability + 'static>(capability: T) -> Self {
        Self {
            inner: Arc::new(capability),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.spec().name
    }

    /// Human-readable purpose, used by the model to decide when to call it.
    pub fn purpose(&self) -> &str {
        &self.inner.spec().description
    }

    pub fn parameters(&self) -> &Value {
        &self.inner.spec().parameters
    }

    pub fn spec(&self) -> &CapabilitySpec {
        self.inner.spec()
    }

    pub async fn invoke(
        &self,
        arguments: Value,
        store: &mut dyn ScopedStore,
    ) -> Result<Value, CapabilityError> {
        self.inner.invoke_boxed(arguments, store).await
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name())
            .finish()
    }
}
