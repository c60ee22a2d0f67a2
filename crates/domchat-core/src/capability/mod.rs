//! Capabilities: named, typed actions the generation loop may invoke.
//!
//! - `handler`: the `Capability` trait concrete implementations provide
//! - `descriptor`: `CapabilityDescriptor`, the shareable type-erased handle
//! - `registry`: partition -> name -> descriptor, populated at startup
//! - `loader`: resolves a bundle's declared names against the registry

pub mod descriptor;
pub mod handler;
pub mod loader;
pub mod registry;

pub use descriptor::CapabilityDescriptor;
pub use handler::{Capability, decode_arguments};
pub use loader::{CapabilityLoader, LoadedCapabilities};
pub use registry::CapabilityRegistry;
