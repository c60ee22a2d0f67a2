//! Session assembly: bundle + capabilities + partition access -> descriptor.

pub mod assembler;

pub use assembler::{SessionAssembler, SessionDescriptor};
