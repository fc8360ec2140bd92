//! Static model catalog.
//!
//! - [`descriptor`]: Modality, Provider, ModelSchema, ModelDescriptor
//! - [`registry`]: ModelCatalog lookup and per-task defaults

pub mod descriptor;
pub mod registry;
