// Capability registration and resolution

pub mod capability_registry;

pub use capability_registry::{
    CapabilityHandler, CapabilityRegistry, HandlerError, HandlerResult, RegistryStats,
};
