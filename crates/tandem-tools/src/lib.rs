pub mod builtin;
pub mod memory_store;
pub mod registry;

pub use memory_store::InMemoryStore;
pub use registry::ToolRegistry;
