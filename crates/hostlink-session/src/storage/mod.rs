//! Storage implementations.

pub mod memory;

pub use memory::MemoryBindingStorage;
