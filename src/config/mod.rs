pub mod loader;
pub mod types;

#[cfg(test)]
mod tests;

pub use loader::ConfigDiscovery;
pub use types::*;
