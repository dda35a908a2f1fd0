pub mod builtin;
pub mod cache;
pub mod registry;
pub mod resolver;
