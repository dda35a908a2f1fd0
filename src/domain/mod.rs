pub mod engine;
pub mod executor;
pub mod model;
pub mod queue;
pub mod remote;
pub mod store;
pub mod utils;
