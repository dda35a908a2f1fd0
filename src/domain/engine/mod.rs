pub mod context;
pub mod engine;
pub mod expose;
pub mod job;
pub mod launch_task;
pub mod pool;
pub mod remote_launch;
pub mod results;
pub mod worker_actor;
pub mod worker_state;
