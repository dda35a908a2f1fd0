pub mod client;
pub mod computer;
pub mod local_transport;
pub mod retry;
pub mod slurm;
pub mod ssh_transport;
pub mod transport;
