pub mod socket_data;
pub mod store;
