pub mod client;
pub mod connection_set;
pub mod endpoint_list;
pub mod server;
