pub mod async_gate;
pub mod counting_gate;
pub mod deferral;
