pub mod batch_persist;
pub mod session_monitor;
