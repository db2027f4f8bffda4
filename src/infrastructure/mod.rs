pub mod bluetooth;
pub mod ipc;
pub mod logging;
