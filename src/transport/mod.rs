// External media process transport (mpv JSON IPC)

pub mod driver;
pub mod ipc;
pub mod protocol;

pub use driver::{DriverSettings, TransportDriver};
pub use protocol::{IpcRequest, IpcResponse};
