//! Local-socket request surface.
//!
//! One newline-delimited JSON request per connection. A `stream` request
//! turns the connection into the stream consumer.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::BridgeClient;
pub use server::BridgeServer;

use interprocess::local_socket::{
    GenericFilePath, GenericNamespaced, Name, NameType, ToFsName, ToNsName,
};
use std::io;

/// Resolve a socket name, preferring the abstract namespace where the
/// platform has one.
pub fn socket_name(name: &str) -> io::Result<Name<'static>> {
    if GenericNamespaced::is_supported() {
        name.to_string().to_ns_name::<GenericNamespaced>()
    } else {
        std::env::temp_dir()
            .join(name)
            .to_string_lossy()
            .into_owned()
            .to_fs_name::<GenericFilePath>()
    }
}
