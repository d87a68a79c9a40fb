// # Server Lifecycle Callback Trait
//
// The server host notifies callbacks after it has bound its listeners and
// before it stops serving. Callbacks must return quickly: anything slow
// (network I/O, retries) belongs on a background worker.

use std::net::SocketAddr;

/// What the server host knows about itself once it is listening
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerInfo {
    /// Socket addresses the server actually bound, possibly wildcard
    pub listen_addrs: Vec<SocketAddr>,
}

impl ServerInfo {
    /// Create server info from the bound addresses
    pub fn new(listen_addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            listen_addrs: listen_addrs.into_iter().collect(),
        }
    }
}

/// Trait for server lifecycle callbacks
///
/// `on_start` and `on_stop` may be invoked from different threads and more
/// than once; implementations are expected to be idempotent.
pub trait ServerLifecycleCallback: Send + Sync {
    /// Called once the server is listening
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Start handled (possibly a no-op)
    /// - `Err(Error)`: Fatal; the host must treat it as a startup failure
    fn on_start(&self, info: &ServerInfo) -> Result<(), crate::Error>;

    /// Called before the server stops serving
    fn on_stop(&self);
}
