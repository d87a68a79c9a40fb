// # registrard
//
// Server host and client channel factory behind the registrard binary. Hosts
// that embed the registrar use these directly instead of running the daemon.

pub mod channels;
pub mod server;
