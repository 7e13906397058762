//! Routing module: resolves an incoming hostname to the `HostConfig` that
//! should serve it (§4.1 host matching rules).

mod hostmatch;

pub use hostmatch::resolve_host;
