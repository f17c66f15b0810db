//! HTTP surface for the request coalescer: the dedup middleware, the admin
//! API and application assembly. The `server` binary wires these to a
//! listener.

pub mod admin;
pub mod middleware;
pub mod router;
