//! livequery - a live query server
//!
//! Clients subscribe over WebSocket with a class name and a filter; record
//! changes published upstream are matched against every subscription and
//! pushed as `create`, `update`, `enter`, `leave` or `delete` events to the
//! clients allowed to read them.

pub mod auth;
pub mod cli;
pub mod http_server;
pub mod observability;
pub mod query;
pub mod realtime;
