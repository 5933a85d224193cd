//! Adapters Layer
//!
//! Inbound: the HTTP surface. Outbound: the PostgreSQL pool.

pub mod inbound;
pub mod outbound;
