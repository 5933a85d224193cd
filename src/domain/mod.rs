//! Domain Layer
//!
//! Gateway entities, the error taxonomy, outbound ports and pure services.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
