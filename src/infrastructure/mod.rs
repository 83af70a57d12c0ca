//! Adapters for the ports the application layer drives: the billing REST
//! API, an in-memory authoritative stand-in, and the QR reference issuer.

pub mod http;
pub mod in_memory;
pub mod qr;
