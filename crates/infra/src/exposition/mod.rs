//! HTTP exposition endpoint: `/metrics`, `/healthz`, `/status`

pub mod server;

pub use server::{router, ExpositionServer, ExpositionState};
