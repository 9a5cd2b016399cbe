//! HTTP service for worker fleets.
//!
//! ## Structure
//!
//! - [`handler`] - axum routes and the [`handler::CascadeService`] state.
//! - [`wire`] - request and response bodies, error envelope.

pub mod handler;
pub mod wire;

#[cfg(test)]
mod tests;
