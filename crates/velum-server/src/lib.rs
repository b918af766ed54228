//! The server: auth gate, component engines, RPC edge, administration
//! REST.
//!
//! A [`backend::Backend`] ties every component to one shared store and
//! event bus; [`routes::build_router`] exposes it over HTTP.

#![forbid(unsafe_code)]

pub mod auth;
pub mod backend;
pub mod components;
pub mod email;
pub mod events;
pub mod protocol;
pub mod routes;

pub use backend::Backend;
pub use routes::build_router;
