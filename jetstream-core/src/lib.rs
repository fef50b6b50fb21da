//! Core library for JetStream, a Subsonic reverse proxy that augments a
//! Navidrome-compatible library with an external music catalog.
//!
//! The server binary lives in `jetstream-server`; this crate holds the
//! identifier codec, the Subsonic response model, the catalog gateway
//! client, the library side-channel client, the resolver, and the
//! background sync worker.

pub mod cache;
pub mod config;
pub mod gateway;
pub mod ids;
pub mod library;
pub mod resolver;
pub mod subsonic;
pub mod sync;
