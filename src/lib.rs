//! Image generation relay
//!
//! Relays image generation requests from the chat application to a
//! Midjourney proxy, streams progress back to the caller and reconciles the
//! provider's webhook callbacks into a shared job store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
