//! Core library for playlist-link-sync: Spotify authorization and the
//! reconciliation of linked playlists.
pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod links;
pub mod logging;
pub mod models;
pub mod store;
pub mod sync;
