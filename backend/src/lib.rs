// --- File: backend/src/lib.rs ---

// Entry point for the `notes_backend` library. The binary and the
// integration tests both build the application from these modules.
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod notes;
pub mod password;
pub mod security;
pub mod web_server;
