//! M2H Portal: role-based dormitory management backend
//!
//! Sled-backed gateway (identities, sessions, users, occupants, rooms,
//! reports, profiles) behind an Axum REST surface. Staff roles get their
//! own views; occupants get a read-mostly dashboard.

pub mod config;
pub mod error;
pub mod models;
pub mod auth;
pub mod storage;
pub mod session;
pub mod access;
// Workflows over storage: assignment and registration commit atomically or compensate
pub mod assignment;
pub mod registration;
pub mod reports;
pub mod dashboard;
pub mod settings;
pub mod mailer;
// REST API module: Axum HTTP handlers on port 11111
pub mod rest;
