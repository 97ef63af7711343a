//! Dealer portal core
//!
//! Client-side session and data layer for a dealership staff portal:
//! - Session: two-step login (credentials, then a 6-digit code), persisted identity (sled)
//! - Access: role-gated views, admin ⊇ staff
//! - Inventory: stock feed + video catalog, reconciled by registration plate
//! - Backend: axum reference server implementing the remote API for local runs and tests

pub mod account;
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
// Plate index for large stock/video joins
pub mod indexing;
pub mod inventory;
pub mod logging;
pub mod models;
pub mod reconcile;
pub mod session;
// Session persistence (sled-backed and in-memory)
pub mod storage;

pub use error::{PortalError, Result};
