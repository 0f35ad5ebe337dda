//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by concern.

pub mod access;
pub mod events;
pub mod health;
pub mod metrics;
pub mod occupancy;
pub mod recent;
