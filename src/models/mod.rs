//! Data models for explorer payloads and pipeline artifacts.
//!
//! This module contains every structure that is read from or written to disk.

/// Wallet address listings
pub mod address;
/// Analysis reports, metrics and detection results
pub mod report;
/// Wallet transactions and counterparty resolution
pub mod transaction;
/// Wallet info and ranking rows
pub mod wallet;
