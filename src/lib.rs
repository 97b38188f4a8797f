//! Carehome Receipts - Donation receipt issuance
//!
//! Turns recorded donations into legally certified tax receipts through an
//! external certification authority, and keeps donations with an issued
//! receipt immutable.

pub mod authority;
pub mod config;
pub mod document;
pub mod domain;
pub mod guard;
pub mod orchestration;
pub mod reconcile;
pub mod service;
pub mod storage;
pub mod utils;
