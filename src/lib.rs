//! Fedtax - US federal income tax adjustment and limitation engine
//!
//! This library computes the adjustment and limitation forms of one
//! individual return (4797, 1116, 8606, 5329, 982, 6251), consolidates them
//! into a single tax figure and maintains the multi-year carryover ledger.

pub mod cli;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod money;
pub mod tax;
pub mod validation;
