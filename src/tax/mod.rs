// Tax module - per-form adjustment and limitation calculations

pub mod amt;
pub mod brackets;
pub mod capital_gains;
pub mod carryover;
pub mod debt_discharge;
pub mod excise;
pub mod foreign_tax;
pub mod ira;
pub mod property;

pub use brackets::{regular_tax, RegularTax};
pub use carryover::{consume, CarryoverCategory, CarryoverEntry, CarryoverKind, CarryoverLedger};
