//! WashTrack Core - shift lifecycle and sales attribution engine.
//!
//! Backend logic for the WashTrack laundry admin dashboard. The dashboard
//! itself is CRUD glue (forms, tables, charts); everything with real
//! business rules lives here:
//!
//! - shift open/close with the one-active-shift-per-staff invariant
//! - partner pairing on an open shift
//! - order and payment status machines (with the "Paid" terminal lock)
//! - per-staff daily sales reports with commission and inventory usage
//!
//! All operations are synchronous request/response calls against the local
//! SQLite store ([`db::DbState`]) and return typed results ([`errors::CoreError`]).
//! The acting staff id is passed explicitly to every mutating operation;
//! there is no implicit session state.

pub mod attribution;
pub mod db;
pub mod errors;
pub mod inventory;
pub mod models;
pub mod orders;
pub mod pairing;
pub mod payments;
pub mod shifts;

pub use errors::{CoreError, Result};
