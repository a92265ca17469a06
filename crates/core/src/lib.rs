#![warn(clippy::all, missing_docs)]

//! Core logic for the busboard transit dashboard.
//!
//! This crate hosts the data models, the refresh/reconciliation engine, the
//! saved-stop store and its persistence, and the transit, weather and
//! calendar adapters used by the terminal UI.

pub mod bootstrap;
pub mod calendar;
pub mod config;
pub mod models;
pub mod reconcile;
pub mod scheduler;
pub mod search;
pub mod storage;
pub mod store;
pub mod transit;
pub mod weather;

pub use config::AppConfig;
pub use models::{ArrivalInfo, DisplayStop, FavoriteBus, SavedStop};
pub use reconcile::{CycleOutcome, Generation, GenerationCounter, ReconcileEngine};
pub use scheduler::{RefreshScheduler, RefreshTrigger};
pub use storage::{FileStorage, StopPersistence};
pub use store::{CommitStatus, StopStore, StoreError};
pub use transit::{DataGoKrClient, TransitSource};
