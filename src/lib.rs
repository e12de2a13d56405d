//! Client for the pub/sub messaging backend.
//!
//! ARCHITECTURE
//! ============
//! - [`api`]: HTTP transport behind the [`api::MessagingApi`] trait.
//! - [`store`]: client-local key-value storage for the session.
//! - [`types`]: wire normalization and domain records.
//! - [`poll`]: auto-update flag, failure counter, scheduling decision.
//! - [`view`]: tab model and events for the presentation layer.
//! - [`controller`]: [`ClientSessionController`], which ties them together
//!   and owns the poll task.

pub mod api;
pub mod config;
pub mod controller;
pub mod poll;
pub mod store;
pub mod types;
pub mod view;

pub use api::{ApiError, HttpApi, MessagingApi};
pub use config::ClientConfig;
pub use controller::{ClientSessionController, ControllerError, ControllerState};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use types::{Message, User, WireRecord};
pub use view::{Tab, ViewEvent};
