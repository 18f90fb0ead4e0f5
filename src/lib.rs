//! Household inventory and shopping-list core.
//!
//! Local collections mirror a remote document store through live queries
//! scoped to the active household. Mutations are applied locally first and
//! rolled back if the remote write fails; see [`sync`].

pub mod categories;
pub mod config;
pub mod error;
pub mod history;
pub mod household;
pub mod household_active;
pub mod id;
pub mod inventory;
pub mod logging;
pub mod model;
pub mod mutation_log;
pub mod shopping;
pub mod state;
pub mod store;
pub mod sync;
pub mod time;

pub use error::{AppError, AppResult, ErrorKind};
pub use household_active::{Actor, SessionHandle};
pub use state::AppState;
