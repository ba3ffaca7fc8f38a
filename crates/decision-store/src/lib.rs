//! SQL-backed persistence for decisions, over `sqlx::AnyPool`.

mod store;

pub use store::SqlDecisionStore;
