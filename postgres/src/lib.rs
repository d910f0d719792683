//! `PostgreSQL` storage for Conference GO.
//!
//! Provides [`PostgresDecisionOutbox`], the durable side of the decision
//! outbox: an approve/reject transition inserts a row, and the outbox
//! dispatcher publishes pending rows and marks them dispatched.
//!
//! # Example
//!
//! ```ignore
//! use conference_postgres::PostgresDecisionOutbox;
//!
//! let outbox = PostgresDecisionOutbox::connect("postgres://localhost/monolith", 5).await?;
//! outbox.migrate().await?;
//! let pending = outbox.pending(50).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod outbox;

pub use outbox::PostgresDecisionOutbox;
