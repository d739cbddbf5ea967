//! Window resolution, aggregation, dense ranking and pagination for leaderboard queries.
//!
//! Nothing here caches: every query is recomputed from the store, and writers only emit a
//! payload-free change signal through [`notify::ChangeNotifier`].

pub mod aggregate;
pub mod notify;
pub mod page;
pub mod rank;
pub mod window;
