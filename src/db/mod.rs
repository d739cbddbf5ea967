use thiserror::Error;

use crate::db::models::user::UserId;

pub mod models;
pub mod repositories;

pub mod prelude {
    pub use crate::db::{StoreError, StoreResult};

    pub use crate::db::models::claim::{Claim, ClaimFilter, ClaimId, ClaimView, UserTotal};
    pub use crate::db::models::user::{User, UserId};

    pub use crate::db::repositories::Store;
    pub use crate::db::repositories::memory::MemoryStore;
    pub use crate::db::repositories::pg::PgStore;
}

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error("user name '{name}' already exists")]
    Conflict { name: String },

    /// The user's lifetime total was incremented but the matching claim row is missing
    #[error("awarded {points} points to user {user_id} but the claim was not recorded: {source}")]
    ClaimNotRecorded {
        user_id: UserId,
        points: i64,
        #[source]
        source: Box<StoreError>,
    },
}
