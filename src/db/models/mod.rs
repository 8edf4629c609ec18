//! Database models, one file per table.

pub mod push_subscription;
pub mod user;

pub use self::push_subscription::*;
pub use self::user::*;
