pub mod push_subscription;
pub mod user;

pub use push_subscription::PushSubscriptionRepository;
pub use user::UserRepository;
