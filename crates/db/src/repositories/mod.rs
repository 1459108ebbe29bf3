//! Repository layer: one zero-sized struct per table family.

pub mod contact_repo;
pub mod delivery_repo;
pub mod digest_repo;
pub mod job_repo;
pub mod notification_repo;
pub mod preference_repo;
pub mod push_subscription_repo;

pub use contact_repo::ContactRepo;
pub use delivery_repo::DeliveryRepo;
pub use digest_repo::DigestRepo;
pub use job_repo::JobRepo;
pub use notification_repo::NotificationRepo;
pub use preference_repo::PreferenceRepo;
pub use push_subscription_repo::PushSubscriptionRepo;
