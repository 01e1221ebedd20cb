pub mod claim;
pub mod lifecycle;

pub use claim::BookingClaimService;
pub use lifecycle::BookingLifecycleService;
