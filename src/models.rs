pub mod payments;
pub mod referrals;
pub mod tree;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("referral_id is required")]
    MissingReferralId,
    #[error("referral {0} cannot be its own referrer")]
    SelfReferral(String),
    #[error("user_id is required")]
    MissingUserId,
    #[error("amount is required and must be a non-negative number")]
    InvalidAmount,
}
