use std::collections::HashSet;

use serde::Serialize;

use super::referrals::Referral;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ReferralNode {
    #[serde(flatten)]
    pub referral: Referral,
    pub children: Vec<ReferralNode>,
    /// Descendants present in `children`, each counted once.
    pub total_referrals: usize,
    pub is_active: bool,
}

impl ReferralNode {
    pub fn new(referral: Referral, children: Vec<ReferralNode>, active: &HashSet<String>) -> Self {
        let total_referrals = children
            .iter()
            .map(|child| child.total_referrals + 1)
            .sum();
        let is_active = active.contains(&referral.referral_id);

        Self {
            referral,
            children,
            total_referrals,
            is_active,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TreeSummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub levels: usize,
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ActivityStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub window_days: i64,
}
