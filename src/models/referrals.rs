use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ValidationError;
use crate::utils::{non_empty, opt_string_or_number};

pub const DEFAULT_CHANNEL_ACTIVITY: &str = "inactive";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, sqlx::FromRow)]
pub struct Referral {
    pub referral_id: String,
    pub referrer_id: Option<String>,
    pub reg_date: DateTime<Utc>,
    pub referral_nickname: Option<String>,
    pub referrer_nickname: Option<String>,
    pub referral_name: Option<String>,
    pub referral_link_url: Option<String>,
    pub personal_channel_link: Option<String>,
    pub utm: Option<String>,
    pub channel_activity: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a create or upsert call. Accepts the legacy `referal_*` /
/// `referer_*` spellings still used by the bot webhooks.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewReferral {
    #[serde(default, alias = "referal_id", deserialize_with = "opt_string_or_number")]
    pub referral_id: Option<String>,
    #[serde(default, alias = "referer_id", deserialize_with = "opt_string_or_number")]
    pub referrer_id: Option<String>,
    #[serde(default)]
    pub reg_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "referal_nickname")]
    pub referral_nickname: Option<String>,
    #[serde(default, alias = "referer_nickname")]
    pub referrer_nickname: Option<String>,
    #[serde(default, alias = "referal_name")]
    pub referral_name: Option<String>,
    #[serde(default)]
    pub referral_link_url: Option<String>,
    #[serde(default)]
    pub personal_channel_link: Option<String>,
    #[serde(default)]
    pub utm: Option<String>,
    #[serde(default)]
    pub channel_activity: Option<String>,
}

impl NewReferral {
    pub fn into_referral(self, now: DateTime<Utc>) -> Result<Referral, ValidationError> {
        let referral_id = self
            .referral_id
            .clone()
            .ok_or(ValidationError::MissingReferralId)?;

        let mut referral = Referral {
            referral_id,
            referrer_id: None,
            reg_date: self.reg_date.unwrap_or(now),
            referral_nickname: None,
            referrer_nickname: None,
            referral_name: None,
            referral_link_url: None,
            personal_channel_link: None,
            utm: None,
            channel_activity: DEFAULT_CHANNEL_ACTIVITY.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.into_patch().apply(&mut referral, now)?;
        Ok(referral)
    }

    /// Fields present in the body overwrite the stored ones, absent fields
    /// are left alone.
    pub fn into_patch(self) -> ReferralPatch {
        ReferralPatch {
            referrer_id: self.referrer_id,
            reg_date: self.reg_date,
            referral_nickname: self.referral_nickname,
            referrer_nickname: self.referrer_nickname,
            referral_name: self.referral_name,
            referral_link_url: self.referral_link_url,
            personal_channel_link: self.personal_channel_link,
            utm: self.utm,
            channel_activity: self.channel_activity,
        }
    }
}

/// Partial update. `referral_id` is immutable; an empty `referrer_id`
/// detaches the referral and makes it a root.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReferralPatch {
    #[serde(default, alias = "referer_id", deserialize_with = "patch_referrer")]
    pub referrer_id: Option<String>,
    #[serde(default)]
    pub reg_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "referal_nickname")]
    pub referral_nickname: Option<String>,
    #[serde(default, alias = "referer_nickname")]
    pub referrer_nickname: Option<String>,
    #[serde(default, alias = "referal_name")]
    pub referral_name: Option<String>,
    #[serde(default)]
    pub referral_link_url: Option<String>,
    #[serde(default)]
    pub personal_channel_link: Option<String>,
    #[serde(default)]
    pub utm: Option<String>,
    #[serde(default)]
    pub channel_activity: Option<String>,
}

// Keeps "" as Some("") so the patch can tell "detach" apart from "absent".
fn patch_referrer<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => {
            return Err(serde::de::Error::custom(format!(
                "referrer_id must be a string or number, got {other}"
            )))
        }
    })
}

impl ReferralPatch {
    pub fn is_empty(&self) -> bool {
        self.referrer_id.is_none()
            && self.reg_date.is_none()
            && self.referral_nickname.is_none()
            && self.referrer_nickname.is_none()
            && self.referral_name.is_none()
            && self.referral_link_url.is_none()
            && self.personal_channel_link.is_none()
            && self.utm.is_none()
            && self.channel_activity.is_none()
    }

    pub fn apply(self, referral: &mut Referral, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if let Some(referrer_id) = self.referrer_id {
            let referrer_id = non_empty(referrer_id);
            if referrer_id.as_deref() == Some(referral.referral_id.as_str()) {
                return Err(ValidationError::SelfReferral(referral.referral_id.clone()));
            }
            referral.referrer_id = referrer_id;
        }
        if let Some(reg_date) = self.reg_date {
            referral.reg_date = reg_date;
        }
        if let Some(channel_activity) = self.channel_activity.and_then(non_empty) {
            referral.channel_activity = channel_activity;
        }

        set_optional(&mut referral.referral_nickname, self.referral_nickname);
        set_optional(&mut referral.referrer_nickname, self.referrer_nickname);
        set_optional(&mut referral.referral_name, self.referral_name);
        set_optional(&mut referral.referral_link_url, self.referral_link_url);
        set_optional(&mut referral.personal_channel_link, self.personal_channel_link);
        set_optional(&mut referral.utm, self.utm);

        referral.updated_at = now;
        Ok(())
    }
}

fn set_optional(field: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *field = non_empty(value);
    }
}
