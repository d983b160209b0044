use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ValidationError;
use crate::utils::{non_empty, opt_number_or_string, opt_string_or_number};

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: String,
    pub payment_date: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewPayment {
    #[serde(default, alias = "userId", deserialize_with = "opt_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, alias = "paymentDate")]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_number_or_string")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default, alias = "transactionId", deserialize_with = "opt_string_or_number")]
    pub transaction_id: Option<String>,
    #[serde(default, alias = "subscriptionId", deserialize_with = "opt_string_or_number")]
    pub subscription_id: Option<String>,
}

impl NewPayment {
    pub fn into_payment(self, now: DateTime<Utc>) -> Result<Payment, ValidationError> {
        let user_id = self.user_id.ok_or(ValidationError::MissingUserId)?;
        let amount = match self.amount {
            Some(amount) if amount.is_finite() && amount >= 0.0 => amount,
            _ => return Err(ValidationError::InvalidAmount),
        };

        Ok(Payment {
            id: Uuid::new_v4(),
            user_id,
            payment_date: self.payment_date.unwrap_or(now),
            amount,
            currency: self
                .currency
                .and_then(non_empty)
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            payment_method: self.payment_method.and_then(non_empty),
            status: self.status.unwrap_or_default(),
            transaction_id: self.transaction_id,
            subscription_id: self.subscription_id,
            created_at: now,
            updated_at: now,
        })
    }
}
