//! Push channel message envelope
//!
//! Every frame is a JSON object `{"type": "...", ...payload}`. Known types are
//! decoded into `PushMessage`; anything else is reported as unknown so the
//! dispatcher can log and drop it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};

/// Message kinds handlers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushKind {
    PaymentCompleted,
    PaymentFailed,
    OnboardingComplete,
    OnboardingFailed,
    AccountBanned,
    AccountUnbanned,
}

impl PushKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushKind::PaymentCompleted => "payment-completed",
            PushKind::PaymentFailed => "payment-failed",
            PushKind::OnboardingComplete => "onboarding-complete",
            PushKind::OnboardingFailed => "onboarding-failed",
            PushKind::AccountBanned => "account-banned",
            PushKind::AccountUnbanned => "account-unbanned",
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PushMessage {
    #[serde(rename_all = "camelCase")]
    PaymentCompleted {
        #[serde(alias = "linkId")]
        payment_link_id: String,
        #[serde(default)]
        amount: Option<i64>,
        #[serde(default)]
        currency: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PaymentFailed {
        #[serde(alias = "linkId")]
        payment_link_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OnboardingComplete {
        #[serde(default)]
        account_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OnboardingFailed {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AccountBanned {
        #[serde(default)]
        ban_reason: Option<String>,
        #[serde(default)]
        ban_type: Option<String>,
    },
    AccountUnbanned,
}

impl PushMessage {
    pub fn kind(&self) -> PushKind {
        match self {
            PushMessage::PaymentCompleted { .. } => PushKind::PaymentCompleted,
            PushMessage::PaymentFailed { .. } => PushKind::PaymentFailed,
            PushMessage::OnboardingComplete { .. } => PushKind::OnboardingComplete,
            PushMessage::OnboardingFailed { .. } => PushKind::OnboardingFailed,
            PushMessage::AccountBanned { .. } => PushKind::AccountBanned,
            PushMessage::AccountUnbanned => PushKind::AccountUnbanned,
        }
    }
}

/// Outcome of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Known(PushMessage),
    Unknown { message_type: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
}

/// Decode one text frame.
///
/// # Errors
/// `Protocol` when the frame is not a JSON object with a string `type`, or
/// when a known type carries a malformed payload.
pub fn decode(text: &str) -> AppResult<Decoded> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| AppError::protocol(format!("missing message type: {}", e)))?;

    let known = serde_json::from_value::<PushKind>(serde_json::Value::String(
        envelope.message_type.clone(),
    ))
    .is_ok();
    if !known {
        return Ok(Decoded::Unknown {
            message_type: envelope.message_type,
        });
    }

    serde_json::from_value::<PushMessage>(value)
        .map(Decoded::Known)
        .map_err(|e| {
            AppError::protocol(format!("bad '{}' payload: {}", envelope.message_type, e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_payment_completed() {
        let decoded =
            decode(r#"{"type":"payment-completed","paymentLinkId":"plink_1","amount":1500}"#)
                .unwrap();
        assert_eq!(
            decoded,
            Decoded::Known(PushMessage::PaymentCompleted {
                payment_link_id: "plink_1".to_string(),
                amount: Some(1500),
                currency: None,
            })
        );
    }

    #[test]
    fn test_decode_link_id_alias() {
        let decoded = decode(r#"{"type":"payment-failed","linkId":"plink_9"}"#).unwrap();
        match decoded {
            Decoded::Known(PushMessage::PaymentFailed { payment_link_id, .. }) => {
                assert_eq!(payment_link_id, "plink_9")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            decode(r#"{"type":"promo-banner","text":"hi"}"#).unwrap(),
            Decoded::Unknown {
                message_type: "promo-banner".to_string()
            }
        );
    }

    #[test]
    fn test_decode_protocol_errors() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"no_type":true}"#).is_err());
        assert!(decode(r#"{"type":"payment-completed"}"#).is_err());
    }

    #[test]
    fn test_unit_variant() {
        assert_eq!(
            decode(r#"{"type":"account-unbanned"}"#).unwrap(),
            Decoded::Known(PushMessage::AccountUnbanned)
        );
    }
}
