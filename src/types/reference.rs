//! Typed references to the business object that caused a ledger line.

use serde::{Deserialize, Serialize};

/// Business object a ledger entry or decision points at.
///
/// Persisted as a `(type, id)` pair; [`Reference::from_parts`] is the only
/// way back from storage columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Reference {
    Message(i64),
    Campaign(i64),
    PaymentIntent(String),
    RefundRequest(i64),
    Dispute(i64),
    Migration(String),
    Compensation(i64),
    Promotion(String),
}

impl Reference {
    pub fn kind(&self) -> &'static str {
        match self {
            Reference::Message(_) => "message",
            Reference::Campaign(_) => "campaign",
            Reference::PaymentIntent(_) => "payment_intent",
            Reference::RefundRequest(_) => "refund_request",
            Reference::Dispute(_) => "dispute",
            Reference::Migration(_) => "migration",
            Reference::Compensation(_) => "compensation",
            Reference::Promotion(_) => "promotion",
        }
    }

    pub fn id(&self) -> String {
        match self {
            Reference::Message(id)
            | Reference::Campaign(id)
            | Reference::RefundRequest(id)
            | Reference::Dispute(id)
            | Reference::Compensation(id) => id.to_string(),
            Reference::PaymentIntent(id) | Reference::Migration(id) | Reference::Promotion(id) => {
                id.clone()
            }
        }
    }

    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        let numeric = || id.parse::<i64>().ok();
        match kind {
            "message" => numeric().map(Reference::Message),
            "campaign" => numeric().map(Reference::Campaign),
            "payment_intent" => Some(Reference::PaymentIntent(id.to_string())),
            "refund_request" => numeric().map(Reference::RefundRequest),
            "dispute" => numeric().map(Reference::Dispute),
            "migration" => Some(Reference::Migration(id.to_string())),
            "compensation" => numeric().map(Reference::Compensation),
            "promotion" => Some(Reference::Promotion(id.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_parts() {
        let reference = Reference::Campaign(812);
        assert_eq!(reference.kind(), "campaign");
        assert_eq!(reference.id(), "812");
        assert_eq!(
            Reference::from_parts(reference.kind(), &reference.id()),
            Some(reference)
        );
    }

    #[test]
    fn test_reference_rejects_unknown_kind() {
        assert_eq!(Reference::from_parts("invoice", "1"), None);
        assert_eq!(Reference::from_parts("message", "abc"), None);
    }

    #[test]
    fn test_reference_serde_shape() {
        let json = serde_json::to_value(Reference::RefundRequest(5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "refund_request", "id": 5}));
    }
}
