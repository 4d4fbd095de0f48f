//! Capability (subscription) object.
//!
//! Created exactly once per successful purchase and owned by the payer.
//! Valid while `created_at + ttl > ledger time`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: ObjectId,
    pub created_at: DateTime<Utc>,
    pub service_id: ObjectId,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
}

impl Capability {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + self.ttl
    }

    pub fn is_valid_at(&self, ledger_time: DateTime<Utc>) -> bool {
        self.expires_at() > ledger_time
    }

    /// Parses the content fields of a subscription object.
    ///
    /// Expects `id` (either a plain id or `{ "id": ... }`), `created_at`
    /// (milliseconds, number or decimal string) and `service_id`. Returns
    /// `None` if any of them is missing, which the resolver treats as "not
    /// visible yet".
    pub fn from_fields(fields: &serde_json::Value, ttl: Duration) -> Option<Self> {
        let id = fields.get("id").and_then(parse_uid)?;
        let created_at_ms = fields.get("created_at").and_then(parse_u64)?;
        let created_at = Utc.timestamp_millis_opt(i64::try_from(created_at_ms).ok()?).single()?;
        let service_id = fields.get("service_id").and_then(parse_uid)?;
        Some(Self {
            id,
            created_at,
            service_id,
            ttl,
        })
    }
}

fn parse_uid(value: &serde_json::Value) -> Option<ObjectId> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Object(map) => map.get("id").and_then(parse_uid),
        _ => None,
    }
}

fn parse_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(d.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::milliseconds(i64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fields(created_at: serde_json::Value) -> serde_json::Value {
        json!({
            "id": { "id": ObjectId::from_u64(7).to_string() },
            "created_at": created_at,
            "service_id": ObjectId::from_u64(8).to_string(),
        })
    }

    #[rstest]
    #[case::number(json!(1_700_000_000_000u64))]
    #[case::string(json!("1700000000000"))]
    fn parses_subscription_fields(#[case] created_at: serde_json::Value) {
        let cap = Capability::from_fields(&fields(created_at), Duration::minutes(30)).unwrap();
        assert_eq!(cap.id, ObjectId::from_u64(7));
        assert_eq!(cap.service_id, ObjectId::from_u64(8));
        assert_eq!(cap.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[rstest]
    #[case::missing_id(json!({"created_at": 1, "service_id": "0x8"}))]
    #[case::missing_created_at(json!({"id": "0x7", "service_id": "0x8"}))]
    #[case::missing_service(json!({"id": "0x7", "created_at": 1}))]
    #[case::empty(json!({}))]
    fn incomplete_fields_are_rejected(#[case] fields: serde_json::Value) {
        assert!(Capability::from_fields(&fields, Duration::minutes(1)).is_none());
    }

    #[test]
    fn validity_is_bounded_by_ttl() {
        let created_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let cap = Capability {
            id: ObjectId::from_u64(1),
            created_at,
            service_id: ObjectId::from_u64(2),
            ttl: Duration::minutes(10),
        };
        assert!(cap.is_valid_at(created_at + Duration::minutes(9)));
        assert!(!cap.is_valid_at(created_at + Duration::minutes(10)));
    }
}
