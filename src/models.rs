use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Consumer,
    Farmer,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "consumer" => Ok(UserRole::Consumer),
            "farmer" => Ok(UserRole::Farmer),
            other => Err(format!("unknown user role: {}", other)),
        }
    }
}

impl UserRole {
    /// Tag sent in the `type` form field.
    pub fn as_tag(&self) -> &'static str {
        match self {
            UserRole::Consumer => "consumer",
            UserRole::Farmer => "farmer",
        }
    }

    /// Label for the role's tracked date, as shown on the review sheet.
    pub fn date_label(&self) -> &'static str {
        match self {
            UserRole::Consumer => "Expiration Date",
            UserRole::Farmer => "Harvest Date",
        }
    }
}

/// Normalized food attributes produced from a classification response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub role: UserRole,
    pub name: String,
    pub condition: String,
    pub storage: Option<String>,
    pub features: Option<String>,
    pub sensory: Option<String>,
    pub disease: Option<String>,
    pub treatment: Option<String>,
    /// Expiration date for consumers, harvest date for farmers.
    pub date: Option<NaiveDate>,
    /// Model confidence in `0.0..=1.0`.
    pub confidence: Option<f32>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduce {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCrop {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_at: Option<String>,
}

/// The subset of a review that is written to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistableRecord {
    Produce(NewProduce),
    Crop(NewCrop),
}

impl PersistableRecord {
    /// Builds the record shape selected by `role`, keyed by the result's date.
    pub fn for_role(role: UserRole, name: &str, date: Option<NaiveDate>) -> Self {
        let stamp = date.map(format_record_date);
        match role {
            UserRole::Consumer => PersistableRecord::Produce(NewProduce {
                name: name.to_string(),
                expires_at: stamp,
            }),
            UserRole::Farmer => PersistableRecord::Crop(NewCrop {
                name: name.to_string(),
                harvest_at: stamp,
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PersistableRecord::Produce(p) => &p.name,
            PersistableRecord::Crop(c) => &c.name,
        }
    }
}

/// Row in the `produce` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Produce {
    pub produce_id: String,
    pub name: String,
    pub bought_at: String,
    pub expires_at: Option<String>,
    pub cover_image: Option<String>,
}

/// Row in the `crops` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub crop_id: String,
    pub name: String,
    pub scanned_at: String,
    pub harvest_at: Option<String>,
    pub cover_image: Option<String>,
    pub viability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub user_type: UserRole,
    pub location: Option<String>,
}

/// Authenticated user identity plus the bearer token used for backend calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
}

/// Formats a calendar date as UTC midnight with millisecond precision,
/// e.g. `2025-11-01T00:00:00.000Z`.
pub fn format_record_date(date: NaiveDate) -> String {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(midnight, Utc);
    utc.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses the date spellings the classification services emit.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%m/%d/%Y") {
        return Some(date);
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamp.with_timezone(&Utc).date_naive());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("consumer".parse::<UserRole>().unwrap(), UserRole::Consumer);
        assert_eq!(" Farmer ".parse::<UserRole>().unwrap(), UserRole::Farmer);
        assert!("grocer".parse::<UserRole>().is_err());
        assert_eq!(UserRole::Farmer.to_string(), "farmer");
    }

    #[test]
    fn test_record_date_format() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert_eq!(format_record_date(date), "2025-11-01T00:00:00.000Z");
    }

    #[test]
    fn test_loose_date_parsing() {
        let expected = NaiveDate::from_ymd_opt(2025, 11, 1);
        assert_eq!(parse_loose_date("2025-11-01"), expected);
        assert_eq!(parse_loose_date("11/1/2025"), expected);
        assert_eq!(parse_loose_date("2025-11-01T08:30:00Z"), expected);
        assert_eq!(parse_loose_date("soon"), None);
        assert_eq!(parse_loose_date(""), None);
    }

    #[test]
    fn test_record_shape_follows_role() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 15);

        match PersistableRecord::for_role(UserRole::Consumer, "Apple", date) {
            PersistableRecord::Produce(p) => {
                assert_eq!(p.name, "Apple");
                assert_eq!(p.expires_at.as_deref(), Some("2025-06-15T00:00:00.000Z"));
            }
            other => panic!("expected produce record, got {:?}", other),
        }

        match PersistableRecord::for_role(UserRole::Farmer, "Wheat", date) {
            PersistableRecord::Crop(c) => {
                assert_eq!(c.name, "Wheat");
                assert_eq!(c.harvest_at.as_deref(), Some("2025-06-15T00:00:00.000Z"));
            }
            other => panic!("expected crop record, got {:?}", other),
        }
    }

    #[test]
    fn test_new_produce_omits_missing_date() {
        let json = serde_json::to_value(NewProduce {
            name: "Kale".to_string(),
            expires_at: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Kale" }));
    }
}
