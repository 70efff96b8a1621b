//! Domain records: users, their role in the supervision hierarchy, and measurements.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Internal numeric user identifier, assigned by the store on creation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(transparent)]
pub struct MeasurementId(pub i64);

/// Role of a user in the supervision hierarchy.
///
/// Roles are totally ordered: `Patient < Clinician < Manager < Sysadmin`. The order is defined
/// once by [`AccessLevel::ORDER`]; every comparison in the crate goes through [`Ord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub enum AccessLevel {
    Patient,
    Clinician,
    Manager,
    Sysadmin,
}

impl AccessLevel {
    /// All roles from least to most privileged.
    pub const ORDER: [AccessLevel; 4] = [
        AccessLevel::Patient,
        AccessLevel::Clinician,
        AccessLevel::Manager,
        AccessLevel::Sysadmin,
    ];

    /// Position of this role in [`AccessLevel::ORDER`].
    pub fn rank(self) -> usize {
        Self::ORDER
            .iter()
            .position(|level| *level == self)
            .unwrap_or_default()
    }
}

impl PartialOrd for AccessLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AccessLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Sex used by the eGFR formula.
///
/// Accepts `"male"`/`"female"` in any case, or the numeric codes `0`/`1`, when deserialising.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Gender::Male),
            1 => Some(Gender::Female),
            _ => None,
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "0" => Ok(Gender::Male),
            "female" | "1" => Ok(Gender::Female),
            other => Err(format!("unknown gender: {other}")),
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
        }
    }
}

impl<'de> Deserialize<'de> for Gender {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Gender::from_code(code)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown gender code: {code}"))),
            Raw::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A registered user: identity, role, supervision link and the demographics the eGFR formula
/// needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub supervisor_id: Option<UserId>,
    pub email: String,
    pub professional_id: Option<i64>,
    pub nhs_number: Option<i64>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub access_level: AccessLevel,
    pub name: String,
    pub surname: String,
    pub gender: Gender,
    pub is_black: bool,
    #[serde(with = "flexible_date")]
    #[schema(value_type = String, format = Date)]
    pub date_of_birth: NaiveDate,
}

impl User {
    /// The user's natural identifier: NHS number for patients, professional ID otherwise.
    pub fn natural_id(&self) -> Option<i64> {
        match self.access_level {
            AccessLevel::Patient => self.nhs_number,
            _ => self.professional_id,
        }
    }

    pub fn is_supervised_by(&self, supervisor: &User) -> bool {
        self.supervisor_id == Some(supervisor.id)
    }
}

/// One stored eGFR result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub id: MeasurementId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub result: f64,
}

/// A measurement that has been accepted but not yet persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMeasurement {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub result: f64,
}

/// Dates of birth arrive either as `YYYY-MM-DD` or as a full RFC 3339 timestamp (what browsers
/// send from a date picker). Both are reduced to a calendar date.
pub mod flexible_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Result<NaiveDate, String> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(date);
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.date_naive())
            .map_err(|_| format!("invalid date: {raw}"))
    }

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// `Option` variant for patch fields.
    pub mod option {
        use chrono::NaiveDate;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match date {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|r| super::parse(&r).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_levels_form_a_strict_total_order() {
        for (i, a) in AccessLevel::ORDER.iter().enumerate() {
            for (j, b) in AccessLevel::ORDER.iter().enumerate() {
                if i == j {
                    assert_eq!(a.cmp(b), Ordering::Equal);
                    continue;
                }
                let a_lt_b = a < b;
                let b_lt_a = b < a;
                assert!(a_lt_b ^ b_lt_a, "{a:?} vs {b:?}");
                assert_eq!(a_lt_b, i < j);
            }
        }
    }

    #[test]
    fn gender_accepts_names_and_codes() {
        let g: Gender = serde_json::from_str("\"female\"").unwrap();
        assert_eq!(g, Gender::Female);
        let g: Gender = serde_json::from_str("0").unwrap();
        assert_eq!(g, Gender::Male);
        assert!(serde_json::from_str::<Gender>("2").is_err());
        assert!(serde_json::from_str::<Gender>("\"other\"").is_err());
    }

    #[test]
    fn date_of_birth_accepts_timestamp_or_date() {
        assert_eq!(
            flexible_date::parse("1990-05-17T00:00:00.000Z").unwrap(),
            NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()
        );
        assert_eq!(
            flexible_date::parse("1990-05-17").unwrap(),
            NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()
        );
        assert!(flexible_date::parse("17/05/1990").is_err());
    }

    #[test]
    fn password_hash_is_never_serialised() {
        let user = User {
            id: UserId(1),
            supervisor_id: None,
            email: "a@b.com".into(),
            professional_id: None,
            nhs_number: Some(4_857_773_456),
            password_hash: "secret".into(),
            access_level: AccessLevel::Patient,
            name: "Ann".into(),
            surname: "Lee".into(),
            gender: Gender::Female,
            is_black: false,
            date_of_birth: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"nhsNumber\":4857773456"));
    }
}
