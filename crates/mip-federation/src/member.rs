//! The local member directory and its wire projections.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A member's tie to a local chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affiliation {
    pub local_name: String,
    #[serde(default)]
    pub local_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub member_type: Option<String>,
}

/// A member record as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub member_number: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub honorific: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub birthdate: Option<String>,
    #[serde(default)]
    pub years_in_good_standing: u32,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub good_standing: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
    #[serde(default = "empty_object")]
    pub address: Value,
    #[serde(default)]
    pub affiliations: Vec<Affiliation>,
    #[serde(default)]
    pub life_cycle_events: Vec<Value>,
}

fn default_true() -> bool {
    true
}

fn default_status() -> String {
    "Active".to_string()
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Criteria of a member search: a member number, or a first and last name
/// with an optional birthdate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
}

impl SearchParams {
    /// Trims every field and drops the empty ones.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            member_number: clean(self.member_number),
            first_name: clean(self.first_name),
            last_name: clean(self.last_name),
            birthdate: clean(self.birthdate),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.member_number.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.birthdate.is_none()
    }

    /// Short human-readable summary, used in activity entries.
    pub fn description(&self) -> String {
        if let Some(number) = &self.member_number {
            return format!("Member #{number}");
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => match &self.birthdate {
                Some(birthdate) => format!("{first} {last} ({birthdate})"),
                None => format!("{first} {last}"),
            },
            _ => "Unknown search".to_string(),
        }
    }
}

impl Member {
    /// Case-insensitive substring match on the member number, or on first
    /// and last name with an exact birthdate when one is given.
    pub fn matches(&self, params: &SearchParams) -> bool {
        fn contains(haystack: &str, needle: &str) -> bool {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }

        if let Some(number) = &params.member_number {
            return contains(&self.member_number, number);
        }
        let (Some(first), Some(last)) = (&params.first_name, &params.last_name) else {
            return false;
        };
        if !contains(&self.first_name, first) || !contains(&self.last_name, last) {
            return false;
        }
        match &params.birthdate {
            Some(birthdate) => self.birthdate.as_deref() == Some(birthdate.as_str()),
            None => true,
        }
    }

    pub fn full_name(&self) -> String {
        [
            self.prefix.as_deref(),
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
            Some(self.last_name.as_str()),
            self.suffix.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// First name and last initial.
    pub fn party_short_name(&self) -> String {
        match self.last_name.chars().next() {
            Some(initial) => format!("{} {initial}", self.first_name),
            None => self.first_name.clone(),
        }
    }

    /// Member type of the first active affiliation.
    pub fn member_type(&self) -> &str {
        self.affiliations
            .iter()
            .find(|a| a.is_active)
            .and_then(|a| a.member_type.as_deref())
            .unwrap_or("Member")
    }

    pub fn to_search_result(&self) -> Value {
        let affiliations: Vec<Value> = self
            .affiliations
            .iter()
            .map(|a| {
                json!({
                    "local_name": a.local_name,
                    "local_status": a.local_status.as_ref().or(a.status.as_ref()),
                    "is_active": a.is_active,
                    "member_type": a.member_type,
                })
            })
            .collect();
        json!({
            "member_number": self.member_number,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "birthdate": self.birthdate,
            "contact": {
                "email": self.email,
                "phone": self.phone,
                "address": self.address,
            },
            "group_status": {
                "status": self.status,
                "is_active": self.is_active,
                "good_standing": self.good_standing,
            },
            "affiliations": affiliations,
        })
    }

    /// Full profile embedded in a certificate of good standing.
    pub fn to_member_profile(&self) -> Value {
        json!({
            "member_number": self.member_number,
            "prefix": self.prefix,
            "first_name": self.first_name,
            "middle_name": self.middle_name,
            "last_name": self.last_name,
            "suffix": self.suffix,
            "honorific": self.honorific,
            "rank": self.rank,
            "birthdate": self.birthdate,
            "years_in_good_standing": self.years_in_good_standing,
            "group_status": {
                "status": self.status,
                "is_active": self.is_active,
            },
            "contact": {
                "email": self.email,
                "phone": self.phone,
                "cell": self.cell,
                "address": self.address,
            },
            "affiliations": self.affiliations,
            "life_cycle_events": self.life_cycle_events,
        })
    }

    pub fn to_status_check(&self) -> Value {
        json!({
            "found": true,
            "member_number": self.member_number,
            "member_type": self.member_type(),
            "party_short_name": self.party_short_name(),
            "group_status": {
                "status": self.status,
                "is_active": self.is_active,
                "good_standing": self.good_standing,
            },
        })
    }
}
