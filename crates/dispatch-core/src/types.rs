//! Core types for pickup dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(pub i64);

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DriverId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(DriverId)
    }
}

/// Fields supplied by the dispatcher when posting a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub food_type: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

impl NewJob {
    pub fn new(title: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            location: location.into(),
            ..Self::default()
        }
    }

    /// Trim required fields and collapse blank optional ones.
    pub fn normalized(&self) -> NewJob {
        NewJob {
            title: self.title.trim().to_string(),
            location: self.location.trim().to_string(),
            food_type: non_blank(&self.food_type),
            expires_at: non_blank(&self.expires_at),
            contact_name: non_blank(&self.contact_name),
            contact_phone: non_blank(&self.contact_phone),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A surplus-food pickup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub location: String,
    #[serde(default)]
    pub food_type: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub contact_phone: String,
    pub status: JobStatus,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build the initial record for a freshly inserted job.
    pub fn posted(id: JobId, spec: &NewJob, at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: spec.title.clone(),
            location: spec.location.clone(),
            food_type: spec.food_type.clone().unwrap_or_default(),
            expires_at: spec.expires_at.clone(),
            contact_name: spec.contact_name.clone().unwrap_or_default(),
            contact_phone: spec.contact_phone.clone().unwrap_or_default(),
            status: JobStatus::Open,
            claimed_by: None,
            photo_path: None,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Volunteer driver on the SMS roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewDriver {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

impl NewDriver {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
        }
    }
}
