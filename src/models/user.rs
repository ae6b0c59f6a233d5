use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Leaderboard-facing details about a user.
///
/// Identity itself comes from the auth layer; the profile only carries what
/// the leaderboard shows and the cohort used for restricted rankings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    /// Sub-population for cohort rankings, typically a university.
    pub cohort: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertProfileInput {
    pub display_name: String,
    #[serde(default)]
    pub cohort: Option<String>,
}

/// Caller role as asserted by the auth layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Recruiter,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Recruiter => "recruiter",
            Self::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "recruiter" => Some(Self::Recruiter),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A verified caller, passed explicitly into every service operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// The identity used by local CLI commands.
    pub fn operator() -> Self {
        Self::new("operator", Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether the caller may read or act on `user_id`'s own data.
    pub fn can_access(&self, user_id: &str) -> bool {
        self.is_admin() || self.user_id == user_id
    }
}
