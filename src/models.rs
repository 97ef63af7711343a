use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability tier. Admin is a superset of staff.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    /// True when an identity holding `self` may enter a view that requires `required`.
    pub fn satisfies(self, required: Role) -> bool {
        matches!(
            (self, required),
            (Role::Admin, _) | (Role::Staff, Role::Staff)
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::Staff => f.write_str("staff"),
        }
    }
}

/// Authenticated identity, persisted as a single record in the session store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: String,
    pub username: String,
    pub role: Role,
    /// Opaque bearer token.
    pub credential: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Fields a caller may overwrite on the current identity. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub username: Option<String>,
    pub role: Option<Role>,
    pub credential: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl IdentityUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.role.is_none()
            && self.credential.is_none()
            && self.email.is_none()
            && self.phone.is_none()
    }

    pub(crate) fn apply_to(self, identity: &mut Identity) {
        if let Some(username) = self.username {
            identity.username = username;
        }
        if let Some(role) = self.role {
            identity.role = role;
        }
        if let Some(credential) = self.credential {
            identity.credential = credential;
        }
        if let Some(email) = self.email {
            identity.email = Some(email);
        }
        if let Some(phone) = self.phone {
            identity.phone = Some(phone);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStage {
    AwaitingCode,
}

/// In-memory second-factor challenge. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLoginChallenge {
    pub subject_id: String,
    pub stage: ChallengeStage,
    /// Failed code submissions so far. Informational; the server enforces limits.
    pub attempts: u32,
}

/// Typed reply of `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    Success(Identity),
    NeedsSecondFactor { subject_id: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockMedia {
    pub href: String,
}

/// Vehicle from the external inventory feed. Plate is the join key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: String,
    pub registration_plate: String,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub derivative: String,
    #[serde(default)]
    pub mileage: u64,
    #[serde(default)]
    pub media: Vec<StockMedia>,
}

/// Body of `GET /autotrader/stock`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    pub results: Vec<StockItem>,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: Option<String>,
    #[serde(default)]
    pub total_vehicles: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub registration: Option<String>,
}

/// Uploaded walkthrough video. Linked to stock only through its title text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    pub uploader_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u64,
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_details: Option<VehicleDetails>,
}

// --- Wire DTOs for the auth endpoints ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Raw `POST /auth/login` body; converted into `LoginReply` at the client boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_two_factor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub user_id: String,
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub current_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
}

/// `PUT /auth/profile` reply: the fields the server changed, plus a message.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ProfileResponseBody {
    pub fn into_update(self) -> IdentityUpdate {
        IdentityUpdate {
            username: self.username,
            role: None,
            credential: self.token,
            email: self.email,
            phone: self.phone,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Error payload shape shared by every endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        assert!(Role::Admin.satisfies(Role::Staff));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Staff.satisfies(Role::Staff));
        assert!(!Role::Staff.satisfies(Role::Admin));
    }

    #[test]
    fn test_identity_update_only_touches_supplied_fields() {
        let mut identity = Identity {
            subject_id: "u1".to_string(),
            username: "staff1".to_string(),
            role: Role::Staff,
            credential: "tok".to_string(),
            email: Some("a@example.com".to_string()),
            phone: None,
        };
        IdentityUpdate {
            username: Some("renamed".to_string()),
            ..Default::default()
        }
        .apply_to(&mut identity);

        assert_eq!(identity.username, "renamed");
        assert_eq!(identity.credential, "tok");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
        assert_eq!(identity.phone, None);
    }

    #[test]
    fn test_video_record_accepts_mongo_style_id() {
        let json = serde_json::json!({
            "_id": "v1",
            "title": "Ford Focus - AB12CDE",
            "uploaderId": "u1",
            "createdAt": "2025-01-02T03:04:05Z",
            "videoUrl": "https://cdn.example.com/v1.mp4"
        });
        let video: VideoRecord = serde_json::from_value(json).unwrap();
        assert_eq!(video.id, "v1");
        assert_eq!(video.view_count, 0);
        assert!(video.vehicle_details.is_none());
    }
}
