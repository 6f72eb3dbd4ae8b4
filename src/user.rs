//! Account profiles and the requests that create or change them.
//!
//! Some deployments send the avatar link as `profileImage`, others as
//! `profileImageUrl`. As with records, bodies are read through a wire type
//! and normalized once into [`UserProfile`].

use crate::pipeline::input::UploadFile;
use crate::record::{lenient_timestamp, non_empty, string_or_number};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user as returned by `/users/{id}` and the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireUser")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    #[serde(default, deserialize_with = "string_or_number")]
    id: Option<String>,
    email: Option<String>,
    profile_image_url: Option<String>,
    profile_image: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedUser;

impl fmt::Display for MalformedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed user: missing id")
    }
}

impl std::error::Error for MalformedUser {}

impl TryFrom<WireUser> for UserProfile {
    type Error = MalformedUser;

    fn try_from(wire: WireUser) -> Result<Self, Self::Error> {
        Ok(Self {
            id: non_empty(wire.id).ok_or(MalformedUser)?,
            email: wire.email.unwrap_or_default(),
            profile_image_url: non_empty(wire.profile_image_url)
                .or_else(|| non_empty(wire.profile_image)),
            created_at: wire.created_at,
        })
    }
}

/// Fields for `POST /auth/signup`.
#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    /// Sent as the `profileImage` multipart part.
    pub profile_image: Option<UploadFile>,
}

impl SignupRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            profile_image: None,
        }
    }

    pub fn with_profile_image(mut self, image: UploadFile) -> Self {
        self.profile_image = Some(image);
        self
    }
}

/// Body of `PATCH /users/{id}`. Unset fields are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Image URL; the endpoint does not take uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.profile_image.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_profile_image_maps_to_url() {
        let u: UserProfile =
            serde_json::from_str(r#"{"id":"u1","email":"a@b.c","profileImage":"https://cdn/a.png"}"#)
                .unwrap();
        assert_eq!(u.profile_image_url.as_deref(), Some("https://cdn/a.png"));

        let out = serde_json::to_value(&u).unwrap();
        assert!(out.get("profileImage").is_none());
        assert_eq!(out["profileImageUrl"], "https://cdn/a.png");
    }

    #[test]
    fn canonical_url_wins() {
        let u: UserProfile = serde_json::from_str(
            r#"{"id":7,"email":"a@b.c","profileImageUrl":"new.png","profileImage":"old.png"}"#,
        )
        .unwrap();
        assert_eq!(u.id, "7");
        assert_eq!(u.profile_image_url.as_deref(), Some("new.png"));
    }

    #[test]
    fn user_without_id_is_rejected() {
        assert!(serde_json::from_str::<UserProfile>(r#"{"email":"a@b.c"}"#).is_err());
    }

    #[test]
    fn update_omits_unset_fields() {
        let update = UserUpdate {
            email: Some("new@b.c".into()),
            profile_image: None,
        };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"email":"new@b.c"}"#
        );
        assert!(UserUpdate::default().is_empty());
    }
}
