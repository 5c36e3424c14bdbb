use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{SessionError, SessionErrorCategory},
    types::UserProfile,
};

/// User record as returned by the remote lookup endpoint.
///
/// Each spelling gets its own field; payloads often carry several at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteUser {
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "_id")]
    object_id: Option<Value>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    is_bot: Option<bool>,
    #[serde(default)]
    bot: Option<bool>,
}

impl RemoteUser {
    fn resolved_id(&self) -> Option<String> {
        [&self.user_id, &self.id, &self.object_id]
            .into_iter()
            .find_map(|value| value.as_ref().and_then(id_to_string))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserEnvelope {
    User { user: RemoteUser },
    Data { data: RemoteUser },
    Bare(RemoteUser),
}

impl UserEnvelope {
    fn into_user(self) -> RemoteUser {
        match self {
            Self::User { user } => user,
            Self::Data { data } => data,
            Self::Bare(user) => user,
        }
    }
}

/// Reshape a lookup response body into a [`UserProfile`].
///
/// `requested_user_id` fills in the identifier when the payload omits it.
pub fn normalize_user_profile(
    requested_user_id: &str,
    body: &[u8],
) -> Result<UserProfile, SessionError> {
    let envelope = serde_json::from_slice::<UserEnvelope>(body).map_err(|err| {
        SessionError::new(
            SessionErrorCategory::Serialization,
            "profile_deserialize_error",
            err.to_string(),
        )
    })?;
    let user = envelope.into_user();

    let user_id = user
        .resolved_id()
        .unwrap_or_else(|| requested_user_id.to_owned());

    let display_name = non_empty(user.display_name).or_else(|| non_empty(user.name));
    let username = non_empty(user.username)
        .or_else(|| non_empty(user.user_name))
        .or_else(|| display_name.clone())
        .ok_or_else(|| {
            SessionError::new(
                SessionErrorCategory::Serialization,
                "profile_incomplete",
                format!("user '{user_id}' has neither a username nor a display name"),
            )
        })?;
    let name = display_name.unwrap_or_else(|| username.clone());

    Ok(UserProfile {
        user_id,
        name,
        image_url: non_empty(user.avatar_url)
            .or_else(|| non_empty(user.image_url))
            .or_else(|| non_empty(user.image)),
        username,
        bio: non_empty(user.bio),
        bot: user.is_bot.or(user.bot).unwrap_or(false),
    })
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_owned()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshapes_wrapped_payload_with_aliases() {
        let body = br#"{
            "user": {
                "userId": "u-1",
                "displayName": "Alice",
                "username": "alice",
                "avatarUrl": "https://cdn.example.com/a.png",
                "bio": "  ",
                "isBot": false
            }
        }"#;

        let profile = normalize_user_profile("u-1", body).expect("payload should normalize");
        assert_eq!(
            profile,
            UserProfile {
                user_id: "u-1".into(),
                name: "Alice".into(),
                image_url: Some("https://cdn.example.com/a.png".into()),
                username: "alice".into(),
                bio: None,
                bot: false,
            }
        );
    }

    #[test]
    fn accepts_bare_and_data_payloads() {
        let bare = br#"{"id": 42, "name": "Helper", "username": "helper", "bot": true}"#;
        let profile = normalize_user_profile("42", bare).expect("bare payload should normalize");
        assert_eq!(profile.user_id, "42");
        assert!(profile.bot);

        let data = br#"{"data": {"username": "bob", "imageUrl": ""}}"#;
        let profile = normalize_user_profile("u-2", data).expect("data payload should normalize");
        assert_eq!(profile.user_id, "u-2");
        assert_eq!(profile.name, "bob");
        assert_eq!(profile.image_url, None);
    }

    #[test]
    fn payloads_with_several_spellings_pick_the_preferred_one() {
        let body = br#"{"id": "u1", "userId": "u1", "name": "Ada", "username": "ada"}"#;
        let profile = normalize_user_profile("u1", body).expect("mixed ids should normalize");
        assert_eq!(profile.user_id, "u1");
        assert_eq!(profile.name, "Ada");

        let body = br#"{
            "data": {
                "_id": "mongo-1",
                "userId": "u1",
                "name": "Ada",
                "displayName": "Ada L",
                "username": "ada",
                "image": "https://cdn.example.com/old.png",
                "imageUrl": "https://cdn.example.com/new.png",
                "bot": true,
                "isBot": false
            }
        }"#;
        let profile = normalize_user_profile("u1", body).expect("mixed names should normalize");
        assert_eq!(
            profile,
            UserProfile {
                user_id: "u1".into(),
                name: "Ada L".into(),
                image_url: Some("https://cdn.example.com/new.png".into()),
                username: "ada".into(),
                bio: None,
                bot: false,
            }
        );
    }

    #[test]
    fn blank_preferred_spelling_falls_through() {
        let body = br#"{
            "userId": " ",
            "id": 7,
            "displayName": "",
            "name": "Seven",
            "userName": "seven"
        }"#;
        let profile = normalize_user_profile("x", body).expect("payload should normalize");
        assert_eq!(profile.user_id, "7");
        assert_eq!(profile.name, "Seven");
        assert_eq!(profile.username, "seven");
    }

    #[test]
    fn rejects_payload_without_any_name() {
        let err = normalize_user_profile("u-3", br#"{"id": "u-3"}"#)
            .expect_err("nameless payload must fail");
        assert_eq!(err.code, "profile_incomplete");
    }

    #[test]
    fn rejects_non_json_body() {
        let err =
            normalize_user_profile("u-4", b"<html>").expect_err("html body must fail to parse");
        assert_eq!(err.code, "profile_deserialize_error");
        assert_eq!(err.category, SessionErrorCategory::Serialization);
    }
}
