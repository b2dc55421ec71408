//! Inputs to store operations.
//!
//! Only required identifiers are checked here; field-level validation is left to
//! whoever renders the form and to the server.

use crate::model::UserId;
use crate::transport::{FileUpload, MultipartForm};
use std::fmt;

/// How the user identifies themselves at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginId {
    Email(String),
    Username(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: LoginId,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: LoginId::Email(email.into()),
            password: password.into(),
        }
    }

    pub fn username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: LoginId::Username(username.into()),
            password: password.into(),
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match &self.login {
            LoginId::Email(email) => serde_json::json!({ "email": email, "password": self.password }),
            LoginId::Username(username) => {
                serde_json::json!({ "username": username, "password": self.password })
            }
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct RegisterForm {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: Option<FileUpload>,
    pub cover_image: Option<FileUpload>,
}

impl fmt::Debug for RegisterForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterForm")
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("avatar", &self.avatar)
            .field("cover_image", &self.cover_image)
            .finish()
    }
}

impl RegisterForm {
    pub(crate) fn to_multipart(&self) -> MultipartForm {
        let mut form = MultipartForm::new()
            .text("fullName", &self.full_name)
            .text("email", &self.email)
            .text("username", &self.username)
            .text("password", &self.password);
        if let Some(avatar) = &self.avatar {
            form = form.file("avatar", avatar.clone());
        }
        if let Some(cover) = &self.cover_image {
            form = form.file("coverImage", cover.clone());
        }
        form
    }

    pub(crate) fn credentials(&self) -> Credentials {
        Credentials::email(&self.email, &self.password)
    }
}

/// Account fields the user can edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub(crate) fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(full_name) = &self.full_name {
            body.insert("fullName".into(), full_name.clone().into());
        }
        if let Some(email) = &self.email {
            body.insert("email".into(), email.clone().into());
        }
        serde_json::Value::Object(body)
    }
}

/// A new video to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDraft {
    pub title: String,
    pub description: String,
    pub video: FileUpload,
    pub thumbnail: FileUpload,
}

impl VideoDraft {
    pub(crate) fn to_multipart(&self) -> MultipartForm {
        MultipartForm::new()
            .text("title", &self.title)
            .text("description", &self.description)
            .file("videoFile", self.video.clone())
            .file("thumbnail", self.thumbnail.clone())
    }
}

/// Changes to an existing video. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<FileUpload>,
}

impl VideoEdit {
    pub(crate) fn to_multipart(&self) -> MultipartForm {
        let mut form = MultipartForm::new();
        if let Some(title) = &self.title {
            form = form.text("title", title);
        }
        if let Some(description) = &self.description {
            form = form.text("description", description);
        }
        if let Some(thumbnail) = &self.thumbnail {
            form = form.file("thumbnail", thumbnail.clone());
        }
        form
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaylistDraft {
    pub name: String,
    pub description: String,
    /// Video to put in the playlist right away, as the "save to playlist" dialog does.
    pub first_video: Option<crate::model::VideoId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaylistEdit {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl PlaylistEdit {
    pub(crate) fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(name) = &self.name {
            body.insert("name".into(), name.clone().into());
        }
        if let Some(description) = &self.description {
            body.insert("description".into(), description.clone().into());
        }
        serde_json::Value::Object(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// Filter for video listings. Each distinct query is its own cached list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VideoQuery {
    pub owner: Option<UserId>,
    pub text: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl VideoQuery {
    pub fn owned_by(mut self, owner: impl Into<UserId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn matching(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(field.into());
        self.sort_direction = Some(direction);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn requested_page(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub(crate) fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(page) = self.page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(text) = &self.text {
            params.push(("query".to_string(), text.clone()));
        }
        if let Some(sort_by) = &self.sort_by {
            params.push(("sortBy".to_string(), sort_by.clone()));
        }
        if let Some(direction) = self.sort_direction {
            params.push(("sortType".to_string(), direction.as_str().to_string()));
        }
        if let Some(owner) = &self.owner {
            params.push(("userId".to_string(), owner.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn credentials_never_print_password() {
        let credentials = Credentials::email("a@example.com", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
        assert_eq!(
            credentials.to_json(),
            json!({"email": "a@example.com", "password": "hunter2"})
        );
    }

    #[test]
    fn profile_update_only_sends_given_fields() {
        let update = ProfileUpdate {
            full_name: Some("Alice B".into()),
            email: None,
        };
        assert_eq!(update.to_json(), json!({"fullName": "Alice B"}));
    }

    #[test]
    fn video_query_params() {
        let query = VideoQuery::default()
            .owned_by("u1")
            .matching("rust")
            .sorted_by("createdAt", SortDirection::Descending)
            .page(2)
            .limit(10);
        let owned = query.query_params();
        let params: Vec<(&str, &str)> = owned
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            params,
            vec![
                ("page", "2"),
                ("limit", "10"),
                ("query", "rust"),
                ("sortBy", "createdAt"),
                ("sortType", "desc"),
                ("userId", "u1"),
            ]
        );
    }

    #[test]
    fn video_edit_multipart_skips_unchanged_fields() {
        let edit = VideoEdit {
            title: Some("New title".into()),
            ..Default::default()
        };
        let form = edit.to_multipart();
        assert_eq!(form.parts.len(), 1);
        assert_eq!(form.text_value("title"), Some("New title"));
    }
}
