//! Request builders for every API route the client calls.

use crate::forms::{Credentials, PlaylistDraft, PlaylistEdit, ProfileUpdate, RegisterForm, VideoDraft, VideoEdit, VideoQuery};
use crate::model::{PlaylistId, UserId, VideoId};
use crate::session::RefreshToken;
use crate::transport::{ApiRequest, FileUpload, MultipartForm};
use serde_json::json;

// users

pub(crate) fn login(credentials: &Credentials) -> ApiRequest {
    ApiRequest::post("/users/login")
        .json(credentials.to_json())
        .without_renewal()
}

pub(crate) fn register(form: &RegisterForm) -> ApiRequest {
    ApiRequest::post("/users/register")
        .multipart(form.to_multipart())
        .unbounded()
        .without_renewal()
}

pub(crate) fn logout() -> ApiRequest {
    ApiRequest::post("/users/logout").without_renewal()
}

pub(crate) fn refresh_token(token: Option<&RefreshToken>) -> ApiRequest {
    let request = ApiRequest::post("/users/refresh_token").without_renewal();
    match token {
        Some(token) => request.json(json!({ "refreshToken": token.secret() })),
        // The server falls back to its http-only cookie.
        None => request,
    }
}

pub(crate) fn current_user() -> ApiRequest {
    ApiRequest::get("/users/current-user")
}

pub(crate) fn update_account(update: &ProfileUpdate) -> ApiRequest {
    ApiRequest::patch("/users/update-account").json(update.to_json())
}

pub(crate) fn avatar(file: FileUpload) -> ApiRequest {
    ApiRequest::patch("/users/avatar")
        .multipart(MultipartForm::new().file("avatar", file))
        .unbounded()
}

pub(crate) fn cover_image(file: FileUpload) -> ApiRequest {
    ApiRequest::patch("/users/cover-image")
        .multipart(MultipartForm::new().file("coverImage", file))
        .unbounded()
}

pub(crate) fn channel(username: &str) -> ApiRequest {
    ApiRequest::get(format!("/users/c/{username}"))
}

// videos

pub(crate) fn videos(query: &VideoQuery) -> ApiRequest {
    let mut request = ApiRequest::get("/videos");
    request.query = query.query_params();
    request
}

pub(crate) fn video(id: &VideoId) -> ApiRequest {
    ApiRequest::get(format!("/videos/{id}"))
}

pub(crate) fn upload_video(draft: &VideoDraft) -> ApiRequest {
    ApiRequest::post("/videos")
        .multipart(draft.to_multipart())
        .unbounded()
}

pub(crate) fn update_video(id: &VideoId, edit: &VideoEdit) -> ApiRequest {
    ApiRequest::patch(format!("/videos/{id}"))
        .multipart(edit.to_multipart())
        .unbounded()
}

pub(crate) fn delete_video(id: &VideoId) -> ApiRequest {
    ApiRequest::delete(format!("/videos/{id}"))
}

// playlists

pub(crate) fn create_playlist(draft: &PlaylistDraft) -> ApiRequest {
    let mut body = json!({ "name": draft.name, "description": draft.description });
    if let Some(video) = &draft.first_video {
        body["videoId"] = json!(video.as_str());
    }
    ApiRequest::post("/playlist/create").json(body)
}

pub(crate) fn user_playlists(user: &UserId) -> ApiRequest {
    ApiRequest::get(format!("/playlist/user/{user}"))
}

pub(crate) fn playlist(id: &PlaylistId) -> ApiRequest {
    ApiRequest::get(format!("/playlist/{id}"))
}

pub(crate) fn add_video_to_playlist(video: &VideoId, playlist: &PlaylistId) -> ApiRequest {
    ApiRequest::patch(format!("/playlist/add/{video}/{playlist}"))
}

pub(crate) fn remove_video_from_playlist(video: &VideoId, playlist: &PlaylistId) -> ApiRequest {
    ApiRequest::patch(format!("/playlist/remove/{video}/{playlist}"))
}

pub(crate) fn update_playlist(id: &PlaylistId, edit: &PlaylistEdit) -> ApiRequest {
    ApiRequest::patch(format!("/playlist/{id}")).json(edit.to_json())
}

pub(crate) fn delete_playlist(id: &PlaylistId) -> ApiRequest {
    ApiRequest::delete(format!("/playlist/{id}"))
}

// subscriptions

pub(crate) fn toggle_subscription(channel: &UserId) -> ApiRequest {
    ApiRequest::post(format!("/subscriptions/c/{channel}"))
}

pub(crate) fn subscribed_channels(subscriber: &UserId) -> ApiRequest {
    ApiRequest::get(format!("/subscriptions/u/{subscriber}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RequestBody, RequestTimeout};
    use http::Method;
    use pretty_assertions::assert_eq;

    #[test]
    fn auth_routes_never_renew() {
        let credentials = Credentials::username("alice", "pw");
        for request in [
            login(&credentials),
            logout(),
            refresh_token(None),
        ] {
            assert!(!request.renew_on_unauthorized, "{}", request.path);
        }
        assert!(current_user().renew_on_unauthorized);
    }

    #[test]
    fn uploads_are_unbounded() {
        let draft = VideoDraft {
            title: "t".into(),
            description: "d".into(),
            video: FileUpload::new("a.mp4", vec![0u8; 4]),
            thumbnail: FileUpload::new("a.png", vec![0u8; 4]),
        };
        let request = upload_video(&draft);
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.timeout, RequestTimeout::Unbounded);
        assert_eq!(video(&VideoId::new("v1")).timeout, RequestTimeout::Default);
    }

    #[test]
    fn playlist_membership_paths() {
        let request = add_video_to_playlist(&VideoId::new("v1"), &PlaylistId::new("p1"));
        assert_eq!(request.method, Method::PATCH);
        assert_eq!(request.path, "/playlist/add/v1/p1");
        assert_eq!(
            remove_video_from_playlist(&VideoId::new("v1"), &PlaylistId::new("p1")).path,
            "/playlist/remove/v1/p1"
        );
    }

    #[test]
    fn refresh_sends_token_when_known() {
        let request = refresh_token(Some(&RefreshToken::new("r1")));
        assert_eq!(
            request.body,
            RequestBody::Json(json!({ "refreshToken": "r1" }))
        );
        assert_eq!(refresh_token(None).body, RequestBody::Empty);
    }

    #[test]
    fn create_playlist_with_first_video() {
        let draft = PlaylistDraft {
            name: "Later".into(),
            description: "watch later".into(),
            first_video: Some(VideoId::new("v9")),
        };
        assert_eq!(
            create_playlist(&draft).body,
            RequestBody::Json(json!({
                "name": "Later",
                "description": "watch later",
                "videoId": "v9"
            }))
        );
    }
}
