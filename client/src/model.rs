//! Domain entities as the API returns them and as the store caches them.
//!
//! The server is a MongoDB-backed API: ids arrive as `_id`, references to other
//! entities arrive either as a bare id string or as an embedded (populated) object,
//! and list endpoints may or may not include every detail field. Every non-id field
//! of a cached entity is therefore optional, and [`Video::merge`] only overwrites
//! fields the incoming payload actually carries.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Identifies a user. Channels are users, so this also identifies a channel.
    UserId
);
entity_id!(VideoId);
entity_id!(PlaylistId);

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "avatar", default)]
    pub avatar_ref: Option<String>,
    #[serde(rename = "coverImage", default)]
    pub cover_image_ref: Option<String>,
}

impl User {
    /// Takes every field from `incoming`, keeping our values where `incoming` left them empty.
    pub fn merge(&mut self, incoming: User) {
        let User {
            id,
            username,
            full_name,
            email,
            avatar_ref,
            cover_image_ref,
        } = incoming;
        self.id = id;
        if !username.is_empty() {
            self.username = username;
        }
        if !full_name.is_empty() {
            self.full_name = full_name;
        }
        if !email.is_empty() {
            self.email = email;
        }
        if avatar_ref.is_some() {
            self.avatar_ref = avatar_ref;
        }
        if cover_image_ref.is_some() {
            self.cover_image_ref = cover_image_ref;
        }
    }

    /// The display fields other entities embed a copy of.
    pub fn as_owner(&self) -> Owner {
        Owner {
            id: self.id.clone(),
            username: Some(self.username.clone()).filter(|u| !u.is_empty()),
            full_name: Some(self.full_name.clone()).filter(|n| !n.is_empty()),
            avatar_ref: self.avatar_ref.clone(),
        }
    }
}

/// A denormalized copy of a user's display fields, embedded in videos and playlists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "OwnerRepr")]
pub struct Owner {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "fullName", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(rename = "avatar", skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OwnerRepr {
    Id(UserId),
    Embedded {
        #[serde(rename = "_id", alias = "id")]
        id: UserId,
        #[serde(default)]
        username: Option<String>,
        #[serde(rename = "fullName", default)]
        full_name: Option<String>,
        #[serde(rename = "avatar", default)]
        avatar_ref: Option<String>,
    },
}

impl From<OwnerRepr> for Owner {
    fn from(repr: OwnerRepr) -> Self {
        match repr {
            OwnerRepr::Id(id) => Owner {
                id,
                username: None,
                full_name: None,
                avatar_ref: None,
            },
            OwnerRepr::Embedded {
                id,
                username,
                full_name,
                avatar_ref,
            } => Owner {
                id,
                username,
                full_name,
                avatar_ref,
            },
        }
    }
}

impl Owner {
    pub fn merge(&mut self, incoming: Owner) {
        if self.id != incoming.id {
            *self = incoming;
            return;
        }
        if incoming.username.is_some() {
            self.username = incoming.username;
        }
        if incoming.full_name.is_some() {
            self.full_name = incoming.full_name;
        }
        if incoming.avatar_ref.is_some() {
            self.avatar_ref = incoming.avatar_ref;
        }
    }

    /// Whether this embedded copy describes `user`, matched by id or by username.
    pub fn describes(&self, user: &User) -> bool {
        self.id == user.id
            || (!user.username.is_empty() && self.username.as_deref() == Some(&user.username))
    }

    /// Copies the denormalized display fields from the authoritative user record.
    pub fn refresh_from(&mut self, user: &User) {
        if !user.username.is_empty() {
            self.username = Some(user.username.clone());
        }
        if !user.full_name.is_empty() {
            self.full_name = Some(user.full_name.clone());
        }
        if user.avatar_ref.is_some() {
            self.avatar_ref = user.avatar_ref.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id", alias = "id")]
    pub id: VideoId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "videoFile", default)]
    pub media_ref: Option<String>,
    #[serde(rename = "thumbnail", default)]
    pub thumbnail_ref: Option<String>,
    #[serde(rename = "duration", default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub views: Option<u64>,
    #[serde(default)]
    pub is_published: Option<bool>,
}

impl Video {
    pub fn new(id: impl Into<VideoId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
            media_ref: None,
            thumbnail_ref: None,
            duration_seconds: None,
            owner: None,
            created_at: None,
            views: None,
            is_published: None,
        }
    }

    /// Overwrites the fields `incoming` carries and keeps everything else.
    pub fn merge(&mut self, incoming: Video) {
        let Video {
            id: _,
            title,
            description,
            media_ref,
            thumbnail_ref,
            duration_seconds,
            owner,
            created_at,
            views,
            is_published,
        } = incoming;
        overwrite(&mut self.title, title);
        overwrite(&mut self.description, description);
        overwrite(&mut self.media_ref, media_ref);
        overwrite(&mut self.thumbnail_ref, thumbnail_ref);
        overwrite(&mut self.duration_seconds, duration_seconds);
        overwrite(&mut self.created_at, created_at);
        overwrite(&mut self.views, views);
        overwrite(&mut self.is_published, is_published);
        if let Some(theirs) = owner {
            if let Some(ours) = self.owner.as_mut() {
                ours.merge(theirs);
            } else {
                self.owner = Some(theirs);
            }
        }
    }
}

fn overwrite<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

/// A reference to a video as it appears inside a playlist payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VideoRef {
    Id(VideoId),
    Embedded(Box<Video>),
}

impl VideoRef {
    pub fn id(&self) -> &VideoId {
        match self {
            VideoRef::Id(id) => id,
            VideoRef::Embedded(video) => &video.id,
        }
    }
}

/// A playlist as the store caches it: video references only, never copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub description: String,
    /// Ordered and free of duplicates.
    pub videos: Vec<VideoId>,
    pub owner: Option<Owner>,
    pub updated_at: Option<Timestamp>,
}

impl Playlist {
    /// Appends `video` unless the playlist already references it.
    ///
    /// Returns whether the playlist changed.
    pub fn add_video(&mut self, video: VideoId) -> bool {
        if self.videos.contains(&video) {
            return false;
        }
        self.videos.push(video);
        true
    }

    pub fn remove_video(&mut self, video: &VideoId) -> bool {
        let before = self.videos.len();
        self.videos.retain(|v| v != video);
        before != self.videos.len()
    }
}

/// A playlist as the API returns it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPayload {
    #[serde(rename = "_id", alias = "id")]
    pub id: PlaylistId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub videos: Option<Vec<VideoRef>>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl PlaylistPayload {
    /// Splits the payload into the playlist record and any video bodies it embedded.
    ///
    /// Fields the payload lacks are taken from `cached`.
    pub fn into_parts(self, cached: Option<&Playlist>) -> (Playlist, Vec<Video>) {
        let mut embedded = Vec::new();
        let videos = match self.videos {
            Some(refs) => {
                let mut ids: Vec<VideoId> = Vec::with_capacity(refs.len());
                for video in refs {
                    let id = video.id().clone();
                    if let VideoRef::Embedded(body) = video {
                        embedded.push(*body);
                    }
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                ids
            }
            None => cached.map(|p| p.videos.clone()).unwrap_or_default(),
        };
        let playlist = Playlist {
            name: self
                .name
                .or_else(|| cached.map(|p| p.name.clone()))
                .unwrap_or_default(),
            description: self
                .description
                .or_else(|| cached.map(|p| p.description.clone()))
                .unwrap_or_default(),
            owner: match (self.owner, cached.and_then(|p| p.owner.clone())) {
                (Some(theirs), Some(mut ours)) => {
                    ours.merge(theirs);
                    Some(ours)
                }
                (theirs, ours) => theirs.or(ours),
            },
            updated_at: self.updated_at.or_else(|| cached.and_then(|p| p.updated_at)),
            id: self.id,
            videos,
        };
        (playlist, embedded)
    }
}

/// "`subscriber` follows `channel`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEdge {
    pub subscriber_id: UserId,
    pub channel_id: UserId,
    pub subscribed_at: Option<Timestamp>,
}

/// Counters the channel page shows next to the channel's user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    #[serde(default)]
    pub subscribers_count: u64,
    #[serde(default)]
    pub channels_subscribed_to_count: u64,
    #[serde(default)]
    pub is_subscribed: bool,
}

/// A user viewed as a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProfile {
    #[serde(flatten)]
    pub user: User,
    #[serde(flatten)]
    pub stats: ChannelStats,
}

/// One page of a video listing.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPage {
    pub videos: Vec<Video>,
    pub page: u32,
    pub next_page: Option<u32>,
    pub total: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VideoPageRepr {
    Paged {
        docs: Vec<Video>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(rename = "hasNextPage", default)]
        has_next_page: bool,
        #[serde(rename = "nextPage", default)]
        next_page: Option<u32>,
        #[serde(rename = "totalDocs", default)]
        total_docs: Option<u64>,
    },
    Plain(Vec<Video>),
}

impl VideoPage {
    /// Accepts both the paginated `{ docs, page, hasNextPage, nextPage }` shape and a bare array.
    pub fn from_value(value: serde_json::Value, requested_page: u32) -> serde_json::Result<Self> {
        Ok(match serde_json::from_value::<VideoPageRepr>(value)? {
            VideoPageRepr::Paged {
                docs,
                page,
                has_next_page,
                next_page,
                total_docs,
            } => {
                let page = page.unwrap_or(requested_page);
                VideoPage {
                    videos: docs,
                    page,
                    next_page: if has_next_page {
                        Some(next_page.unwrap_or(page + 1))
                    } else {
                        None
                    },
                    total: total_docs,
                }
            }
            VideoPageRepr::Plain(videos) => VideoPage {
                total: Some(videos.len() as u64),
                videos,
                page: requested_page,
                next_page: None,
            },
        })
    }
}

/// One entry of a subscriber's channel list, in any of the shapes the API uses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum SubscribedChannelRepr {
    Edge {
        #[serde(alias = "subscribedChannel")]
        channel: ChannelRef,
        #[serde(rename = "createdAt", default)]
        created_at: Option<Timestamp>,
    },
    Channel(User),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum ChannelRef {
    Id(UserId),
    User(User),
}

impl SubscribedChannelRepr {
    /// The channel's id, the channel's user record if embedded, and when the edge was created.
    pub(crate) fn into_parts(self) -> (UserId, Option<User>, Option<Timestamp>) {
        match self {
            SubscribedChannelRepr::Edge {
                channel: ChannelRef::Id(id),
                created_at,
            } => (id, None, created_at),
            SubscribedChannelRepr::Edge {
                channel: ChannelRef::User(user),
                created_at,
            } => (user.id.clone(), Some(user), created_at),
            SubscribedChannelRepr::Channel(user) => (user.id.clone(), Some(user), None),
        }
    }
}
