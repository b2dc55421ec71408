//! Derived views that combine several store operations.

use crate::error::ApiError;
use crate::forms::VideoQuery;
use crate::model::{ChannelProfile, Playlist, PlaylistId, SubscriptionEdge, User, Video, VideoId, VideoPage};
use crate::store::EntityStore;
use tokio::task::JoinSet;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewError {
    /// The channel could not be loaded, so nothing that depends on it was requested.
    #[error("channel {username:?} is unavailable")]
    ChannelUnavailable {
        username: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A playlist together with the videos it references.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistDetail {
    pub playlist: Playlist,
    /// In playlist order.
    pub videos: Vec<Video>,
    /// Referenced videos that could not be loaded.
    pub unavailable: Vec<VideoId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPage {
    pub channel: ChannelProfile,
    pub videos: VideoPage,
}

/// A channel the signed-in user follows.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribedChannel {
    pub edge: SubscriptionEdge,
    /// The channel's user record, if cached.
    pub channel: Option<User>,
}

#[derive(Debug, Clone)]
pub struct QueryCoordinator {
    store: EntityStore,
}

impl QueryCoordinator {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Cached videos other than `current`, in the order they were first cached.
    pub fn recommended_videos(&self, current: &VideoId) -> Vec<Video> {
        self.store
            .snapshot()
            .videos()
            .filter(|video| &video.id != current)
            .cloned()
            .collect()
    }

    /// Loads a playlist and its videos, fetching only what is not cached yet.
    #[instrument(skip(self))]
    pub async fn playlist_detail(&self, id: PlaylistId) -> Result<PlaylistDetail, ViewError> {
        let cached = self.store.snapshot().playlist(&id).cloned();
        let playlist = match cached {
            Some(playlist) => playlist,
            None => self.store.fetch_playlist(id.clone()).await?,
        };

        let missing: Vec<VideoId> = {
            let snapshot = self.store.snapshot();
            playlist
                .videos
                .iter()
                .filter(|video| snapshot.video(video).is_none())
                .cloned()
                .collect()
        };
        let mut fetches = JoinSet::new();
        for video in missing {
            let store = self.store.clone();
            fetches.spawn(async move {
                let result = store.fetch_video(video.clone()).await;
                (video, result)
            });
        }
        let mut unavailable = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((video, Err(e))) => {
                    tracing::warn!(video_id = %video, error = %e, "playlist video unavailable");
                    unavailable.push(video);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "playlist video fetch task failed");
                }
            }
        }

        let snapshot = self.store.snapshot();
        let playlist = snapshot.playlist(&id).cloned().unwrap_or(playlist);
        let videos = playlist
            .videos
            .iter()
            .filter_map(|video| snapshot.video(video).cloned())
            .collect();
        unavailable.retain(|video| playlist.videos.contains(video));
        unavailable.sort_by_key(|video| playlist.videos.iter().position(|v| v == video));
        Ok(PlaylistDetail {
            playlist,
            videos,
            unavailable,
        })
    }

    /// Loads a channel and then its videos.
    ///
    /// The video listing is only requested once the channel resolved to an id.
    #[instrument(skip(self))]
    pub async fn channel_page(&self, username: &str, query: VideoQuery) -> Result<ChannelPage, ViewError> {
        let channel = match self.store.fetch_channel(username).await {
            Ok(channel) if !channel.user.id.is_blank() => channel,
            Ok(_) => {
                return Err(ViewError::ChannelUnavailable {
                    username: username.to_string(),
                    source: ApiError::MissingIdentifier("channel id"),
                });
            }
            Err(source) => {
                return Err(ViewError::ChannelUnavailable {
                    username: username.to_string(),
                    source,
                });
            }
        };
        let videos = self
            .store
            .fetch_videos(query.owned_by(channel.user.id.clone()))
            .await?;
        Ok(ChannelPage { channel, videos })
    }

    /// Channels the signed-in user follows, as far as the cache knows.
    pub fn subscribed_channels(&self) -> Vec<SubscribedChannel> {
        let Some(user) = self.store.session().current_user() else {
            return Vec::new();
        };
        let snapshot = self.store.snapshot();
        snapshot
            .subscriptions_of(&user.id)
            .into_iter()
            .map(|edge| SubscribedChannel {
                edge: edge.clone(),
                channel: snapshot.user(&edge.channel_id).cloned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::mock::MockTransport;
    use crate::model::UserId;
    use crate::store::test_support::{logged_in_store, store};
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn recommended_excludes_current_in_insertion_order() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(
            Method::GET,
            "/videos",
            json!([{"_id": "v3"}, {"_id": "v1"}, {"_id": "v2"}]),
        )
        .await;
        store.fetch_videos(VideoQuery::default()).await.unwrap();

        let queries = QueryCoordinator::new(store);
        let ids: Vec<_> = queries
            .recommended_videos(&VideoId::new("v1"))
            .into_iter()
            .map(|video| video.id.to_string())
            .collect();
        assert_eq!(ids, vec!["v3", "v2"]);
        // no network involved
        assert_eq!(mock.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn playlist_detail_fetches_only_uncached_videos() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos/v1", json!({"_id": "v1", "title": "One"}))
            .await;
        store.fetch_video(VideoId::new("v1")).await.unwrap();

        mock.expect_ok(
            Method::GET,
            "/playlist/p1",
            json!({"_id": "p1", "name": "Mix", "videos": ["v1", "v2", "v3"]}),
        )
        .await;
        mock.expect_ok(Method::GET, "/videos/v2", json!({"_id": "v2", "title": "Two"}))
            .await;
        mock.expect(
            Method::GET,
            "/videos/v3",
            Err(TransportError::status(404, "Video not found")),
        )
        .await;

        let detail = QueryCoordinator::new(store)
            .playlist_detail(PlaylistId::new("p1"))
            .await
            .unwrap();
        let titles: Vec<_> = detail
            .videos
            .iter()
            .map(|video| video.title.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["One", "Two"]);
        assert_eq!(detail.unavailable, vec![VideoId::new("v3")]);
        assert_eq!(mock.calls_to(Method::GET, "/videos/v1").await.len(), 1);
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn channel_failure_skips_dependent_fetch() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect(
            Method::GET,
            "/users/c/ghost",
            Err(TransportError::status(404, "channel does not exists")),
        )
        .await;

        let err = QueryCoordinator::new(store)
            .channel_page("ghost", VideoQuery::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ViewError::ChannelUnavailable {
                username: "ghost".into(),
                source: ApiError::NotFound("channel does not exists".into()),
            }
        );
        assert!(mock.calls_to(Method::GET, "/videos").await.is_empty());
    }

    #[tokio::test]
    async fn channel_page_filters_by_channel_id() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(
            Method::GET,
            "/users/c/bob",
            json!({"_id": "u2", "username": "bob", "subscribersCount": 1}),
        )
        .await;
        mock.expect_ok(Method::GET, "/videos", json!([{"_id": "v5", "owner": "u2"}]))
            .await;

        let page = QueryCoordinator::new(store)
            .channel_page("bob", VideoQuery::default().page(1))
            .await
            .unwrap();
        assert_eq!(page.channel.user.username, "bob");
        assert_eq!(page.videos.videos.len(), 1);
        let calls = mock.calls_to(Method::GET, "/videos").await;
        assert!(calls[0].query.contains(&("userId".to_string(), "u2".to_string())));
    }

    #[tokio::test]
    async fn subscribed_channels_come_from_cache() {
        let mock = MockTransport::new();
        let store = logged_in_store(&mock).await;
        mock.expect_ok(
            Method::GET,
            "/subscriptions/u/u1",
            json!([{"channel": {"_id": "u3", "username": "carol"}}, {"channel": "u4"}]),
        )
        .await;
        store.fetch_subscriptions(UserId::new("u1")).await.unwrap();

        let channels = QueryCoordinator::new(store).subscribed_channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].channel.as_ref().unwrap().username, "carol");
        assert_eq!(channels[1].edge.channel_id, UserId::new("u4"));
        assert!(channels[1].channel.is_none());
    }
}
