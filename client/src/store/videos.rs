use super::paging::VideoStream;
use super::{CacheState, EntityKey, EntityStore, VideoList, require};
use crate::endpoints;
use crate::error::ApiError;
use crate::forms::{VideoDraft, VideoEdit, VideoQuery};
use crate::lifecycle::{EntityKind, OperationKind};
use crate::model::{Video, VideoId, VideoPage};
use tracing::instrument;

impl CacheState {
    /// Replaces the membership of one listing and merges each listed video.
    fn put_video_list(&mut self, seq: u64, query: &VideoQuery, page: &VideoPage) {
        if !self.admit(EntityKey::VideoList(query.clone()), seq) {
            return;
        }
        for video in &page.videos {
            self.put_video(seq, video);
        }
        self.video_lists.insert(
            query.clone(),
            VideoList {
                ids: page.videos.iter().map(|video| video.id.clone()).collect(),
                page: page.page,
                next_page: page.next_page,
                total: page.total,
            },
        );
    }

    /// Drops the cached copy of a video the server no longer knows.
    ///
    /// Listings and playlists still name it until they are refetched or the delete is confirmed.
    fn evict_video(&mut self, seq: u64, id: &VideoId) {
        if self.admit(EntityKey::Video(id.clone()), seq) {
            self.videos.shift_remove(id);
        }
    }

    /// Drops a video and every reference to it.
    fn remove_video(&mut self, seq: u64, id: &VideoId) {
        if !self.admit(EntityKey::Video(id.clone()), seq) {
            return;
        }
        self.videos.shift_remove(id);
        for list in self.video_lists.values_mut() {
            list.ids.retain(|listed| listed != id);
        }
        for playlist in self.playlists.values_mut() {
            playlist.remove_video(id);
        }
    }
}

impl EntityStore {
    /// Fetches one page of videos matching `query`.
    #[instrument(skip(self))]
    pub async fn fetch_videos(&self, query: VideoQuery) -> Result<VideoPage, ApiError> {
        let ticket = self.issue(EntityKind::Video, OperationKind::FetchList);
        let result = self.send(endpoints::videos(&query)).await.and_then(|response| {
            VideoPage::from_value(response.data, query.requested_page())
                .map_err(|e| ApiError::decode("video list", e))
        });
        let page = self.complete(ticket, result, |state, seq, page| {
            state.put_video_list(seq, &query, page);
        })?;
        tracing::debug!(count = page.videos.len(), page = page.page, next = ?page.next_page, "fetched videos");
        Ok(page)
    }

    /// Every video matching `query`, starting at its page, fetched one page at a time.
    pub fn stream_videos(&self, query: VideoQuery) -> VideoStream {
        VideoStream::new(self.clone(), query)
    }

    #[instrument(skip(self))]
    pub async fn fetch_video(&self, id: VideoId) -> Result<Video, ApiError> {
        require(id.is_blank(), "video id")?;
        let ticket = self.issue_for(EntityKind::Video, OperationKind::FetchOne, &id);
        let result = self
            .send(endpoints::video(&id))
            .await
            .and_then(|response| response.decode::<Video>("video"));
        let video = self.complete_or(
            ticket,
            result,
            |state, seq, video| {
                state.put_video(seq, video);
            },
            |state, seq, e| {
                if matches!(e, ApiError::NotFound(_)) {
                    state.evict_video(seq, &id);
                }
            },
        )?;
        tracing::debug!(video_id = %video.id, "fetched video");
        Ok(video)
    }

    /// Uploads a new video. The request has no timeout.
    #[instrument(skip(self))]
    pub async fn upload_video(&self, draft: VideoDraft) -> Result<Video, ApiError> {
        let ticket = self.issue(EntityKind::Video, OperationKind::Upload);
        let result = self
            .send(endpoints::upload_video(&draft))
            .await
            .and_then(|response| response.decode::<Video>("uploaded video"));
        let video = self.complete(ticket, result, |state, seq, video| {
            state.put_video(seq, video);
        })?;
        tracing::debug!(video_id = %video.id, "uploaded video");
        Ok(video)
    }

    #[instrument(skip(self))]
    pub async fn update_video(&self, id: VideoId, edit: VideoEdit) -> Result<Video, ApiError> {
        require(id.is_blank(), "video id")?;
        let ticket = self.issue_for(EntityKind::Video, OperationKind::Update, &id);
        let result = self
            .send(endpoints::update_video(&id, &edit))
            .await
            .and_then(|response| response.decode::<Video>("updated video"));
        let video = self.complete_or(
            ticket,
            result,
            |state, seq, video| {
                state.put_video(seq, video);
            },
            |state, seq, e| {
                if matches!(e, ApiError::NotFound(_)) {
                    state.evict_video(seq, &id);
                }
            },
        )?;
        tracing::debug!(video_id = %video.id, "updated video");
        Ok(video)
    }

    /// Deletes a video once the server confirms it, along with every listing and
    /// playlist reference to it. A failed delete leaves the cache untouched, except that a
    /// video the server no longer knows is evicted.
    #[instrument(skip(self))]
    pub async fn delete_video(&self, id: VideoId) -> Result<(), ApiError> {
        require(id.is_blank(), "video id")?;
        let ticket = self.issue_for(EntityKind::Video, OperationKind::Delete, &id);
        let result = self.send(endpoints::delete_video(&id)).await.map(|_| ());
        self.complete_or(
            ticket,
            result,
            |state, seq, _| state.remove_video(seq, &id),
            |state, seq, e| {
                if matches!(e, ApiError::NotFound(_)) {
                    state.evict_video(seq, &id);
                }
            },
        )?;
        tracing::debug!(video_id = %id, "deleted video");
        Ok(())
    }
}
