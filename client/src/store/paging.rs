//! Lazily walks every page of a video listing.

use super::EntityStore;
use crate::error::ApiError;
use crate::forms::VideoQuery;
use crate::model::{Video, VideoPage};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_stream::Stream;

type PageFetch = Pin<Box<dyn Future<Output = Result<VideoPage, ApiError>> + Send>>;

/// Yields the videos of a listing one at a time, fetching the next page only once the
/// current one is drained. Every page goes through the store and is cached under the
/// query for that page.
///
/// The stream ends after a page that names no successor, after an empty page, or right
/// after yielding the error of a failed fetch. A page that points back at itself or at
/// an earlier page also ends it.
pub struct VideoStream {
    store: EntityStore,
    query: VideoQuery,
    buffered: VecDeque<Video>,
    fetching: Option<(u32, PageFetch)>,
    next_page: Option<u32>,
}

impl VideoStream {
    pub(crate) fn new(store: EntityStore, query: VideoQuery) -> Self {
        let next_page = Some(query.requested_page());
        Self {
            store,
            query,
            buffered: VecDeque::new(),
            fetching: None,
            next_page,
        }
    }

    fn fetch(&self, page: u32) -> PageFetch {
        let store = self.store.clone();
        let query = self.query.clone().page(page);
        Box::pin(async move { store.fetch_videos(query).await })
    }
}

impl Stream for VideoStream {
    type Item = Result<Video, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(video) = self.buffered.pop_front() {
                return Poll::Ready(Some(Ok(video)));
            }
            if self.fetching.is_none() {
                let Some(page) = self.next_page.take() else {
                    return Poll::Ready(None);
                };
                let fetch = self.fetch(page);
                self.fetching = Some((page, fetch));
            }
            let Some((requested, fetch)) = self.fetching.as_mut() else {
                return Poll::Ready(None);
            };
            let requested = *requested;
            match fetch.as_mut().poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => {
                    self.fetching = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Ok(page)) => {
                    self.fetching = None;
                    if page.videos.is_empty() {
                        tracing::trace!(page = requested, "empty page ends the listing");
                        continue;
                    }
                    self.next_page = page.next_page.filter(|next| *next > requested);
                    self.buffered.extend(page.videos);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::error::{ApiError, TransportError};
    use crate::forms::VideoQuery;
    use crate::mock::MockTransport;
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn page(ids: &[&str], page: u32, next: Option<u32>) -> serde_json::Value {
        let docs: Vec<_> = ids.iter().map(|id| json!({"_id": id})).collect();
        json!({"docs": docs, "page": page, "hasNextPage": next.is_some(), "nextPage": next})
    }

    #[tokio::test]
    async fn fetches_next_page_only_when_drained() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos", page(&["v1", "v2"], 1, Some(2)))
            .await;
        mock.expect_ok(Method::GET, "/videos", page(&["v3"], 2, None)).await;

        let stream = store.stream_videos(VideoQuery::default().limit(2));
        tokio::pin!(stream);
        assert_eq!(stream.next().await.unwrap().unwrap().id.as_str(), "v1");
        assert_eq!(mock.calls_to(Method::GET, "/videos").await.len(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap().id.as_str(), "v2");
        assert_eq!(mock.calls_to(Method::GET, "/videos").await.len(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap().id.as_str(), "v3");
        assert!(stream.next().await.is_none());
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn empty_page_ends_the_stream() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos", page(&["v1"], 1, Some(2))).await;
        mock.expect_ok(Method::GET, "/videos", page(&[], 2, Some(3))).await;

        let ids: Vec<String> = store
            .stream_videos(VideoQuery::default())
            .map(|video| video.unwrap().id.to_string())
            .collect()
            .await;
        assert_eq!(ids, vec!["v1"]);
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn page_pointing_backwards_ends_the_stream() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos", page(&["v1"], 1, Some(1))).await;

        let items: Vec<_> = store.stream_videos(VideoQuery::default()).collect().await;
        assert_eq!(items.len(), 1);
        mock.verify().await.unwrap();
    }

    #[tokio::test]
    async fn stops_after_error() {
        let mock = MockTransport::new();
        let store = store(&mock);
        mock.expect_ok(Method::GET, "/videos", page(&["v1"], 1, Some(2))).await;
        mock.expect(
            Method::GET,
            "/videos",
            Err(TransportError::status(500, "boom")),
        )
        .await;

        let items: Vec<_> = store.stream_videos(VideoQuery::default()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ApiError::Server { status: 500, .. })));
        mock.verify().await.unwrap();
    }
}
