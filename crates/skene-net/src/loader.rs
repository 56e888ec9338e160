#![forbid(unsafe_code)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use skene_manifest::{Representation, Segment};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{NetError, NetResult},
    types::{NetOptions, RetryPolicy},
};

/// What to fetch: one segment of one Representation.
#[derive(Clone, Debug)]
pub struct SegmentRequest {
    pub representation: Arc<Representation>,
    pub segment: Segment,
}

/// A fetched segment payload.
#[derive(Clone, Debug)]
pub struct LoadedSegment {
    pub data: Bytes,
    pub size: Option<u64>,
    /// Wall-clock transfer time, for throughput estimation upstream.
    pub duration: Option<Duration>,
}

/// Transport seam for segment fetching.
#[async_trait]
pub trait SegmentLoader: Send + Sync {
    async fn load(&self, request: &SegmentRequest) -> NetResult<LoadedSegment>;
}

/// HTTP loader with bounded exponential backoff.
///
/// Retries rotate through the segment's fallback URLs. The offline flag
/// widens the retry budget; connectivity observation is the caller's
/// concern.
pub struct HttpSegmentLoader {
    client: reqwest::Client,
    policy: RetryPolicy,
    offline: AtomicBool,
}

impl HttpSegmentLoader {
    pub fn new(options: &NetOptions) -> NetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            client,
            policy: RetryPolicy::from(options),
            offline: AtomicBool::new(false),
        })
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    async fn fetch_once(&self, url: &Url, byte_range: Option<(u64, Option<u64>)>) -> NetResult<Bytes> {
        let mut builder = self.client.get(url.clone());
        if let Some((start, end)) = byte_range {
            let value = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            builder = builder.header(reqwest::header::RANGE, value);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Http {
                status: status.as_u16(),
                url: url.clone(),
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl SegmentLoader for HttpSegmentLoader {
    async fn load(&self, request: &SegmentRequest) -> NetResult<LoadedSegment> {
        let urls = &request.segment.media_urls;
        if urls.is_empty() {
            return Err(NetError::NoUrl);
        }

        let budget = self.policy.budget(self.offline.load(Ordering::Relaxed));
        let mut last_error = None;

        for attempt in 0..=budget {
            let url = &urls[attempt as usize % urls.len()];
            let started = Instant::now();
            match self.fetch_once(url, request.segment.byte_range).await {
                Ok(data) => {
                    let elapsed = started.elapsed();
                    debug!(
                        url = %url,
                        segment = %request.segment.id,
                        bytes = data.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "segment fetched"
                    );
                    return Ok(LoadedSegment {
                        size: Some(data.len() as u64),
                        duration: Some(elapsed),
                        data,
                    });
                }
                Err(error) => {
                    if !error.is_retryable() || attempt == budget {
                        if attempt > 0 {
                            return Err(NetError::RetryExhausted {
                                max_retries: attempt,
                                source: Box::new(error),
                            });
                        }
                        return Err(error);
                    }
                    let delay = self.policy.delay_for_attempt(attempt + 1);
                    warn!(
                        url = %url,
                        segment = %request.segment.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "segment fetch failed, backing off"
                    );
                    last_error = Some(error);
                    sleep(delay).await;
                }
            }
        }

        Err(NetError::RetryExhausted {
            max_retries: budget,
            source: Box::new(last_error.unwrap_or(NetError::Aborted)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use axum::{extract::State, http::HeaderMap, routing::get, Router};
    use skene_manifest::TimelineIndex;
    use tokio::net::TcpListener;

    use super::*;

    fn request_for(urls: Vec<Url>) -> SegmentRequest {
        let representation = Arc::new(Representation {
            id: "video-1".into(),
            bitrate: 1_000_000,
            codec: "avc1.64001f".into(),
            mime_type: "video/mp4".into(),
            index: Arc::new(TimelineIndex::builder("video-1", 90_000).build()),
        });
        SegmentRequest {
            representation,
            segment: Segment {
                id: "video-1_0".into(),
                time: 0,
                duration: 360_000,
                timescale: 90_000,
                media_urls: urls,
                byte_range: None,
                is_init: false,
            },
        }
    }

    #[derive(Clone, Default)]
    struct ServerState {
        hits: Arc<AtomicUsize>,
        fail_first: Arc<AtomicUsize>,
    }

    async fn segment_endpoint(
        State(state): State<ServerState>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        state.hits.fetch_add(1, Ordering::SeqCst);
        if state
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return axum::response::Response::builder()
                .status(503)
                .body("unavailable".into())
                .unwrap();
        }
        let body = match headers.get(reqwest::header::RANGE.as_str()) {
            Some(range) => format!("ranged:{}", range.to_str().unwrap_or_default()),
            None => "segmentdata".to_string(),
        };
        axum::response::Response::new(body.into())
    }

    async fn run_server(state: ServerState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/seg.m4s", get(segment_endpoint))
            .route("/missing.m4s", get(|| async { axum::http::StatusCode::NOT_FOUND }))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{}", addr.port())
    }

    fn fast_loader() -> HttpSegmentLoader {
        HttpSegmentLoader::new(&NetOptions {
            retry_base_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(2),
            ..NetOptions::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn loads_segment_bytes() {
        let state = ServerState::default();
        let base = run_server(state.clone()).await;
        let loader = fast_loader();
        let request = request_for(vec![format!("{base}/seg.m4s").parse().unwrap()]);

        let loaded = loader.load(&request).await.unwrap();
        assert_eq!(&loaded.data[..], b"segmentdata");
        assert_eq!(loaded.size, Some(11));
        assert!(loaded.duration.is_some());
        assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_with_backoff() {
        let state = ServerState {
            fail_first: Arc::new(AtomicUsize::new(2)),
            ..ServerState::default()
        };
        let base = run_server(state.clone()).await;
        let loader = fast_loader();
        let request = request_for(vec![format!("{base}/seg.m4s").parse().unwrap()]);

        let loaded = loader.load(&request).await.unwrap();
        assert_eq!(&loaded.data[..], b"segmentdata");
        assert_eq!(state.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_404() {
        let state = ServerState::default();
        let base = run_server(state.clone()).await;
        let loader = fast_loader();
        let request = request_for(vec![format!("{base}/missing.m4s").parse().unwrap()]);

        let err = loader.load(&request).await.unwrap_err();
        assert!(err.is_http_error(404));
    }

    #[tokio::test]
    async fn sends_byte_range_header() {
        let state = ServerState::default();
        let base = run_server(state.clone()).await;
        let loader = fast_loader();
        let mut request = request_for(vec![format!("{base}/seg.m4s").parse().unwrap()]);
        request.segment.byte_range = Some((100, Some(199)));

        let loaded = loader.load(&request).await.unwrap();
        assert_eq!(&loaded.data[..], b"ranged:bytes=100-199");
    }

    #[tokio::test]
    async fn empty_url_list_fails_immediately() {
        let loader = fast_loader();
        let request = request_for(vec![]);
        assert!(matches!(loader.load(&request).await, Err(NetError::NoUrl)));
    }
}
