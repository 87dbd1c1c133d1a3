use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures_util::{Stream, StreamExt as _};
use serde::{Deserialize, Serialize};

use crate::cache::CacheLayer;
use crate::cache_key::derive_streaming_cache_key;
use crate::context::GatewayContext;
use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingCacheChunk {
    pub data: String,
    pub sequence_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingCacheMetadata {
    pub model: String,
    pub provider: String,
    pub finish_reason: Option<String>,
    pub total_chunks: usize,
    pub duration_ms: u64,
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingCacheEntry {
    pub chunks: Vec<StreamingCacheChunk>,
    pub metadata: StreamingCacheMetadata,
}

impl StreamingCacheEntry {
    /// Only fully captured streams may stand in for a live upstream call.
    pub fn is_replayable(&self) -> bool {
        self.metadata.completed
    }

    /// Chunk payloads in emission order.
    pub fn replay(&self) -> impl Iterator<Item = &str> + '_ {
        self.chunks.iter().map(|chunk| chunk.data.as_str())
    }
}

/// One upstream streaming event as the gateway forwards it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpstreamChunk {
    pub data: String,
    pub event: Option<String>,
    pub finish_reason: Option<String>,
}

impl UpstreamChunk {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }
}

/// Accumulates one in-flight stream and writes it as a single entry on
/// [`StreamCapture::finalize`]. Nothing is written otherwise, so a dropped
/// capture (client gone, upstream error) never looks like a complete stream.
pub struct StreamCapture {
    cache: CacheLayer,
    cache_key: String,
    ttl_seconds: u64,
    model: String,
    provider: String,
    chunks: Vec<StreamingCacheChunk>,
    finish_reason: Option<String>,
    started: Instant,
    done: bool,
}

impl std::fmt::Debug for StreamCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCapture")
            .field("cache_key", &self.cache_key)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

impl StreamCapture {
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn append_chunk(&mut self, data: impl Into<String>, event: Option<String>) {
        let sequence_number = self.chunks.len() as u64;
        self.chunks.push(StreamingCacheChunk {
            data: data.into(),
            sequence_number,
            event,
            timestamp_ms: now_millis(),
        });
    }

    pub fn set_finish_reason(&mut self, finish_reason: impl Into<String>) {
        self.finish_reason = Some(finish_reason.into());
    }

    fn record(&mut self, chunk: &UpstreamChunk) {
        self.append_chunk(chunk.data.clone(), chunk.event.clone());
        if let Some(finish_reason) = chunk.finish_reason.as_deref() {
            self.set_finish_reason(finish_reason);
        }
    }

    fn entry(&mut self, completed: bool) -> StreamingCacheEntry {
        let chunks = std::mem::take(&mut self.chunks);
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        StreamingCacheEntry {
            metadata: StreamingCacheMetadata {
                model: self.model.clone(),
                provider: self.provider.clone(),
                finish_reason: self.finish_reason.take(),
                total_chunks: chunks.len(),
                duration_ms,
                completed,
            },
            chunks,
        }
    }

    /// Marks the stream complete and writes it to the cache.
    pub async fn finalize(mut self) -> StreamingCacheEntry {
        self.done = true;
        let entry = self.entry(true);
        if self.ttl_seconds > 0 {
            self.cache.set(&self.cache_key, &entry, self.ttl_seconds).await;
            tracing::debug!(
                cache_key = %self.cache_key,
                total_chunks = entry.metadata.total_chunks,
                ttl_seconds = self.ttl_seconds,
                "streaming response cached"
            );
        } else {
            tracing::debug!(
                cache_key = %self.cache_key,
                "streaming response not cached: zero ttl"
            );
        }
        entry
    }

    /// Gives up on the capture without writing anything. The returned entry
    /// has `completed = false`.
    pub fn abandon(mut self) -> StreamingCacheEntry {
        self.done = true;
        self.entry(false)
    }
}

impl Drop for StreamCapture {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(
                cache_key = %self.cache_key,
                chunks = self.chunks.len(),
                "streaming capture dropped before completion"
            );
        }
    }
}

/// Forwards `upstream` unchanged while recording it into `capture`.
///
/// The capture is finalized when `upstream` ends cleanly. An upstream error
/// or dropping the returned stream abandons it.
pub fn capture_stream<S, E>(
    upstream: S,
    capture: StreamCapture,
) -> impl Stream<Item = std::result::Result<UpstreamChunk, E>>
where
    S: Stream<Item = std::result::Result<UpstreamChunk, E>> + Unpin,
{
    struct CaptureState<S> {
        upstream: S,
        capture: Option<StreamCapture>,
    }

    let state = CaptureState {
        upstream,
        capture: Some(capture),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        match state.upstream.next().await {
            Some(Ok(chunk)) => {
                if let Some(capture) = state.capture.as_mut() {
                    capture.record(&chunk);
                }
                Some((Ok(chunk), state))
            }
            Some(Err(err)) => {
                if let Some(capture) = state.capture.take() {
                    capture.abandon();
                }
                Some((Err(err), state))
            }
            None => {
                if let Some(capture) = state.capture.take() {
                    capture.finalize().await;
                }
                None
            }
        }
    })
}

impl GatewayContext {
    pub fn begin_streaming_capture(
        &self,
        cache_key: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        ttl_seconds: u64,
    ) -> StreamCapture {
        StreamCapture {
            cache: self.cache().clone(),
            cache_key: cache_key.into(),
            ttl_seconds,
            model: model.into(),
            provider: provider.into(),
            chunks: Vec::new(),
            finish_reason: None,
            started: Instant::now(),
            done: false,
        }
    }

    /// Starts a capture keyed by the streaming fingerprint of `payload`, or
    /// `None` when the project does not cache.
    pub async fn begin_streaming_capture_for_project(
        &self,
        project_id: &str,
        payload: &serde_json::Value,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Result<Option<StreamCapture>> {
        let policy = self.resolve_project_caching_policy(project_id).await?;
        if !policy.enabled {
            return Ok(None);
        }
        let ttl_seconds = self
            .config()
            .streaming_ttl_seconds
            .unwrap_or(policy.duration_seconds);
        Ok(Some(self.begin_streaming_capture(
            derive_streaming_cache_key(payload),
            model,
            provider,
            ttl_seconds,
        )))
    }

    pub async fn store_streaming_cache_entry(
        &self,
        cache_key: &str,
        entry: &StreamingCacheEntry,
        ttl_seconds: u64,
    ) {
        self.cache().set(cache_key, entry, ttl_seconds).await;
    }

    /// Returns the stored entry as-is, complete or not.
    pub async fn get_streaming_cache_entry(&self, cache_key: &str) -> Option<StreamingCacheEntry> {
        self.cache().get(cache_key).await
    }

    /// Like [`Self::get_streaming_cache_entry`] but only for completed captures.
    pub async fn get_replayable_stream(&self, cache_key: &str) -> Option<StreamingCacheEntry> {
        self.get_streaming_cache_entry(cache_key)
            .await
            .filter(StreamingCacheEntry::is_replayable)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
