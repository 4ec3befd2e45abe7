use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use url::Url;

use crate::hls::Segment;
use crate::providers::Host;

#[derive(Debug, Clone)]
pub struct HlsStream {
    manifest_url: Url,
    base_url: Url,
    segments: Vec<Segment>,
}

impl HlsStream {
    pub fn new(manifest_url: Url, segments: Vec<Segment>) -> Option<Self> {
        if segments.is_empty() {
            return None;
        }
        let base_url = manifest_url.join(".").unwrap_or_else(|_| manifest_url.clone());
        Some(HlsStream {
            manifest_url,
            base_url,
            segments,
        })
    }

    pub fn manifest_url(&self) -> &Url {
        &self.manifest_url
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_url(&self, index: usize) -> Option<&Url> {
        self.segments.get(index).map(|segment| &segment.uri)
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectFile {
    pub resolved_url: Url,
    /// Zero when the upstream did not announce a length.
    pub total_size: u64,
    pub supports_ranges: bool,
    pub content_type: String,
}

impl DirectFile {
    pub fn extension(&self) -> &'static str {
        if self.content_type.contains("webm") || self.resolved_url.path().ends_with(".webm") {
            "webm"
        } else {
            "mp4"
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamKind {
    Hls(HlsStream),
    Direct(DirectFile),
}

#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub host: Host,
    pub kind: StreamKind,
}

impl StreamDescriptor {
    pub fn hls(host: Host, stream: HlsStream) -> Self {
        StreamDescriptor {
            host,
            kind: StreamKind::Hls(stream),
        }
    }

    pub fn direct(host: Host, file: DirectFile) -> Self {
        StreamDescriptor {
            host,
            kind: StreamKind::Direct(file),
        }
    }
}

struct Entry {
    descriptor: Arc<StreamDescriptor>,
    last_access: Instant,
}

pub struct SessionCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

impl SessionCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        SessionCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn put(&self, key: &str, descriptor: StreamDescriptor) -> Arc<StreamDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                descriptor: descriptor.clone(),
                last_access: Instant::now(),
            },
        );
        descriptor
    }

    pub fn get(&self, key: &str) -> Option<Arc<StreamDescriptor>> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Arc<StreamDescriptor>> {
        let mut entries = self.entries.lock();
        let expired = entries
            .get(key)
            .map(|entry| self.is_expired(entry, now))?;

        if expired {
            debug!("Session {key} expired");
            entries.remove(key);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.descriptor.clone())
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.ttl
            .map(|ttl| now.saturating_duration_since(entry.last_access) > ttl)
            .unwrap_or(false)
    }
}
