//! Multipart upload session tracking
//!
//! Each upload is a session in a concurrent table, with its own lock, so
//! unrelated uploads never contend. A session moves `Open -> Completing ->
//! Completed` or `Open -> Aborted`; the completing phase lets the store work
//! outside the lock while every other transition is refused.
//!
//! Stores with native multipart primitives receive the parts directly and the
//! tracker keeps only part records. For other stores the part bytes are
//! buffered here and concatenated into a single `put_blob` on completion.
//! Sessions are in-memory and lost on restart.

use crate::api::S3Error;
use crate::storage::{md5_hex, BlobStore, PartRef};
use crate::types::{normalize_etag, BlobDescriptor, ContentMetadata, PutCondition};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Highest part number S3 accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Completing,
    Completed,
    Aborted,
}

struct PartRecord {
    etag: String,
    size: u64,
    received_at: DateTime<Utc>,
    /// Buffered bytes when the store has no native multipart support
    data: Option<Bytes>,
}

struct SessionState {
    phase: Phase,
    parts: BTreeMap<u32, PartRecord>,
    /// Part writes that have passed the phase check but not yet recorded
    in_flight: usize,
    /// Sum of the part bytes held in `parts` for non-native stores
    buffered: u64,
}

struct Session {
    upload_id: String,
    container: String,
    key: String,
    owner: Option<String>,
    created_at: DateTime<Utc>,
    metadata: ContentMetadata,
    store: Arc<dyn BlobStore>,
    state: Mutex<SessionState>,
}

impl Session {
    fn native(&self) -> bool {
        self.store.capabilities().native_multipart
    }
}

/// Counts one part write against its session until released or dropped,
/// so a cancelled request never leaves the session stuck.
struct InFlight {
    session: Arc<Session>,
    active: bool,
}

impl InFlight {
    fn enter(session: &Arc<Session>, upload_id: &str) -> Result<Self, S3Error> {
        let mut state = session.state.lock();
        check_open(&state, upload_id)?;
        state.in_flight += 1;
        Ok(Self {
            session: Arc::clone(session),
            active: true,
        })
    }

    /// Release while the caller already holds the session lock.
    fn leave(mut self, state: &mut SessionState) {
        state.in_flight -= 1;
        self.active = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.active {
            self.session.state.lock().in_flight -= 1;
        }
    }
}

/// A recorded part, as reported by ListParts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    /// Unquoted ETag
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of ListParts output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartListing {
    pub parts: Vec<PartInfo>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// An open upload, as reported by ListMultipartUploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// Owns every multipart session of a gateway instance.
pub struct MultipartTracker {
    sessions: DashMap<String, Arc<Session>>,
    max_object_size: u64,
}

impl MultipartTracker {
    pub fn new(max_object_size: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            max_object_size,
        }
    }

    /// Start a new upload against `store`, returning its upload id.
    pub async fn initiate(
        &self,
        store: Arc<dyn BlobStore>,
        container: &str,
        key: &str,
        owner: Option<&str>,
        metadata: ContentMetadata,
    ) -> Result<String, S3Error> {
        if !store.container_exists(container).await? {
            return Err(S3Error::NoSuchBucket(container.to_string()));
        }
        let upload_id = uuid::Uuid::new_v4().to_string();
        if store.capabilities().native_multipart {
            store.initiate_multipart(container, key, &upload_id).await?;
        }

        let session = Session {
            upload_id: upload_id.clone(),
            container: container.to_string(),
            key: key.to_string(),
            owner: owner.map(str::to_string),
            created_at: Utc::now(),
            metadata,
            store,
            state: Mutex::new(SessionState {
                phase: Phase::Open,
                parts: BTreeMap::new(),
                in_flight: 0,
                buffered: 0,
            }),
        };
        self.sessions.insert(upload_id.clone(), Arc::new(session));
        info!("Initiated multipart upload {} for {}/{}", upload_id, container, key);
        Ok(upload_id)
    }

    /// Look up a session, treating any target or owner mismatch as unknown.
    fn session(
        &self,
        upload_id: &str,
        container: &str,
        key: &str,
        owner: Option<&str>,
    ) -> Result<Arc<Session>, S3Error> {
        let session = self
            .sessions
            .get(upload_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
        if session.container != container || session.key != key || session.owner.as_deref() != owner
        {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }
        Ok(session)
    }

    /// Record a part, replacing any earlier part with the same number.
    /// Returns the part's unquoted ETag.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        container: &str,
        key: &str,
        owner: Option<&str>,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, S3Error> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(S3Error::InvalidArgument(format!(
                "Part number must be an integer between 1 and {}, inclusive",
                MAX_PART_NUMBER
            )));
        }
        let session = self.session(upload_id, container, key, owner)?;
        let in_flight = InFlight::enter(&session, upload_id)?;

        let size = data.len() as u64;
        let written = if session.native() {
            session
                .store
                .upload_part(upload_id, part_number, data)
                .await
                .map(|etag| (etag, None))
        } else {
            Ok((md5_hex(&data), Some(data)))
        };

        let mut state = session.state.lock();
        in_flight.leave(&mut state);
        let (etag, data) = written?;
        check_open(&state, upload_id)?;
        if data.is_some() {
            let replaced = state
                .parts
                .get(&part_number)
                .filter(|p| p.data.is_some())
                .map_or(0, |p| p.size);
            let total = state.buffered - replaced + size;
            if total > self.max_object_size {
                return Err(S3Error::EntityTooLarge {
                    size: total,
                    max: self.max_object_size,
                });
            }
            state.buffered = total;
        }
        state.parts.insert(
            part_number,
            PartRecord {
                etag: etag.clone(),
                size,
                received_at: Utc::now(),
                data,
            },
        );
        debug!("Recorded part {} ({} bytes) for upload {}", part_number, size, upload_id);
        Ok(etag)
    }

    /// Validate the client's part list and materialize the blob.
    pub async fn complete(
        &self,
        upload_id: &str,
        container: &str,
        key: &str,
        owner: Option<&str>,
        requested: &[PartRef],
    ) -> Result<BlobDescriptor, S3Error> {
        let session = self.session(upload_id, container, key, owner)?;
        let min_part_size = session.store.capabilities().min_part_size;

        let buffered = {
            let mut state = session.state.lock();
            check_open(&state, upload_id)?;
            if state.in_flight > 0 {
                return Err(S3Error::OperationAborted);
            }
            let buffered = self.validate_parts(&state, requested, min_part_size)?;
            state.phase = Phase::Completing;
            buffered
        };

        let result = if session.native() {
            session
                .store
                .complete_multipart(container, key, upload_id, requested, &session.metadata)
                .await
        } else {
            let mut assembled = BytesMut::new();
            for chunk in &buffered {
                assembled.extend_from_slice(chunk);
            }
            session
                .store
                .put_blob(
                    container,
                    key,
                    assembled.freeze(),
                    &session.metadata,
                    &PutCondition::default(),
                )
                .await
        };

        {
            let mut state = session.state.lock();
            match result {
                Ok(_) => {
                    state.phase = Phase::Completed;
                    state.parts.clear();
                    state.buffered = 0;
                }
                Err(_) => state.phase = Phase::Open,
            }
        }
        let descriptor = result?;
        self.sessions.remove(upload_id);
        info!(
            "Completed multipart upload {} into {}/{} ({} parts, {} bytes)",
            upload_id,
            container,
            key,
            requested.len(),
            descriptor.content_length
        );
        Ok(descriptor)
    }

    /// Check the completion list against the recorded parts, returning the
    /// buffered part bytes in order (empty for native stores).
    fn validate_parts(
        &self,
        state: &SessionState,
        requested: &[PartRef],
        min_part_size: u64,
    ) -> Result<Vec<Bytes>, S3Error> {
        if requested.is_empty() {
            return Err(S3Error::MalformedXML);
        }
        if requested
            .windows(2)
            .any(|w| w[0].part_number >= w[1].part_number)
        {
            return Err(S3Error::InvalidPartOrder);
        }

        let mut buffered = Vec::with_capacity(requested.len());
        let mut total = 0u64;
        let last = requested.len() - 1;
        for (idx, part) in requested.iter().enumerate() {
            let record = state.parts.get(&part.part_number).ok_or_else(|| {
                S3Error::InvalidPart(format!(
                    "One or more of the specified parts could not be found: part {}",
                    part.part_number
                ))
            })?;
            if normalize_etag(&part.etag) != record.etag {
                return Err(S3Error::InvalidPart(format!(
                    "The ETag specified for part {} does not match the uploaded part",
                    part.part_number
                )));
            }
            if idx != last && record.size < min_part_size {
                return Err(S3Error::EntityTooSmall);
            }
            total += record.size;
            if total > self.max_object_size {
                return Err(S3Error::EntityTooLarge {
                    size: total,
                    max: self.max_object_size,
                });
            }
            if let Some(ref data) = record.data {
                buffered.push(data.clone());
            }
        }
        Ok(buffered)
    }

    /// Abort an open upload, discarding its parts and any store-side staging.
    pub async fn abort(
        &self,
        upload_id: &str,
        container: &str,
        key: &str,
        owner: Option<&str>,
    ) -> Result<(), S3Error> {
        let session = self.session(upload_id, container, key, owner)?;
        {
            let mut state = session.state.lock();
            check_open(&state, upload_id)?;
            state.phase = Phase::Aborted;
            state.parts.clear();
            state.buffered = 0;
        }
        self.sessions.remove(upload_id);
        discard_staging(&session).await;
        info!("Aborted multipart upload {} for {}/{}", upload_id, container, key);
        Ok(())
    }

    /// List recorded parts after `marker`, at most `max_parts` of them.
    pub fn list_parts(
        &self,
        upload_id: &str,
        container: &str,
        key: &str,
        owner: Option<&str>,
        marker: u32,
        max_parts: usize,
    ) -> Result<PartListing, S3Error> {
        let session = self.session(upload_id, container, key, owner)?;
        let state = session.state.lock();
        if matches!(state.phase, Phase::Completed | Phase::Aborted) {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }

        let mut listing = PartListing::default();
        for (&part_number, record) in state.parts.range(marker.saturating_add(1)..) {
            if listing.parts.len() == max_parts {
                listing.is_truncated = true;
                break;
            }
            listing.parts.push(PartInfo {
                part_number,
                etag: record.etag.clone(),
                size: record.size,
                last_modified: record.received_at,
            });
        }
        if listing.is_truncated {
            listing.next_part_number_marker = listing.parts.last().map(|p| p.part_number);
        }
        Ok(listing)
    }

    /// Uploads in progress for a container, sorted by key then initiation time.
    ///
    /// With a `key_marker`, only uploads after it are returned: those with a
    /// greater key, plus those of the marker key that follow `upload_id_marker`.
    pub fn list_uploads(
        &self,
        container: &str,
        prefix: &str,
        owner: Option<&str>,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Vec<UploadInfo> {
        let mut uploads: Vec<UploadInfo> = self
            .sessions
            .iter()
            .filter(|entry| {
                let s = entry.value();
                s.container == container
                    && s.key.starts_with(prefix)
                    && s.owner.as_deref() == owner
                    && matches!(s.state.lock().phase, Phase::Open | Phase::Completing)
            })
            .map(|entry| {
                let s = entry.value();
                UploadInfo {
                    key: s.key.clone(),
                    upload_id: s.upload_id.clone(),
                    initiated: s.created_at,
                }
            })
            .collect();
        uploads.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then(a.initiated.cmp(&b.initiated))
                .then_with(|| a.upload_id.cmp(&b.upload_id))
        });

        if key_marker.is_empty() {
            return uploads;
        }
        let resume = uploads
            .iter()
            .position(|u| u.key == key_marker && u.upload_id == upload_id_marker);
        match resume {
            Some(idx) => uploads.split_off(idx + 1),
            None => uploads
                .into_iter()
                .filter(|u| u.key.as_str() > key_marker)
                .collect(),
        }
    }

    /// Abort open uploads older than `max_age`. Returns how many were dropped.
    pub async fn cleanup_expired(&self, max_age: std::time::Duration) -> usize {
        let cutoff = Utc::now() - Duration::from_std(max_age).unwrap_or(Duration::hours(24));
        let expired: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().created_at < cutoff)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut dropped = 0;
        for session in expired {
            {
                let mut state = session.state.lock();
                if state.phase != Phase::Open || state.in_flight > 0 {
                    continue;
                }
                state.phase = Phase::Aborted;
                state.parts.clear();
                state.buffered = 0;
            }
            self.sessions.remove(&session.upload_id);
            discard_staging(&session).await;
            dropped += 1;
        }
        if dropped > 0 {
            info!("Expired {} stale multipart uploads", dropped);
        }
        dropped
    }

    /// Number of sessions currently tracked.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn check_open(state: &SessionState, upload_id: &str) -> Result<(), S3Error> {
    match state.phase {
        Phase::Open => Ok(()),
        Phase::Completing => Err(S3Error::OperationAborted),
        Phase::Completed | Phase::Aborted => Err(S3Error::NoSuchUpload(upload_id.to_string())),
    }
}

async fn discard_staging(session: &Session) {
    if !session.native() {
        return;
    }
    if let Err(e) = session.store.abort_multipart(&session.upload_id).await {
        warn!(
            "Failed to discard staged parts for upload {}: {}",
            session.upload_id, e
        );
    }
}
