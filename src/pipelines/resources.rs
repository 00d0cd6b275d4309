// SPDX-License-Identifier: GPL-3.0-only

//! Transient resource ownership
//!
//! Uploaded backgrounds are decoded once and published under a generated
//! `blob:` URI. The guardian owns every such resource and revokes them as a
//! group: before a new upload is registered and when the session ends.

use crate::constants::file_formats::is_image_extension;
use crate::errors::{PipelineError, PipelineResult};
use image::RgbaImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// URI scheme prefix for transient resources
pub const URI_PREFIX: &str = "blob:backdrop/";

/// Decoded background media behind a generated URI
#[derive(Debug, Clone)]
pub struct TransientResource {
    uri: String,
    origin: Option<PathBuf>,
    image: Arc<RgbaImage>,
}

impl TransientResource {
    /// Wrap decoded media under a fresh URI
    pub fn new(image: RgbaImage, origin: Option<PathBuf>) -> Self {
        Self {
            uri: format!("{}{}", URI_PREFIX, Uuid::new_v4()),
            origin,
            image: Arc::new(image),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }
}

/// Decode an image file off the async runtime
pub async fn decode_image(path: impl Into<PathBuf>) -> PipelineResult<RgbaImage> {
    let path = path.into();
    let supported = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(is_image_extension);
    if !supported {
        return Err(PipelineError::resource(format!(
            "{}: unsupported image format",
            path.display()
        )));
    }
    tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgba8())
            .map_err(|e| PipelineError::resource(format!("{}: {}", path.display(), e)))
    })
    .await
    .map_err(|e| PipelineError::resource(format!("decode task failed: {}", e)))?
}

/// Owns every transient resource of a session
#[derive(Debug, Default)]
pub struct ResourceGuardian {
    active: HashMap<String, TransientResource>,
    revoked: u64,
}

impl ResourceGuardian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource and return its URI
    pub fn track(&mut self, resource: TransientResource) -> String {
        let uri = resource.uri.clone();
        debug!(uri = %uri, "Tracking transient resource");
        if self.active.insert(uri.clone(), resource).is_some() {
            warn!(uri = %uri, "Transient resource tracked twice");
        }
        uri
    }

    /// Revoke every tracked resource, returning how many were revoked
    pub fn revoke_all(&mut self) -> usize {
        let count = self.active.len();
        for (uri, _) in self.active.drain() {
            debug!(uri = %uri, "Revoked transient resource");
        }
        self.revoked += count as u64;
        count
    }

    /// Look up a tracked resource
    pub fn resolve(&self, uri: &str) -> Option<&TransientResource> {
        self.active.get(uri)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Total revocations over the guardian's lifetime
    pub fn revoked_count(&self) -> u64 {
        self.revoked
    }
}
