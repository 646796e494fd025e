//! Ordered collection of renderable proxies plus the seams used to create
//! their GPU buffers.

use thiserror::Error;

use crate::identity::{GeometryIdentity, IdentitySource};
use crate::model::TriangleMesh;
use crate::proxy::RenderableProxy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("buffer of {requested} bytes exceeds the device limit of {limit} bytes")]
    ResourceExhausted { requested: u64, limit: u64 },
    #[error("backend rejected buffer: {0}")]
    Backend(String),
}

/// What the backend needs to build one proxy buffer.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub identity: GeometryIdentity,
    pub mesh: &'a TriangleMesh,
}

/// Creates GPU buffers for proxies. The returned buffer is owned by the proxy
/// and released when the proxy is dropped.
pub trait MeshUploader {
    type Buffer;

    fn upload(&mut self, request: UploadRequest<'_>) -> Result<Self::Buffer, UploadError>;
}

/// Message surfaced to the UI layer after a pass. None of these abort the
/// pass that produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Reported once per registry; later failures only log.
    BufferExhausted {
        identity: GeometryIdentity,
        error: UploadError,
    },
    StaleReference {
        identity: GeometryIdentity,
        reason: String,
    },
    PickFailed(String),
}

/// Old registry index to new registry index after a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRemap {
    entries: Vec<Option<usize>>,
}

impl IndexRemap {
    pub fn new(entries: Vec<Option<usize>>) -> Self {
        Self { entries }
    }

    pub fn identity(len: usize) -> Self {
        Self {
            entries: (0..len).map(Some).collect(),
        }
    }

    /// New index of `old`, or `None` when the proxy was released (or `old`
    /// was never a valid index).
    pub fn get(&self, old: usize) -> Option<usize> {
        self.entries.get(old).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.entries
            .iter()
            .enumerate()
            .all(|(old, new)| *new == Some(old))
    }

    pub fn removed_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_none()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.entries.iter().copied().enumerate()
    }
}

#[derive(Debug)]
pub struct Registry<B> {
    pub(crate) proxies: Vec<RenderableProxy<B>>,
    identities: IdentitySource,
    exhaustion_reported: bool,
}

impl<B> Default for Registry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> Registry<B> {
    pub fn new() -> Self {
        Self::with_identity_source(IdentitySource::new())
    }

    pub fn with_identity_source(identities: IdentitySource) -> Self {
        Self {
            proxies: Vec::new(),
            identities,
            exhaustion_reported: false,
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RenderableProxy<B>> {
        self.proxies.get(index)
    }

    pub fn proxies(&self) -> &[RenderableProxy<B>] {
        &self.proxies
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &RenderableProxy<B>> {
        self.proxies.iter()
    }

    pub fn identity_source(&self) -> &IdentitySource {
        &self.identities
    }

    /// Lent to model builders and background steps that need fresh ids.
    pub fn identity_source_mut(&mut self) -> &mut IdentitySource {
        &mut self.identities
    }

    /// Index of the non-auxiliary proxy built from `identity`.
    pub fn find(&self, identity: GeometryIdentity) -> Option<usize> {
        if identity.is_auxiliary() {
            return None;
        }
        self.proxies
            .iter()
            .position(|proxy| proxy.identity == identity)
    }

    pub fn auxiliary_for_plate(&self, plate: usize) -> Option<usize> {
        self.proxies
            .iter()
            .position(|proxy| proxy.kind.plate() == Some(plate))
    }

    /// Indices of all proxies sharing `index`'s object and instance.
    pub fn instance_group(&self, index: usize) -> Vec<usize> {
        let Some(key) = self.get(index).and_then(|proxy| proxy.instance_key()) else {
            return vec![index];
        };
        self.proxies
            .iter()
            .enumerate()
            .filter(|(_, proxy)| {
                proxy.instance_key() == Some(key)
                    && proxy.position.is_some_and(|p| p.volume_index.is_some())
                    && !proxy.kind.is_modifier()
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Indices of proxies that take part in picking and can be selected.
    pub fn selectable_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.proxies
            .iter()
            .enumerate()
            .filter(|(_, proxy)| proxy.is_pickable())
            .map(|(index, _)| index)
    }

    pub(crate) fn proxies_mut(&mut self) -> &mut [RenderableProxy<B>] {
        &mut self.proxies
    }

    /// Run one upload, recording the first exhaustion failure as a
    /// diagnostic. Failures yield `None` so the proxy stays registered but
    /// non-renderable.
    pub(crate) fn upload<U>(
        exhaustion_reported: &mut bool,
        uploader: &mut U,
        request: UploadRequest<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<B>
    where
        U: MeshUploader<Buffer = B>,
    {
        match uploader.upload(request) {
            Ok(buffer) => Some(buffer),
            Err(error) => {
                log::warn!(
                    "[plater_scene] buffer upload failed for {}: {error}",
                    request.identity
                );
                if !*exhaustion_reported {
                    *exhaustion_reported = true;
                    diagnostics.push(Diagnostic::BufferExhausted {
                        identity: request.identity,
                        error,
                    });
                }
                None
            }
        }
    }

    pub(crate) fn take_proxies(&mut self) -> (Vec<RenderableProxy<B>>, &mut bool) {
        (
            std::mem::take(&mut self.proxies),
            &mut self.exhaustion_reported,
        )
    }

    pub(crate) fn replace_proxies(&mut self, proxies: Vec<RenderableProxy<B>>) {
        self.proxies = proxies;
    }
}
