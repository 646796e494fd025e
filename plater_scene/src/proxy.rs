use glam::Mat4;

use crate::identity::GeometryIdentity;
use crate::model::{StepKind, VolumeKind, WipeTowerFootprint};

/// Indices of the source entity inside the current snapshot. Only valid until
/// the next reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositePosition {
    pub object_index: usize,
    /// `None` for artifacts produced by a background step.
    pub volume_index: Option<usize>,
    pub instance_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProxyKind {
    Volume { kind: VolumeKind },
    StepArtifact { step: StepKind },
    Auxiliary { plate: usize, footprint: WipeTowerFootprint },
}

impl ProxyKind {
    pub fn is_modifier(&self) -> bool {
        matches!(self, ProxyKind::Volume { kind } if kind.is_modifier())
    }

    pub fn is_auxiliary(&self) -> bool {
        matches!(self, ProxyKind::Auxiliary { .. })
    }

    pub fn plate(&self) -> Option<usize> {
        match self {
            ProxyKind::Auxiliary { plate, .. } => Some(*plate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverState {
    Idle,
    Hovered,
    Selected,
    HoverWhileSelected,
}

impl HoverState {
    pub fn from_flags(selected: bool, hovered: bool) -> Self {
        match (selected, hovered) {
            (false, false) => HoverState::Idle,
            (false, true) => HoverState::Hovered,
            (true, false) => HoverState::Selected,
            (true, true) => HoverState::HoverWhileSelected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyFlags {
    pub active: bool,
    pub selected: bool,
    pub hovered: bool,
    pub printable: bool,
    pub is_modifier: bool,
    /// Cleared when the buffer upload failed; the proxy stays registered.
    pub renderable: bool,
}

impl Default for ProxyFlags {
    fn default() -> Self {
        Self {
            active: true,
            selected: false,
            hovered: false,
            printable: true,
            is_modifier: false,
            renderable: true,
        }
    }
}

/// A GPU-side mirror of one model volume instance, one step artifact or one
/// plate-scoped auxiliary entity. Owns its buffer; dropping the proxy releases
/// it.
#[derive(Debug)]
pub struct RenderableProxy<B> {
    pub(crate) identity: GeometryIdentity,
    pub(crate) position: Option<CompositePosition>,
    pub(crate) kind: ProxyKind,
    pub(crate) instance_transform: Mat4,
    pub(crate) volume_transform: Mat4,
    pub(crate) content_version: u64,
    pub(crate) source_version: u64,
    pub(crate) flags: ProxyFlags,
    pub(crate) extruder_id: i32,
    pub(crate) buffer: Option<B>,
}

impl<B> RenderableProxy<B> {
    pub(crate) fn new(identity: GeometryIdentity, kind: ProxyKind) -> Self {
        Self {
            identity,
            position: None,
            kind,
            instance_transform: Mat4::IDENTITY,
            volume_transform: Mat4::IDENTITY,
            content_version: 0,
            source_version: 0,
            flags: ProxyFlags {
                is_modifier: kind.is_modifier(),
                ..ProxyFlags::default()
            },
            extruder_id: 0,
            buffer: None,
        }
    }

    pub fn identity(&self) -> GeometryIdentity {
        self.identity
    }

    pub fn position(&self) -> Option<CompositePosition> {
        self.position
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn instance_transform(&self) -> Mat4 {
        self.instance_transform
    }

    pub fn volume_transform(&self) -> Mat4 {
        self.volume_transform
    }

    pub fn world_transform(&self) -> Mat4 {
        self.instance_transform * self.volume_transform
    }

    pub fn content_version(&self) -> u64 {
        self.content_version
    }

    /// Mesh version of the source the current buffer was built from.
    pub fn source_version(&self) -> u64 {
        self.source_version
    }

    pub fn flags(&self) -> ProxyFlags {
        self.flags
    }

    pub fn extruder_id(&self) -> i32 {
        self.extruder_id
    }

    pub fn buffer(&self) -> Option<&B> {
        self.buffer.as_ref()
    }

    pub fn is_selected(&self) -> bool {
        self.flags.selected
    }

    pub fn hover_state(&self) -> HoverState {
        HoverState::from_flags(self.flags.selected, self.flags.hovered)
    }

    /// Whether the proxy takes part in the pick pass.
    pub fn is_pickable(&self) -> bool {
        self.flags.active
            && self.flags.renderable
            && self.buffer.is_some()
            && !matches!(self.kind, ProxyKind::StepArtifact { .. })
    }

    /// Object/instance pair used to group volumes for instance-level
    /// selection. Auxiliary proxies form no group.
    pub fn instance_key(&self) -> Option<(usize, usize)> {
        self.position
            .map(|position| (position.object_index, position.instance_index))
    }

    /// Drop the current buffer ahead of a reload so the replacement is
    /// budgeted without it.
    pub(crate) fn release_buffer(&mut self) {
        self.buffer = None;
        self.flags.renderable = false;
    }

    pub(crate) fn install_buffer(&mut self, buffer: Option<B>, source_version: u64) {
        self.flags.renderable = buffer.is_some();
        self.buffer = buffer;
        self.source_version = source_version;
        self.content_version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ObjectId;

    #[test]
    fn hover_state_combines_flags() {
        assert_eq!(HoverState::from_flags(false, false), HoverState::Idle);
        assert_eq!(HoverState::from_flags(false, true), HoverState::Hovered);
        assert_eq!(HoverState::from_flags(true, false), HoverState::Selected);
        assert_eq!(
            HoverState::from_flags(true, true),
            HoverState::HoverWhileSelected
        );
    }

    #[test]
    fn installing_buffer_bumps_content_version() {
        let mut proxy: RenderableProxy<u32> = RenderableProxy::new(
            GeometryIdentity::new(ObjectId(1), ObjectId(2)),
            ProxyKind::Volume {
                kind: VolumeKind::ModelPart,
            },
        );
        proxy.install_buffer(Some(7), 0);
        assert_eq!(proxy.content_version(), 1);
        assert!(proxy.is_pickable());

        proxy.install_buffer(None, 3);
        assert_eq!(proxy.content_version(), 2);
        assert_eq!(proxy.source_version(), 3);
        assert!(!proxy.flags().renderable);
        assert!(!proxy.is_pickable());
    }

    #[test]
    fn step_artifacts_are_never_pickable() {
        let mut proxy: RenderableProxy<u32> = RenderableProxy::new(
            GeometryIdentity::new(ObjectId(10), ObjectId(2)),
            ProxyKind::StepArtifact {
                step: StepKind::SupportTree,
            },
        );
        proxy.install_buffer(Some(1), 0);
        assert!(!proxy.is_pickable());
    }
}
