//! Stable identities shared by the model snapshot and the proxy registry.
//!
//! Volumes, instances, objects and background-step timestamps all draw from
//! one id space so a step timestamp can never collide with a volume id inside
//! a [`GeometryIdentity`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a model entity or a background-step timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Never handed out by [`IdentitySource`]; used by the synthetic
    /// auxiliary identity.
    pub const RESERVED: ObjectId = ObjectId(0);

    pub fn is_reserved(self) -> bool {
        self == Self::RESERVED
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id counter. Owned by the registry and lent to whoever builds
/// model data or finishes a background step.
#[derive(Debug, Clone)]
pub struct IdentitySource {
    last: u64,
}

impl Default for IdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySource {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Resume after ids that were minted elsewhere (e.g. loaded from a scene
    /// file) so new ids stay unique.
    pub fn starting_after(last: u64) -> Self {
        Self { last }
    }

    pub fn mint(&mut self) -> ObjectId {
        self.last += 1;
        ObjectId(self.last)
    }

    /// Make sure subsequently minted ids are greater than `id`.
    pub fn observe(&mut self, id: ObjectId) {
        self.last = self.last.max(id.0);
    }

    pub fn last_minted(&self) -> u64 {
        self.last
    }
}

/// Names the content a proxy was built from: the source volume (or the
/// background step timestamp for derived artifacts) plus the owning instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GeometryIdentity {
    pub content_id: ObjectId,
    pub instance_id: ObjectId,
}

impl GeometryIdentity {
    /// Shared by every auxiliary plate-scoped proxy; those are told apart by
    /// plate index instead.
    pub const AUXILIARY: GeometryIdentity = GeometryIdentity {
        content_id: ObjectId::RESERVED,
        instance_id: ObjectId::RESERVED,
    };

    pub fn new(content_id: ObjectId, instance_id: ObjectId) -> Self {
        Self {
            content_id,
            instance_id,
        }
    }

    pub fn is_auxiliary(&self) -> bool {
        *self == Self::AUXILIARY
    }
}

impl fmt::Display for GeometryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auxiliary() {
            write!(f, "(auxiliary)")
        } else {
            write!(f, "({}, {})", self.content_id, self.instance_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_never_mints_reserved_id() {
        let mut source = IdentitySource::new();
        let first = source.mint();
        assert!(!first.is_reserved());
        assert_eq!(first, ObjectId(1));
    }

    #[test]
    fn observe_moves_counter_forward_only() {
        let mut source = IdentitySource::new();
        source.observe(ObjectId(40));
        source.observe(ObjectId(7));
        assert_eq!(source.mint(), ObjectId(41));
    }

    #[test]
    fn identities_order_by_content_then_instance() {
        let a = GeometryIdentity::new(ObjectId(3), ObjectId(9));
        let b = GeometryIdentity::new(ObjectId(4), ObjectId(1));
        let c = GeometryIdentity::new(ObjectId(4), ObjectId(2));
        let mut ids = vec![c, a, b];
        ids.sort();
        assert_eq!(ids, vec![a, b, c]);
        assert!(GeometryIdentity::AUXILIARY < a);
    }
}
