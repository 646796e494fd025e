//! Read-only snapshot of the editable model graph, as handed to the
//! reconciler. The snapshot is produced by the application after every edit
//! and by background steps when they finish; this crate never mutates it.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::identity::ObjectId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub objects: Vec<ModelObject>,
    #[serde(default)]
    pub plates: Vec<PlateSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: ObjectId,
    #[serde(default)]
    pub name: String,
    pub volumes: Vec<ModelVolume>,
    pub instances: Vec<ModelInstance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    ModelPart,
    NegativeVolume,
    Modifier,
    SupportEnforcer,
    SupportBlocker,
}

impl VolumeKind {
    /// Modifier-like volumes only alter settings of the parts they overlap.
    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            VolumeKind::Modifier | VolumeKind::SupportEnforcer | VolumeKind::SupportBlocker
        )
    }

    pub fn is_model_part(self) -> bool {
        self == VolumeKind::ModelPart
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVolume {
    pub id: ObjectId,
    pub kind: VolumeKind,
    #[serde(default)]
    pub transform: Mat4,
    pub mesh: TriangleMesh,
    /// Bumped by the model when the mesh is swapped without changing `id`.
    #[serde(default)]
    pub mesh_version: u64,
    #[serde(default)]
    pub extruder_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInstance {
    pub id: ObjectId,
    #[serde(default)]
    pub transform: Mat4,
    #[serde(default = "default_printable")]
    pub printable: bool,
}

fn default_printable() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SupportTree,
    Pad,
}

/// Output of a finished background step for one instance of an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedStep {
    /// Timestamp of the step run that produced `mesh`; doubles as the
    /// content id of the derived proxy.
    pub timestamp: ObjectId,
    pub object: ObjectId,
    pub instance: ObjectId,
    pub step: StepKind,
    pub mesh: TriangleMesh,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlateSnapshot {
    pub index: usize,
    #[serde(default)]
    pub wipe_tower: Option<WipeTowerFootprint>,
}

/// Plate-scoped purge block shared by all objects on a plate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WipeTowerFootprint {
    pub position: [f32; 2],
    #[serde(default)]
    pub rotation_deg: f32,
    pub width: f32,
    pub depth: f32,
    pub height: f32,
    #[serde(default)]
    pub brim_width: f32,
}

impl WipeTowerFootprint {
    /// True when both footprints tessellate to the same local mesh, i.e. only
    /// the placement differs.
    pub fn same_geometry(&self, other: &WipeTowerFootprint) -> bool {
        self.width == other.width
            && self.depth == other.depth
            && self.height == other.height
            && self.brim_width == other.brim_width
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(
            Quat::from_rotation_z(self.rotation_deg.to_radians()),
            Vec3::new(self.position[0], self.position[1], 0.0),
        )
    }

    /// Local-space box including the brim, resting on z = 0.
    pub fn mesh(&self) -> TriangleMesh {
        let brim = self.brim_width.max(0.0);
        TriangleMesh::cuboid(
            Vec3::new(-brim, -brim, 0.0),
            Vec3::new(self.width + brim, self.depth + brim, self.height.max(0.0)),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Size in bytes once uploaded as `f32x3` positions plus `u32` indices.
    pub fn byte_len(&self) -> u64 {
        (self.positions.len() * std::mem::size_of::<[f32; 3]>()
            + self.indices.len() * std::mem::size_of::<u32>()) as u64
    }

    pub fn cuboid(min: Vec3, max: Vec3) -> Self {
        let corners = [
            [min.x, min.y, min.z],
            [max.x, min.y, min.z],
            [max.x, max.y, min.z],
            [min.x, max.y, min.z],
            [min.x, min.y, max.z],
            [max.x, min.y, max.z],
            [max.x, max.y, max.z],
            [min.x, max.y, max.z],
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 0, 3, 2, // bottom
            4, 5, 6, 4, 6, 7, // top
            0, 1, 5, 0, 5, 4, // front
            1, 2, 6, 1, 6, 5, // right
            2, 3, 7, 2, 7, 6, // back
            3, 0, 4, 3, 4, 7, // left
        ];
        Self::new(corners.to_vec(), indices)
    }
}

/// Location of an instance inside the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct InstanceLookup<'a> {
    pub object_index: usize,
    pub instance_index: usize,
    pub instance: &'a ModelInstance,
}

impl ModelSnapshot {
    pub fn find_instance(&self, object: ObjectId, instance: ObjectId) -> Option<InstanceLookup<'_>> {
        let (object_index, model_object) = self
            .objects
            .iter()
            .enumerate()
            .find(|(_, candidate)| candidate.id == object)?;
        let (instance_index, model_instance) = model_object
            .instances
            .iter()
            .enumerate()
            .find(|(_, candidate)| candidate.id == instance)?;
        Some(InstanceLookup {
            object_index,
            instance_index,
            instance: model_instance,
        })
    }

    /// Largest id referenced anywhere in the snapshot.
    pub fn max_object_id(&self) -> ObjectId {
        let mut max = ObjectId::RESERVED;
        for object in &self.objects {
            max = max.max(object.id);
            for volume in &object.volumes {
                max = max.max(volume.id);
            }
            for instance in &object.instances {
                max = max.max(instance.id);
            }
        }
        max
    }

    pub fn volume_instance_count(&self) -> usize {
        self.objects
            .iter()
            .map(|object| object.volumes.len() * object.instances.len())
            .sum()
    }
}
