//! JSON scene description loaded by the headless viewer.
//!
//! Ids are optional in the file. Explicit ids are kept (so two files can
//! describe the same entities before and after an edit); missing ones are
//! minted from the mirror's identity source after every explicit id has been
//! observed.

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use glam::{Mat4, Quat, Vec3};
use plater_scene::{
    CompletedStep, IdentitySource, ModelInstance, ModelObject, ModelSnapshot, ModelVolume,
    ObjectId, PlateSnapshot, StepKind, TriangleMesh, VolumeKind,
};
use serde::Deserialize;

use crate::primitives::{self, PrimitiveKind};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SceneFile {
    #[serde(default)]
    pub camera: Option<CameraSpec>,
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    #[serde(default)]
    pub plates: Vec<PlateSnapshot>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectSpec {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSpec {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default = "default_volume_kind")]
    pub kind: VolumeKind,
    pub primitive: PrimitiveKind,
    #[serde(default = "default_size")]
    pub size: [f32; 3],
    #[serde(default)]
    pub offset: [f32; 3],
    #[serde(default)]
    pub mesh_version: u64,
    #[serde(default)]
    pub extruder: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSpec {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default)]
    pub rotation_deg: f32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default = "default_printable")]
    pub printable: bool,
}

/// Finished background step, addressed by object/instance position in the
/// file.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub timestamp: Option<u64>,
    pub object: usize,
    pub instance: usize,
    pub kind: StepKind,
    #[serde(default = "default_step_height")]
    pub height: f32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CameraSpec {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    #[serde(default = "default_fov")]
    pub fov_deg: f32,
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self {
            eye: [0.0, -180.0, 160.0],
            target: [0.0, 0.0, 0.0],
            fov_deg: default_fov(),
        }
    }
}

impl CameraSpec {
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(Vec3::from(self.eye), Vec3::from(self.target), Vec3::Z);
        let projection = Mat4::perspective_rh(self.fov_deg.to_radians(), aspect, 0.5, 4000.0);
        projection * view
    }
}

fn default_volume_kind() -> VolumeKind {
    VolumeKind::ModelPart
}

fn default_size() -> [f32; 3] {
    [20.0, 20.0, 20.0]
}

fn default_scale() -> f32 {
    1.0
}

fn default_printable() -> bool {
    true
}

fn default_step_height() -> f32 {
    3.0
}

fn default_fov() -> f32 {
    45.0
}

pub struct LoadedScene {
    pub model: ModelSnapshot,
    pub steps: Vec<CompletedStep>,
    pub camera: CameraSpec,
}

pub fn load_scene(path: &Path, ids: &mut IdentitySource) -> Result<LoadedScene> {
    let data = fs::read(path).with_context(|| format!("reading scene {}", path.display()))?;
    let scene: SceneFile = serde_json::from_slice(&data)
        .with_context(|| format!("parsing scene {}", path.display()))?;
    scene
        .build(ids)
        .with_context(|| format!("building scene {}", path.display()))
}

impl SceneFile {
    fn explicit_ids(&self) -> impl Iterator<Item = u64> + '_ {
        let objects = self.objects.iter().flat_map(|object| {
            object
                .id
                .into_iter()
                .chain(object.volumes.iter().filter_map(|volume| volume.id))
                .chain(object.instances.iter().filter_map(|instance| instance.id))
        });
        objects.chain(self.steps.iter().filter_map(|step| step.timestamp))
    }

    pub fn build(&self, ids: &mut IdentitySource) -> Result<LoadedScene> {
        for id in self.explicit_ids() {
            ensure!(id != ObjectId::RESERVED.0, "id 0 is reserved");
            ids.observe(ObjectId(id));
        }
        let mut resolve = |explicit: Option<u64>| explicit.map(ObjectId).unwrap_or_else(|| ids.mint());

        let objects: Vec<ModelObject> = self
            .objects
            .iter()
            .map(|object| ModelObject {
                id: resolve(object.id),
                name: object.name.clone(),
                volumes: object
                    .volumes
                    .iter()
                    .map(|volume| ModelVolume {
                        id: resolve(volume.id),
                        kind: volume.kind,
                        transform: Mat4::from_translation(Vec3::from(volume.offset)),
                        mesh: primitives::scaled(volume.primitive, volume.size),
                        mesh_version: volume.mesh_version,
                        extruder_id: volume.extruder,
                    })
                    .collect(),
                instances: object
                    .instances
                    .iter()
                    .map(|instance| ModelInstance {
                        id: resolve(instance.id),
                        transform: Mat4::from_scale_rotation_translation(
                            Vec3::splat(instance.scale),
                            Quat::from_rotation_z(instance.rotation_deg.to_radians()),
                            Vec3::from(instance.translation),
                        ),
                        printable: instance.printable,
                    })
                    .collect(),
            })
            .collect();

        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let object = objects
                .get(step.object)
                .with_context(|| format!("step {index} names missing object {}", step.object))?;
            let instance = object.instances.get(step.instance).with_context(|| {
                format!(
                    "step {index} names missing instance {} of object {}",
                    step.instance, step.object
                )
            })?;
            steps.push(CompletedStep {
                timestamp: resolve(step.timestamp),
                object: object.id,
                instance: instance.id,
                step: step.kind,
                mesh: step_mesh(step.kind, step.height),
            });
        }

        Ok(LoadedScene {
            model: ModelSnapshot {
                objects,
                plates: self.plates.clone(),
            },
            steps,
            camera: self.camera.unwrap_or_default(),
        })
    }
}

/// Support artifacts hang below the instance origin.
fn step_mesh(kind: StepKind, height: f32) -> TriangleMesh {
    let height = height.max(0.1);
    let mut mesh = match kind {
        StepKind::Pad => primitives::scaled(PrimitiveKind::Cube, [24.0, 24.0, height]),
        StepKind::SupportTree => primitives::scaled(PrimitiveKind::Cone, [6.0, 6.0, height]),
    };
    for position in &mut mesh.positions {
        position[2] -= height;
    }
    mesh
}
