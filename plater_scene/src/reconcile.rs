//! Diffs the model snapshot against the proxy registry.
//!
//! Every pass first enumerates the proxies the snapshot requires, sorts them
//! by [`GeometryIdentity`], and matches existing proxies against that list by
//! binary search. All retain/release/create decisions are made before the
//! registry is touched; the plan is then applied in one go and summarised as
//! an [`IndexRemap`] that selection and hover state must be rebased through.
//! Plate-scoped auxiliary proxies (wipe towers) have no owning volume and are
//! matched by plate index instead.

use std::collections::BTreeMap;

use glam::Mat4;

use crate::identity::GeometryIdentity;
use crate::model::{
    CompletedStep, ModelInstance, ModelSnapshot, ModelVolume, TriangleMesh, WipeTowerFootprint,
};
use crate::proxy::{CompositePosition, ProxyKind, RenderableProxy};
use crate::registry::{Diagnostic, IndexRemap, MeshUploader, Registry, UploadRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Release and recreate every proxy instead of matching.
    pub force_full_refresh: bool,
    /// Only mirror physical model parts (restricted views such as painting).
    pub model_parts_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub remap: IndexRemap,
    pub retained: usize,
    pub created: usize,
    pub released: usize,
    pub reloaded: usize,
    pub stale_references: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ReconcileOutcome {
    /// True when the pass left the registry exactly as it found it.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.released == 0 && self.reloaded == 0 && self.remap.is_identity()
    }
}

#[derive(Debug, Clone, Copy)]
enum RequiredSource<'a> {
    Volume {
        volume: &'a ModelVolume,
        instance: &'a ModelInstance,
    },
    Step {
        step: &'a CompletedStep,
        instance: &'a ModelInstance,
    },
}

#[derive(Debug, Clone, Copy)]
struct RequiredEntry<'a> {
    identity: GeometryIdentity,
    position: CompositePosition,
    source: RequiredSource<'a>,
}

impl<'a> RequiredEntry<'a> {
    fn kind(&self) -> ProxyKind {
        match self.source {
            RequiredSource::Volume { volume, .. } => ProxyKind::Volume { kind: volume.kind },
            RequiredSource::Step { step, .. } => ProxyKind::StepArtifact { step: step.step },
        }
    }

    fn mesh(&self) -> &'a TriangleMesh {
        match self.source {
            RequiredSource::Volume { volume, .. } => &volume.mesh,
            RequiredSource::Step { step, .. } => &step.mesh,
        }
    }

    /// Step artifacts never change in place; a new run gets a new timestamp
    /// and therefore a new identity.
    fn source_version(&self) -> u64 {
        match self.source {
            RequiredSource::Volume { volume, .. } => volume.mesh_version,
            RequiredSource::Step { .. } => 0,
        }
    }

    fn instance(&self) -> &'a ModelInstance {
        match self.source {
            RequiredSource::Volume { instance, .. } | RequiredSource::Step { instance, .. } => {
                instance
            }
        }
    }

    fn volume_transform(&self) -> Mat4 {
        match self.source {
            RequiredSource::Volume { volume, .. } => volume.transform,
            RequiredSource::Step { .. } => Mat4::IDENTITY,
        }
    }

    fn extruder_id(&self) -> i32 {
        match self.source {
            RequiredSource::Volume { volume, .. } => volume.extruder_id,
            RequiredSource::Step { .. } => 0,
        }
    }

    fn upload_request(&self) -> UploadRequest<'a> {
        UploadRequest {
            identity: self.identity,
            mesh: self.mesh(),
        }
    }

    /// Copy placement and derived flags from the snapshot. Does not touch the
    /// buffer, content version, selection or hover.
    fn refresh<B>(&self, proxy: &mut RenderableProxy<B>) {
        proxy.position = Some(self.position);
        proxy.kind = self.kind();
        proxy.instance_transform = self.instance().transform;
        proxy.volume_transform = self.volume_transform();
        proxy.extruder_id = self.extruder_id();
        proxy.flags.printable = self.instance().printable;
        proxy.flags.is_modifier = proxy.kind.is_modifier();
        proxy.flags.active = true;
    }
}

#[derive(Debug, Clone, Copy)]
enum Decision {
    Release,
    Retain { required: usize },
    RetainAuxiliary { plate: usize },
}

/// Bring `registry` in line with `model` and the finished background `steps`.
///
/// Never fails: unmatched references are skipped and reported through
/// [`ReconcileOutcome::diagnostics`], upload failures leave the proxy in place
/// but non-renderable.
pub fn reconcile<U>(
    registry: &mut Registry<U::Buffer>,
    model: &ModelSnapshot,
    steps: &[CompletedStep],
    uploader: &mut U,
    options: ReconcileOptions,
) -> ReconcileOutcome
where
    U: MeshUploader,
{
    let mut outcome = ReconcileOutcome::default();

    let identities = registry.identity_source_mut();
    identities.observe(model.max_object_id());
    if let Some(latest) = steps.iter().map(|step| step.timestamp).max() {
        identities.observe(latest);
    }

    let required = collect_required(model, steps, options, &mut outcome);
    let towers = collect_wipe_towers(model);

    // Plan.
    let decisions = plan_existing(registry, &required, &towers, options);
    let mut required_matched = vec![false; required.len()];
    let mut towers_matched: BTreeMap<usize, bool> =
        towers.keys().map(|&plate| (plate, false)).collect();
    for decision in &decisions {
        match decision {
            Decision::Retain { required } => required_matched[*required] = true,
            Decision::RetainAuxiliary { plate } => {
                towers_matched.insert(*plate, true);
            }
            Decision::Release => {}
        }
    }

    // Apply.
    let (previous, exhaustion_reported) = registry.take_proxies();
    let mut next: Vec<RenderableProxy<U::Buffer>> = Vec::with_capacity(
        previous.len() + required_matched.iter().filter(|m| !**m).count(),
    );
    let mut remap = Vec::with_capacity(previous.len());

    for (mut proxy, decision) in previous.into_iter().zip(decisions) {
        match decision {
            Decision::Release => {
                log::trace!("[plater_scene] releasing proxy {}", proxy.identity);
                outcome.released += 1;
                remap.push(None);
            }
            Decision::Retain { required: entry_index } => {
                let entry = &required[entry_index];
                // A volume and a step artifact never share a buffer, even
                // when their versions happen to agree.
                let kind_changed =
                    std::mem::discriminant(&proxy.kind) != std::mem::discriminant(&entry.kind());
                entry.refresh(&mut proxy);
                if kind_changed || entry.source_version() != proxy.source_version {
                    log::debug!(
                        "[plater_scene] reloading {} (mesh version {} -> {}{})",
                        entry.identity,
                        proxy.source_version,
                        entry.source_version(),
                        if kind_changed { ", kind changed" } else { "" }
                    );
                    proxy.release_buffer();
                    let buffer = Registry::upload(
                        exhaustion_reported,
                        uploader,
                        entry.upload_request(),
                        &mut outcome.diagnostics,
                    );
                    proxy.install_buffer(buffer, entry.source_version());
                    outcome.reloaded += 1;
                }
                outcome.retained += 1;
                remap.push(Some(next.len()));
                next.push(proxy);
            }
            Decision::RetainAuxiliary { plate } => {
                let Some(footprint) = towers.get(&plate) else {
                    remap.push(None);
                    outcome.released += 1;
                    continue;
                };
                let previous_footprint = match proxy.kind {
                    ProxyKind::Auxiliary { footprint, .. } => Some(footprint),
                    _ => None,
                };
                let geometry_changed =
                    previous_footprint.is_none_or(|prev| !prev.same_geometry(footprint));
                if geometry_changed {
                    let mesh = footprint.mesh();
                    proxy.release_buffer();
                    let buffer = Registry::upload(
                        exhaustion_reported,
                        uploader,
                        UploadRequest {
                            identity: GeometryIdentity::AUXILIARY,
                            mesh: &mesh,
                        },
                        &mut outcome.diagnostics,
                    );
                    proxy.install_buffer(buffer, 0);
                    outcome.reloaded += 1;
                }
                refresh_auxiliary(&mut proxy, plate, footprint);
                outcome.retained += 1;
                remap.push(Some(next.len()));
                next.push(proxy);
            }
        }
    }

    for (entry, _) in required
        .iter()
        .zip(&required_matched)
        .filter(|(_, matched)| !**matched)
    {
        let mut proxy = RenderableProxy::new(entry.identity, entry.kind());
        entry.refresh(&mut proxy);
        let buffer = Registry::upload(
            exhaustion_reported,
            uploader,
            entry.upload_request(),
            &mut outcome.diagnostics,
        );
        proxy.install_buffer(buffer, entry.source_version());
        outcome.created += 1;
        next.push(proxy);
    }

    for (plate, footprint) in &towers {
        if towers_matched.get(plate).copied().unwrap_or(false) {
            continue;
        }
        let mesh = footprint.mesh();
        let mut proxy = RenderableProxy::new(
            GeometryIdentity::AUXILIARY,
            ProxyKind::Auxiliary {
                plate: *plate,
                footprint: *footprint,
            },
        );
        let buffer = Registry::upload(
            exhaustion_reported,
            uploader,
            UploadRequest {
                identity: GeometryIdentity::AUXILIARY,
                mesh: &mesh,
            },
            &mut outcome.diagnostics,
        );
        proxy.install_buffer(buffer, 0);
        refresh_auxiliary(&mut proxy, *plate, footprint);
        outcome.created += 1;
        next.push(proxy);
    }

    registry.replace_proxies(next);
    outcome.remap = IndexRemap::new(remap);

    log::debug!(
        "[plater_scene] reconcile: {} retained, {} created, {} released, {} reloaded, {} stale",
        outcome.retained,
        outcome.created,
        outcome.released,
        outcome.reloaded,
        outcome.stale_references
    );
    outcome
}

fn refresh_auxiliary<B>(proxy: &mut RenderableProxy<B>, plate: usize, footprint: &WipeTowerFootprint) {
    proxy.kind = ProxyKind::Auxiliary {
        plate,
        footprint: *footprint,
    };
    proxy.position = None;
    proxy.instance_transform = footprint.transform();
    proxy.volume_transform = Mat4::IDENTITY;
    proxy.flags.printable = true;
    proxy.flags.is_modifier = false;
    proxy.flags.active = true;
}

fn collect_required<'a>(
    model: &'a ModelSnapshot,
    steps: &'a [CompletedStep],
    options: ReconcileOptions,
    outcome: &mut ReconcileOutcome,
) -> Vec<RequiredEntry<'a>> {
    let mut required = Vec::with_capacity(model.volume_instance_count() + steps.len());

    for (object_index, object) in model.objects.iter().enumerate() {
        for (volume_index, volume) in object.volumes.iter().enumerate() {
            if options.model_parts_only && !volume.kind.is_model_part() {
                continue;
            }
            for (instance_index, instance) in object.instances.iter().enumerate() {
                required.push(RequiredEntry {
                    identity: GeometryIdentity::new(volume.id, instance.id),
                    position: CompositePosition {
                        object_index,
                        volume_index: Some(volume_index),
                        instance_index,
                    },
                    source: RequiredSource::Volume { volume, instance },
                });
            }
        }
    }

    if !options.model_parts_only {
        for step in steps {
            let identity = GeometryIdentity::new(step.timestamp, step.instance);
            let Some(found) = model.find_instance(step.object, step.instance) else {
                let reason = format!(
                    "{:?} output references missing object {} / instance {}",
                    step.step, step.object, step.instance
                );
                log::warn!("[plater_scene] skipping step artifact {identity}: {reason}");
                outcome.stale_references += 1;
                outcome
                    .diagnostics
                    .push(Diagnostic::StaleReference { identity, reason });
                continue;
            };
            if !found.instance.printable {
                continue;
            }
            required.push(RequiredEntry {
                identity,
                position: CompositePosition {
                    object_index: found.object_index,
                    volume_index: None,
                    instance_index: found.instance_index,
                },
                source: RequiredSource::Step {
                    step,
                    instance: found.instance,
                },
            });
        }
    }

    required.sort_by_key(|entry| entry.identity);
    let before = required.len();
    required.dedup_by(|later, earlier| later.identity == earlier.identity);
    if required.len() != before {
        log::warn!(
            "[plater_scene] snapshot listed {} duplicate geometry identities; keeping the first of each",
            before - required.len()
        );
    }
    required
}

fn collect_wipe_towers(model: &ModelSnapshot) -> BTreeMap<usize, WipeTowerFootprint> {
    model
        .plates
        .iter()
        .filter_map(|plate| plate.wipe_tower.map(|tower| (plate.index, tower)))
        .collect()
}

fn plan_existing<B>(
    registry: &Registry<B>,
    required: &[RequiredEntry<'_>],
    towers: &BTreeMap<usize, WipeTowerFootprint>,
    options: ReconcileOptions,
) -> Vec<Decision> {
    let mut decisions = vec![Decision::Release; registry.len()];
    if options.force_full_refresh {
        return decisions;
    }

    let mut order: Vec<usize> = (0..registry.len()).collect();
    order.sort_by_key(|&index| registry.proxies[index].identity);

    let mut claimed = vec![false; required.len()];
    let mut claimed_plates = Vec::new();

    for index in order {
        let proxy = &registry.proxies[index];
        if let ProxyKind::Auxiliary { plate, .. } = proxy.kind {
            if towers.contains_key(&plate) && !claimed_plates.contains(&plate) {
                claimed_plates.push(plate);
                decisions[index] = Decision::RetainAuxiliary { plate };
            }
            continue;
        }
        let Ok(found) = required.binary_search_by_key(&proxy.identity, |entry| entry.identity)
        else {
            continue;
        };
        if claimed[found] {
            log::warn!(
                "[plater_scene] registry held duplicate proxy for {}; releasing the extra copy",
                proxy.identity
            );
            continue;
        }
        claimed[found] = true;
        decisions[index] = Decision::Retain { required: found };
    }
    decisions
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use glam::Vec3;

    use super::*;
    use crate::identity::{IdentitySource, ObjectId};
    use crate::model::{ModelObject, PlateSnapshot, StepKind, VolumeKind};
    use crate::registry::UploadError;

    #[derive(Debug)]
    struct TrackedBuffer {
        released: Rc<Cell<usize>>,
    }

    impl Drop for TrackedBuffer {
        fn drop(&mut self) {
            self.released.set(self.released.get() + 1);
        }
    }

    #[derive(Default)]
    struct TrackingUploader {
        uploads: Vec<GeometryIdentity>,
        released: Rc<Cell<usize>>,
        budget: Option<usize>,
    }

    impl MeshUploader for TrackingUploader {
        type Buffer = TrackedBuffer;

        fn upload(&mut self, request: UploadRequest<'_>) -> Result<TrackedBuffer, UploadError> {
            if let Some(budget) = self.budget {
                if self.uploads.len() - self.released.get() >= budget {
                    return Err(UploadError::ResourceExhausted {
                        requested: request.mesh.byte_len(),
                        limit: 0,
                    });
                }
            }
            self.uploads.push(request.identity);
            Ok(TrackedBuffer {
                released: Rc::clone(&self.released),
            })
        }
    }

    fn unit_mesh() -> TriangleMesh {
        TriangleMesh::cuboid(Vec3::ZERO, Vec3::ONE)
    }

    fn object(ids: &mut IdentitySource, volumes: &[VolumeKind], instances: usize) -> ModelObject {
        ModelObject {
            id: ids.mint(),
            name: "part".into(),
            volumes: volumes
                .iter()
                .map(|&kind| ModelVolume {
                    id: ids.mint(),
                    kind,
                    transform: Mat4::IDENTITY,
                    mesh: unit_mesh(),
                    mesh_version: 0,
                    extruder_id: 1,
                })
                .collect(),
            instances: (0..instances)
                .map(|_| ModelInstance {
                    id: ids.mint(),
                    transform: Mat4::IDENTITY,
                    printable: true,
                })
                .collect(),
        }
    }

    fn tower(x: f32) -> WipeTowerFootprint {
        WipeTowerFootprint {
            position: [x, 10.0],
            rotation_deg: 0.0,
            width: 60.0,
            depth: 12.0,
            height: 30.0,
            brim_width: 2.0,
        }
    }

    #[test]
    fn builds_one_proxy_per_volume_instance() {
        let mut ids = IdentitySource::new();
        let model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart, VolumeKind::Modifier], 3)],
            plates: Vec::new(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        let outcome = reconcile(
            &mut registry,
            &model,
            &[],
            &mut uploader,
            ReconcileOptions::default(),
        );
        assert_eq!(registry.len(), 6);
        assert_eq!(outcome.created, 6);
        assert!(registry.iter().all(|proxy| proxy.content_version() == 1));
        assert_eq!(
            registry.iter().filter(|proxy| proxy.flags().is_modifier).count(),
            3
        );
    }

    #[test]
    fn model_parts_only_skips_modifiers_and_steps() {
        let mut ids = IdentitySource::new();
        let model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart, VolumeKind::SupportBlocker], 1)],
            plates: Vec::new(),
        };
        let step = CompletedStep {
            timestamp: ids.mint(),
            object: model.objects[0].id,
            instance: model.objects[0].instances[0].id,
            step: StepKind::SupportTree,
            mesh: unit_mesh(),
        };
        let mut registry = Registry::with_identity_source(ids);
        reconcile(
            &mut registry,
            &model,
            std::slice::from_ref(&step),
            &mut TrackingUploader::default(),
            ReconcileOptions {
                model_parts_only: true,
                ..ReconcileOptions::default()
            },
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(0).map(|proxy| proxy.kind()),
            Some(ProxyKind::Volume {
                kind: VolumeKind::ModelPart
            })
        );
    }

    #[test]
    fn removed_instance_releases_buffers_and_compacts() {
        let mut ids = IdentitySource::new();
        let mut model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 3)],
            plates: Vec::new(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        let last = registry.get(2).map(|proxy| proxy.identity());

        model.objects[0].instances.remove(1);
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());

        assert_eq!(uploader.released.get(), 1);
        assert_eq!(outcome.remap.get(0), Some(0));
        assert_eq!(outcome.remap.get(1), None);
        assert_eq!(outcome.remap.get(2), Some(1));
        assert_eq!(registry.get(1).map(|proxy| proxy.identity()), last);
        let position = registry.get(1).and_then(|proxy| proxy.position());
        assert_eq!(position.map(|p| p.instance_index), Some(1));
        assert_eq!(registry.get(1).map(|proxy| proxy.content_version()), Some(1));
    }

    #[test]
    fn mesh_swap_reloads_in_place() {
        let mut ids = IdentitySource::new();
        let mut model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: Vec::new(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());

        model.objects[0].volumes[0].mesh = TriangleMesh::cuboid(Vec3::ZERO, Vec3::splat(2.0));
        model.objects[0].volumes[0].mesh_version = 1;
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());

        assert_eq!(outcome.reloaded, 1);
        assert_eq!(outcome.created, 0);
        assert!(outcome.remap.is_identity());
        assert_eq!(uploader.uploads.len(), 2);
        assert_eq!(uploader.released.get(), 1);
        assert_eq!(registry.get(0).map(|proxy| proxy.content_version()), Some(2));
    }

    #[test]
    fn step_timestamps_advance_the_id_counter() {
        let mut ids = IdentitySource::new();
        let model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: Vec::new(),
        };
        let step = CompletedStep {
            timestamp: ObjectId(500),
            object: model.objects[0].id,
            instance: model.objects[0].instances[0].id,
            step: StepKind::SupportTree,
            mesh: unit_mesh(),
        };
        let mut registry = Registry::with_identity_source(IdentitySource::new());
        reconcile(
            &mut registry,
            &model,
            std::slice::from_ref(&step),
            &mut TrackingUploader::default(),
            ReconcileOptions::default(),
        );
        assert_eq!(registry.identity_source_mut().mint(), ObjectId(501));
    }

    #[test]
    fn kind_change_under_same_identity_reloads() {
        let mut ids = IdentitySource::new();
        let mut model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: Vec::new(),
        };
        let instance = model.objects[0].instances[0].id;
        let step = CompletedStep {
            timestamp: ids.mint(),
            object: model.objects[0].id,
            instance,
            step: StepKind::SupportTree,
            mesh: unit_mesh(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        reconcile(
            &mut registry,
            &model,
            std::slice::from_ref(&step),
            &mut uploader,
            ReconcileOptions::default(),
        );
        let artifact = registry
            .find(GeometryIdentity::new(step.timestamp, instance))
            .expect("artifact proxy");

        // The step is gone and a volume now carries its id.
        model.objects[0].volumes[0].id = step.timestamp;
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());

        assert_eq!(registry.len(), 1);
        assert_eq!(outcome.reloaded, 1);
        assert_eq!(outcome.remap.get(artifact), Some(0));
        assert_eq!(
            registry.get(0).map(|proxy| proxy.kind()),
            Some(ProxyKind::Volume {
                kind: VolumeKind::ModelPart
            })
        );
        assert_eq!(registry.get(0).map(|proxy| proxy.content_version()), Some(2));
    }

    #[test]
    fn reload_at_budget_replaces_the_old_buffer() {
        let mut ids = IdentitySource::new();
        let mut model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: Vec::new(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader {
            budget: Some(1),
            ..TrackingUploader::default()
        };
        reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());

        model.objects[0].volumes[0].mesh_version = 1;
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());

        assert_eq!(outcome.reloaded, 1);
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(uploader.released.get(), 1);
        assert!(registry.get(0).expect("proxy kept").flags().renderable);
    }

    #[test]
    fn full_refresh_recreates_everything() {
        let mut ids = IdentitySource::new();
        let model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 2)],
            plates: vec![PlateSnapshot {
                index: 0,
                wipe_tower: Some(tower(100.0)),
            }],
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        let outcome = reconcile(
            &mut registry,
            &model,
            &[],
            &mut uploader,
            ReconcileOptions {
                force_full_refresh: true,
                ..ReconcileOptions::default()
            },
        );
        assert_eq!(outcome.released, 3);
        assert_eq!(outcome.created, 3);
        assert_eq!(uploader.released.get(), 3);
        assert_eq!(registry.len(), 3);
        assert!(outcome.remap.iter().all(|(_, new)| new.is_none()));
    }

    #[test]
    fn wipe_tower_move_keeps_buffer() {
        let mut ids = IdentitySource::new();
        let mut model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: vec![PlateSnapshot {
                index: 0,
                wipe_tower: Some(tower(100.0)),
            }],
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        let tower_index = registry.auxiliary_for_plate(0).expect("tower proxy");

        model.plates[0].wipe_tower = Some(tower(140.0));
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        assert_eq!(outcome.reloaded, 0);
        assert_eq!(uploader.uploads.len(), 2);
        let proxy = registry.get(tower_index).expect("tower kept");
        assert_eq!(proxy.content_version(), 1);
        assert_eq!(proxy.world_transform().w_axis.x, 140.0);

        model.plates[0].wipe_tower = Some(WipeTowerFootprint {
            height: 45.0,
            ..tower(140.0)
        });
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        assert_eq!(outcome.reloaded, 1);
        assert_eq!(
            registry.get(tower_index).map(|proxy| proxy.content_version()),
            Some(2)
        );

        model.plates[0].wipe_tower = None;
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        assert_eq!(outcome.remap.get(tower_index), None);
        assert!(registry.auxiliary_for_plate(0).is_none());
    }

    #[test]
    fn stale_step_is_skipped_not_fatal() {
        let mut ids = IdentitySource::new();
        let model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: Vec::new(),
        };
        let dangling = CompletedStep {
            timestamp: ids.mint(),
            object: model.objects[0].id,
            instance: ObjectId(9_999),
            step: StepKind::Pad,
            mesh: unit_mesh(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let outcome = reconcile(
            &mut registry,
            &model,
            std::slice::from_ref(&dangling),
            &mut TrackingUploader::default(),
            ReconcileOptions::default(),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(outcome.stale_references, 1);
        assert!(matches!(
            outcome.diagnostics.as_slice(),
            [Diagnostic::StaleReference { .. }]
        ));
    }

    #[test]
    fn non_printable_instances_drop_step_artifacts() {
        let mut ids = IdentitySource::new();
        let mut model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 1)],
            plates: Vec::new(),
        };
        let step = CompletedStep {
            timestamp: ids.mint(),
            object: model.objects[0].id,
            instance: model.objects[0].instances[0].id,
            step: StepKind::SupportTree,
            mesh: unit_mesh(),
        };
        let steps = vec![step];
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader::default();
        reconcile(&mut registry, &model, &steps, &mut uploader, ReconcileOptions::default());
        assert_eq!(registry.len(), 2);

        model.objects[0].instances[0].printable = false;
        let outcome = reconcile(&mut registry, &model, &steps, &mut uploader, ReconcileOptions::default());
        assert_eq!(registry.len(), 1);
        assert_eq!(outcome.released, 1);
        assert_eq!(outcome.stale_references, 0);
        assert!(!registry.get(0).expect("part kept").flags().printable);
    }

    #[test]
    fn exhausted_upload_keeps_proxy_registered() {
        let mut ids = IdentitySource::new();
        let model = ModelSnapshot {
            objects: vec![object(&mut ids, &[VolumeKind::ModelPart], 3)],
            plates: Vec::new(),
        };
        let mut registry = Registry::with_identity_source(ids);
        let mut uploader = TrackingUploader {
            budget: Some(1),
            ..TrackingUploader::default()
        };
        let outcome = reconcile(&mut registry, &model, &[], &mut uploader, ReconcileOptions::default());
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.iter().filter(|proxy| proxy.flags().renderable).count(),
            1
        );
        assert_eq!(outcome.diagnostics.len(), 1);
    }

    #[test]
    fn duplicate_snapshot_entries_collapse() {
        let mut ids = IdentitySource::new();
        let mut first = object(&mut ids, &[VolumeKind::ModelPart], 1);
        first.instances.push(first.instances[0].clone());
        let model = ModelSnapshot {
            objects: vec![first],
            plates: Vec::new(),
        };
        let mut registry = Registry::with_identity_source(ids);
        reconcile(
            &mut registry,
            &model,
            &[],
            &mut TrackingUploader::default(),
            ReconcileOptions::default(),
        );
        assert_eq!(registry.len(), 1);
    }
}
