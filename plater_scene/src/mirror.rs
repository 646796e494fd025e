//! Frame-level facade the UI talks to: one reconciliation per model change,
//! picks and pointer events in between.

use std::collections::{BTreeMap, BTreeSet};

use glam::Mat4;

use crate::config::MirrorConfig;
use crate::identity::IdentitySource;
use crate::model::{CompletedStep, ModelSnapshot};
use crate::picking::{PickDraw, PickHandle, PickHit, PickRegion, PickSurface, PickTable, PixelBlock};
use crate::proxy::HoverState;
use crate::reconcile::{ReconcileOptions, ReconcileOutcome, reconcile};
use crate::registry::{Diagnostic, IndexRemap, MeshUploader, Registry};
use crate::selection::{
    self, DragTracker, Modifiers, PressOutcome, RectOutcome, SelectionSet,
};

#[derive(Debug)]
pub struct SceneMirror<B> {
    registry: Registry<B>,
    config: MirrorConfig,
    table: PickTable,
    /// Plate and gizmo handle geometry drawn after the proxies.
    handles: Vec<PickHandle<B>>,
    selection: SelectionSet,
    hover: BTreeSet<usize>,
    /// Last point-pick result, including plate and gizmo handles.
    pointer_hit: Option<PickHit>,
    /// Proxies under the pending selection rectangle.
    rect_hits: BTreeSet<usize>,
    cursor: [f32; 2],
    drag: DragTracker,
    diagnostics: Vec<Diagnostic>,
}

impl<B> SceneMirror<B> {
    pub fn new(config: MirrorConfig) -> Self {
        Self::with_registry(Registry::new(), config)
    }

    pub fn with_registry(registry: Registry<B>, config: MirrorConfig) -> Self {
        let table = PickTable::assign(&registry, config.plate_count, config.gizmo_handles);
        Self {
            selection: SelectionSet::new(config.default_selection_mode),
            drag: DragTracker::new(config.drag_threshold_px),
            registry,
            config,
            table,
            handles: Vec::new(),
            hover: BTreeSet::new(),
            pointer_hit: None,
            rect_hits: BTreeSet::new(),
            cursor: [0.0, 0.0],
            diagnostics: Vec::new(),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry<B> {
        &self.registry
    }

    pub fn identity_source_mut(&mut self) -> &mut IdentitySource {
        self.registry.identity_source_mut()
    }

    pub fn pick_table(&self) -> &PickTable {
        &self.table
    }

    /// Replace the handle geometry; the previous handles and their buffers
    /// are dropped. Handles outside the configured bands are kept but not
    /// drawn until a later table has room for them.
    pub fn set_handles(&mut self, handles: Vec<PickHandle<B>>) {
        let undrawable = handles
            .iter()
            .filter(|handle| self.table.handle_color(handle.id).is_none())
            .count();
        if undrawable > 0 {
            log::warn!("[plater_scene] {undrawable} handles fall outside the pick bands");
        }
        if matches!(self.pointer_hit, Some(PickHit::PlateHandle { .. } | PickHit::Gizmo(_))) {
            self.pointer_hit = None;
        }
        self.handles = handles;
    }

    pub fn handles(&self) -> &[PickHandle<B>] {
        &self.handles
    }

    /// Everything the pick pass draws for the current table.
    pub fn pick_draws(&self) -> Vec<PickDraw<'_, B>> {
        self.table.draws(&self.registry, &self.handles)
    }

    /// Sync the registry with the model, then rebase selection and hover
    /// through the remap and rebuild pick ids.
    pub fn reconcile<U>(
        &mut self,
        model: &ModelSnapshot,
        steps: &[CompletedStep],
        uploader: &mut U,
        options: ReconcileOptions,
    ) -> ReconcileOutcome
    where
        U: MeshUploader<Buffer = B>,
    {
        let outcome = reconcile(&mut self.registry, model, steps, uploader, options);
        self.diagnostics.extend(outcome.diagnostics.iter().cloned());
        self.rebase(&outcome.remap);

        let plate_count = self.config.plate_count.max(model.plates.len());
        self.table = PickTable::assign(&self.registry, plate_count, self.config.gizmo_handles);
        log::debug!(
            "[plater_scene] pick table: {} of {} proxies pickable",
            self.table.pickable_count(),
            self.table.proxy_count()
        );
        outcome
    }

    fn rebase(&mut self, remap: &IndexRemap) {
        let dropped = self.selection.remap(remap);
        if dropped > 0 {
            log::debug!("[plater_scene] {dropped} selected proxies released");
        }
        self.hover = self.hover.iter().filter_map(|&old| remap.get(old)).collect();
        self.rect_hits = self
            .rect_hits
            .iter()
            .filter_map(|&old| remap.get(old))
            .collect();
        if let Some(PickHit::Proxy(old)) = self.pointer_hit {
            self.pointer_hit = remap.get(old).map(PickHit::Proxy);
        }
        selection::sync_selected_flags(&mut self.registry, &self.selection);
        selection::apply_hover(&mut self.registry, &self.hover);
    }

    fn render_region<S>(
        &mut self,
        surface: &mut S,
        view_projection: Mat4,
        region: PickRegion,
    ) -> Option<PixelBlock>
    where
        S: PickSurface<B>,
    {
        let (width, height) = surface.target_size();
        let region = region.clamp_to(width, height)?;
        let draws = self.table.draws(&self.registry, &self.handles);
        match surface.render_pick_pass(&draws, view_projection, region) {
            Ok(block) => Some(block),
            Err(err) => {
                log::warn!("[plater_scene] pick pass failed: {err}");
                self.diagnostics.push(Diagnostic::PickFailed(err.to_string()));
                None
            }
        }
    }

    /// Pick the entity under `(x, y)` and update hover flags. Hover is frozen
    /// while a drag is in progress.
    pub fn begin_point_pick<S>(
        &mut self,
        surface: &mut S,
        view_projection: Mat4,
        x: u32,
        y: u32,
    ) -> Option<PickHit>
    where
        S: PickSurface<B>,
    {
        self.cursor = [x as f32, y as f32];
        let hit = self
            .render_region(surface, view_projection, PickRegion::point(x, y))
            .and_then(|block| self.table.decode_point(&block, x, y));
        self.pointer_hit = hit;
        if !self.drag.is_dragging() {
            self.hover = hit.and_then(PickHit::proxy).into_iter().collect();
            selection::apply_hover(&mut self.registry, &self.hover);
        }
        hit
    }

    /// Decode every entity inside the rectangle spanned by both corners. The
    /// proxies found become the hover set until [`Self::rect_release`].
    pub fn begin_rect_pick<S>(
        &mut self,
        surface: &mut S,
        view_projection: Mat4,
        x0: u32,
        y0: u32,
        x1: u32,
        y1: u32,
    ) -> BTreeSet<PickHit>
    where
        S: PickSurface<B>,
    {
        let region = PickRegion::from_corners(x0, y0, x1, y1);
        let hits = self
            .render_region(surface, view_projection, region)
            .map(|block| {
                self.table
                    .decode_rect(&block, self.config.parallel_decode_min_pixels)
            })
            .unwrap_or_default();
        self.rect_hits = hits.iter().filter_map(|hit| hit.proxy()).collect();
        self.hover = self.rect_hits.clone();
        selection::apply_hover(&mut self.registry, &self.hover);
        hits
    }

    /// Mouse-button press on whatever the last point pick resolved to.
    pub fn press(&mut self, modifiers: Modifiers) -> PressOutcome {
        let hit = self.pointer_hit.and_then(PickHit::proxy);
        let outcome = selection::on_point_press(
            &self.registry,
            &mut self.selection,
            hit,
            modifiers,
            self.config.default_selection_mode,
        );
        if matches!(outcome, PressOutcome::Selected | PressOutcome::DragCandidate) {
            self.drag.arm(self.cursor);
        }
        selection::sync_selected_flags(&mut self.registry, &self.selection);
        outcome
    }

    /// Returns `true` when this move starts a drag of the selection.
    pub fn cursor_moved(&mut self, x: f32, y: f32) -> bool {
        self.cursor = [x, y];
        let started = self.drag.moved(self.cursor);
        if started {
            log::debug!(
                "[plater_scene] dragging {} selected proxies",
                self.selection.len()
            );
        }
        started
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_dragging()
    }

    /// Returns whether the press turned into a drag.
    pub fn release(&mut self) -> bool {
        self.drag.release()
    }

    /// Apply the pending rectangle to the selection. Clears the rectangle
    /// state whatever the outcome.
    pub fn rect_release(&mut self, modifiers: Modifiers) -> RectOutcome {
        let hits = std::mem::take(&mut self.rect_hits);
        let outcome = selection::on_rect_release(
            &self.registry,
            &mut self.selection,
            &hits,
            modifiers,
            self.config.default_selection_mode,
        );
        if outcome == RectOutcome::InvalidModifiers {
            log::debug!("[plater_scene] rectangle with alt+shift ignored");
        }
        self.hover.clear();
        selection::sync_selected_flags(&mut self.registry, &self.selection);
        selection::apply_hover(&mut self.registry, &self.hover);
        outcome
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        selection::sync_selected_flags(&mut self.registry, &self.selection);
    }

    pub fn current_selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn current_hover_set(&self) -> &BTreeSet<usize> {
        &self.hover
    }

    /// Plate or gizmo handle under the cursor, if that is what was picked.
    pub fn hovered_handle(&self) -> Option<PickHit> {
        self.pointer_hit.filter(|hit| hit.proxy().is_none())
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.registry
            .get(index)
            .is_some_and(|proxy| proxy.is_selected())
    }

    pub fn hover_state(&self, index: usize) -> Option<HoverState> {
        self.registry.get(index).map(|proxy| proxy.hover_state())
    }

    pub fn selected_instances(&self) -> BTreeMap<(usize, usize), usize> {
        selection::selected_instances(&self.registry, &self.selection)
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ObjectId;
    use crate::model::{ModelInstance, ModelObject, ModelVolume, TriangleMesh, VolumeKind};
    use crate::picking::{PickDraw, PickSurfaceError};
    use crate::registry::{UploadError, UploadRequest};
    use glam::Vec3;

    struct CountingUploader;

    impl MeshUploader for CountingUploader {
        type Buffer = ();

        fn upload(&mut self, _request: UploadRequest<'_>) -> Result<(), UploadError> {
            Ok(())
        }
    }

    /// Every pixel shows the proxy drawn last.
    struct LastDrawSurface;

    impl PickSurface<()> for LastDrawSurface {
        fn target_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn render_pick_pass(
            &mut self,
            draws: &[PickDraw<'_, ()>],
            _view_projection: Mat4,
            region: PickRegion,
        ) -> Result<PixelBlock, PickSurfaceError> {
            let mut block = PixelBlock::empty(region);
            if let Some(draw) = draws.last() {
                for y in region.y..region.y + region.height {
                    for x in region.x..region.x + region.width {
                        block.set_pixel(x, y, draw.color);
                    }
                }
            }
            Ok(block)
        }
    }

    struct BrokenSurface;

    impl PickSurface<()> for BrokenSurface {
        fn target_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn render_pick_pass(
            &mut self,
            _draws: &[PickDraw<'_, ()>],
            _view_projection: Mat4,
            _region: PickRegion,
        ) -> Result<PixelBlock, PickSurfaceError> {
            Err(PickSurfaceError::Device("lost".into()))
        }
    }

    fn model(objects: u64) -> ModelSnapshot {
        ModelSnapshot {
            objects: (0..objects)
                .map(|i| ModelObject {
                    id: ObjectId(100 + i),
                    name: format!("object {i}"),
                    volumes: vec![ModelVolume {
                        id: ObjectId(200 + i),
                        kind: VolumeKind::ModelPart,
                        transform: Mat4::IDENTITY,
                        mesh: TriangleMesh::cuboid(Vec3::ZERO, Vec3::ONE),
                        mesh_version: 0,
                        extruder_id: 0,
                    }],
                    instances: vec![ModelInstance {
                        id: ObjectId(300 + i),
                        transform: Mat4::IDENTITY,
                        printable: true,
                    }],
                })
                .collect(),
            plates: Vec::new(),
        }
    }

    #[test]
    fn point_pick_hovers_and_press_selects() {
        let mut mirror = SceneMirror::new(MirrorConfig::default());
        mirror.reconcile(&model(3), &[], &mut CountingUploader, ReconcileOptions::default());
        let hit = mirror.begin_point_pick(&mut LastDrawSurface, Mat4::IDENTITY, 2, 2);
        assert_eq!(hit, Some(PickHit::Proxy(2)));
        assert_eq!(mirror.hover_state(2), Some(HoverState::Hovered));
        assert_eq!(mirror.hover_state(1), Some(HoverState::Idle));

        assert_eq!(mirror.press(Modifiers::NONE), PressOutcome::Selected);
        assert_eq!(mirror.hover_state(2), Some(HoverState::HoverWhileSelected));
        assert!(mirror.is_selected(2));
    }

    #[test]
    fn picks_outside_target_hit_nothing() {
        let mut mirror = SceneMirror::new(MirrorConfig::default());
        mirror.reconcile(&model(1), &[], &mut CountingUploader, ReconcileOptions::default());
        assert_eq!(
            mirror.begin_point_pick(&mut LastDrawSurface, Mat4::IDENTITY, 50, 2),
            None
        );
        assert!(mirror.current_hover_set().is_empty());
        assert!(mirror.take_diagnostics().is_empty());
    }

    #[test]
    fn surface_failure_becomes_diagnostic() {
        let mut mirror = SceneMirror::new(MirrorConfig::default());
        mirror.reconcile(&model(1), &[], &mut CountingUploader, ReconcileOptions::default());
        assert_eq!(mirror.begin_point_pick(&mut BrokenSurface, Mat4::IDENTITY, 1, 1), None);
        let diagnostics = mirror.take_diagnostics();
        assert!(matches!(diagnostics.as_slice(), [Diagnostic::PickFailed(_)]));
    }

    #[test]
    fn hover_is_frozen_while_dragging() {
        let mut mirror = SceneMirror::new(MirrorConfig::default());
        mirror.reconcile(&model(2), &[], &mut CountingUploader, ReconcileOptions::default());
        mirror.begin_point_pick(&mut LastDrawSurface, Mat4::IDENTITY, 1, 1);
        mirror.press(Modifiers::NONE);
        assert!(mirror.cursor_moved(7.0, 7.0));
        mirror.reconcile(&model(1), &[], &mut CountingUploader, ReconcileOptions::default());
        // Proxy 1 was released; the hover set is rebased, not recomputed.
        assert!(mirror.current_hover_set().is_empty());
        assert!(mirror.current_selection().is_empty());
        mirror.begin_point_pick(&mut LastDrawSurface, Mat4::IDENTITY, 1, 1);
        assert!(mirror.current_hover_set().is_empty());
        assert!(mirror.release());
        mirror.begin_point_pick(&mut LastDrawSurface, Mat4::IDENTITY, 1, 1);
        assert_eq!(mirror.current_hover_set().len(), 1);
    }
}
