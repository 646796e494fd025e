//! Selection set plus the click/rectangle/hover rules that mutate it.
//!
//! Everything here operates on registry indices, which are only valid until
//! the next reconciliation; [`SelectionSet::remap`] must run after every pass.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::proxy::ProxyKind;
use crate::registry::{IndexRemap, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        shift: false,
        alt: false,
    };

    pub fn is_empty(&self) -> bool {
        !self.ctrl && !self.shift && !self.alt
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Instance,
    Volume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    mode: SelectionMode,
    indices: BTreeSet<usize>,
}

impl SelectionSet {
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            indices: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn indices(&self) -> &BTreeSet<usize> {
        &self.indices
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }

    pub fn replace<I>(&mut self, mode: SelectionMode, indices: I)
    where
        I: IntoIterator<Item = usize>,
    {
        self.mode = mode;
        self.indices = indices.into_iter().collect();
    }

    pub fn insert_all<I>(&mut self, indices: I) -> usize
    where
        I: IntoIterator<Item = usize>,
    {
        indices
            .into_iter()
            .filter(|index| self.indices.insert(*index))
            .count()
    }

    pub fn remove_all<I>(&mut self, indices: I) -> usize
    where
        I: IntoIterator<Item = usize>,
    {
        indices
            .into_iter()
            .filter(|index| self.indices.remove(index))
            .count()
    }

    /// Rebase onto the registry order produced by a reconciliation pass.
    /// Returns how many entries were dropped because their proxy is gone.
    pub fn remap(&mut self, remap: &IndexRemap) -> usize {
        let before = self.indices.len();
        self.indices = self
            .indices
            .iter()
            .filter_map(|&old| remap.get(old))
            .collect();
        before - self.indices.len()
    }
}

/// What a rectangle release does with the picked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectMode {
    Select,
    Deselect,
}

impl RectMode {
    /// `None` for the invalid `alt` + `shift` combination.
    pub fn from_modifiers(modifiers: Modifiers) -> Option<Self> {
        match (modifiers.shift, modifiers.alt) {
            (true, true) => None,
            (_, true) => Some(RectMode::Deselect),
            _ => Some(RectMode::Select),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// Selection replaced by the clicked entity (or its instance group).
    Selected,
    Added,
    Deselected,
    /// Clicked an already selected entity; selection is kept for a drag.
    DragCandidate,
    Cleared,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectOutcome {
    Added(usize),
    Removed(usize),
    /// Modifier volumes of several instances can't be selected together.
    Discarded,
    InvalidModifiers,
}

/// Indices selected together with `index` at the given granularity.
/// Modifiers and plate-scoped proxies are always selected on their own.
pub fn selection_group<B>(registry: &Registry<B>, index: usize, mode: SelectionMode) -> Vec<usize> {
    let Some(proxy) = registry.get(index) else {
        return Vec::new();
    };
    let standalone = proxy.flags().is_modifier
        || !matches!(proxy.kind(), ProxyKind::Volume { .. })
        || mode == SelectionMode::Volume;
    if standalone {
        return vec![index];
    }
    let group = registry.instance_group(index);
    if group.contains(&index) { group } else { vec![index] }
}

fn group_mode<B>(registry: &Registry<B>, index: usize, preferred: SelectionMode) -> SelectionMode {
    match registry.get(index) {
        Some(proxy) if proxy.flags().is_modifier => SelectionMode::Volume,
        _ => preferred,
    }
}

/// Mouse-button press resolved to `hit` (a pickable registry index).
pub fn on_point_press<B>(
    registry: &Registry<B>,
    selection: &mut SelectionSet,
    hit: Option<usize>,
    modifiers: Modifiers,
    default_mode: SelectionMode,
) -> PressOutcome {
    let Some(index) = hit.filter(|&index| index < registry.len()) else {
        if modifiers.is_empty() && !selection.is_empty() {
            selection.clear();
            return PressOutcome::Cleared;
        }
        return PressOutcome::Ignored;
    };

    if modifiers.alt {
        selection.replace(SelectionMode::Volume, [index]);
        return PressOutcome::Selected;
    }

    let preferred = if selection.is_empty() {
        default_mode
    } else {
        selection.mode()
    };

    if modifiers.ctrl || modifiers.shift {
        let group = selection_group(registry, index, preferred);
        if modifiers.ctrl && selection.contains(index) {
            selection.remove_all(group);
            return PressOutcome::Deselected;
        }
        if selection.is_empty() {
            selection.replace(group_mode(registry, index, preferred), group);
        } else {
            selection.insert_all(group);
        }
        return PressOutcome::Added;
    }

    if selection.contains(index) {
        return PressOutcome::DragCandidate;
    }

    let mode = group_mode(registry, index, default_mode);
    let group = selection_group(registry, index, mode);
    selection.replace(mode, group);
    PressOutcome::Selected
}

/// Rectangle released over `hits` (pickable registry indices).
pub fn on_rect_release<B>(
    registry: &Registry<B>,
    selection: &mut SelectionSet,
    hits: &BTreeSet<usize>,
    modifiers: Modifiers,
    default_mode: SelectionMode,
) -> RectOutcome {
    let Some(rect_mode) = RectMode::from_modifiers(modifiers) else {
        return RectOutcome::InvalidModifiers;
    };

    let hits: Vec<usize> = hits
        .iter()
        .copied()
        .filter(|&index| index < registry.len())
        .collect();
    let is_modifier =
        |index: usize| registry.get(index).is_some_and(|proxy| proxy.flags().is_modifier);

    let all_modifiers = !hits.is_empty() && hits.iter().all(|&index| is_modifier(index));
    let (mode, targets) = if all_modifiers {
        let instances: BTreeSet<_> = hits
            .iter()
            .filter_map(|&index| registry.get(index).and_then(|proxy| proxy.instance_key()))
            .collect();
        if instances.len() > 1 {
            log::debug!(
                "[plater_scene] rectangle hit modifiers of {} instances; discarded",
                instances.len()
            );
            return RectOutcome::Discarded;
        }
        (SelectionMode::Volume, hits)
    } else {
        let mode = if selection.is_empty() {
            default_mode
        } else {
            selection.mode()
        };
        let targets = hits
            .into_iter()
            .filter(|&index| !is_modifier(index))
            .flat_map(|index| selection_group(registry, index, mode))
            .collect();
        (mode, targets)
    };

    match rect_mode {
        RectMode::Select => {
            if selection.is_empty() {
                let before = selection.len();
                selection.replace(mode, targets);
                RectOutcome::Added(selection.len() - before)
            } else {
                RectOutcome::Added(selection.insert_all(targets))
            }
        }
        RectMode::Deselect => RectOutcome::Removed(selection.remove_all(targets)),
    }
}

/// Reset every proxy's hover flag; proxies in `hovered` become hovered. Runs
/// over the whole registry.
pub fn apply_hover<B>(registry: &mut Registry<B>, hovered: &BTreeSet<usize>) {
    for (index, proxy) in registry.proxies_mut().iter_mut().enumerate() {
        proxy.flags.hovered = hovered.contains(&index);
    }
}

/// Mirror the selection set into the per-proxy `selected` flags.
pub fn sync_selected_flags<B>(registry: &mut Registry<B>, selection: &SelectionSet) {
    for (index, proxy) in registry.proxies_mut().iter_mut().enumerate() {
        proxy.flags.selected = selection.contains(index);
    }
}

/// Number of selected proxies per object/instance pair; used for status text.
pub fn selected_instances<B>(
    registry: &Registry<B>,
    selection: &SelectionSet,
) -> BTreeMap<(usize, usize), usize> {
    let mut counts = BTreeMap::new();
    for &index in selection.indices() {
        if let Some(key) = registry.get(index).and_then(|proxy| proxy.instance_key()) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

/// Press/move/release bookkeeping for dragging an already selected entity.
#[derive(Debug, Clone, Default)]
pub struct DragTracker {
    threshold: f32,
    press_at: Option<[f32; 2]>,
    dragging: bool,
}

impl DragTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.max(0.0),
            press_at: None,
            dragging: false,
        }
    }

    pub fn arm(&mut self, at: [f32; 2]) {
        self.press_at = Some(at);
        self.dragging = false;
    }

    pub fn is_armed(&self) -> bool {
        self.press_at.is_some()
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Returns `true` on the move that crosses the threshold.
    pub fn moved(&mut self, to: [f32; 2]) -> bool {
        let Some(from) = self.press_at else {
            return false;
        };
        if self.dragging {
            return false;
        }
        let dx = to[0] - from[0];
        let dy = to[1] - from[1];
        if (dx * dx + dy * dy).sqrt() > self.threshold {
            self.dragging = true;
            return true;
        }
        false
    }

    /// Returns whether a drag was in progress.
    pub fn release(&mut self) -> bool {
        let was_dragging = self.dragging;
        self.press_at = None;
        self.dragging = false;
        was_dragging
    }
}
