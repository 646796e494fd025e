//! GPU-side mirror of an editable print-plate model.
//!
//! The [`Registry`] holds one [`RenderableProxy`] per visible volume instance,
//! background-step artifact and per-plate wipe tower. [`reconcile`] keeps it
//! in step with a [`ModelSnapshot`] while reusing buffers whose content did
//! not change. Picking renders proxies flat-colored with checksummed ids and
//! feeds the hits into the hover/selection state machine; [`SceneMirror`]
//! bundles all of it for a UI frame loop.

pub mod config;
pub mod identity;
pub mod mirror;
pub mod model;
pub mod picking;
pub mod proxy;
pub mod reconcile;
pub mod registry;
pub mod selection;

pub use config::{ConfigError, MirrorConfig};
pub use identity::{GeometryIdentity, IdentitySource, ObjectId};
pub use mirror::SceneMirror;
pub use model::{
    CompletedStep, ModelInstance, ModelObject, ModelSnapshot, ModelVolume, PlateSnapshot,
    StepKind, TriangleMesh, VolumeKind, WipeTowerFootprint,
};
pub use picking::{
    HandleId, PickDraw, PickHandle, PickHit, PickRegion, PickSurface, PickSurfaceError, PickTable,
    PixelBlock,
};
pub use proxy::{CompositePosition, HoverState, ProxyFlags, ProxyKind, RenderableProxy};
pub use reconcile::{ReconcileOptions, ReconcileOutcome, reconcile};
pub use registry::{Diagnostic, IndexRemap, MeshUploader, Registry, UploadError, UploadRequest};
pub use selection::{Modifiers, PressOutcome, RectOutcome, SelectionMode, SelectionSet};
