mod cli;
mod gpu;
mod pick_pass;
mod primitives;
mod scene_file;
mod shaders;

use std::{fs::File, path::Path};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use image::{ColorType, ImageEncoder, codecs::png::PngEncoder};
use plater_scene::{
    Diagnostic, MirrorConfig, PickHit, PickSurface, ProxyKind, ReconcileOutcome, SceneMirror,
};

use crate::cli::Args;
use crate::gpu::{GpuContext, GpuMesh, WgpuUploader};
use crate::pick_pass::WgpuPickSurface;
use crate::scene_file::load_scene;

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::init();

    let config = match args.config.as_deref() {
        Some(path) => MirrorConfig::from_json_file(path)
            .with_context(|| format!("loading mirror config {}", path.display()))?,
        None => MirrorConfig::default(),
    };

    let gpu = GpuContext::new().context("initializing wgpu")?;
    println!(
        "[plater_viewer] adapter {} ({:?})",
        gpu.adapter_info.name, gpu.adapter_info.backend
    );
    let mut uploader = WgpuUploader::new(&gpu, args.buffer_budget);
    let mut surface = WgpuPickSurface::new(&gpu, args.width, args.height)
        .context("creating pick target")?;
    let mut mirror: SceneMirror<GpuMesh> = SceneMirror::new(config);

    let scene = load_scene(&args.scene, mirror.identity_source_mut())?;
    let outcome = mirror.reconcile(
        &scene.model,
        &scene.steps,
        &mut uploader,
        args.reconcile_options(false),
    );
    report_pass(&args.scene, &outcome);

    let mut camera = scene.camera;
    if let Some(next) = args.next_scene.as_deref() {
        let next_scene = load_scene(next, mirror.identity_source_mut())?;
        let outcome = mirror.reconcile(
            &next_scene.model,
            &next_scene.steps,
            &mut uploader,
            args.reconcile_options(true),
        );
        report_pass(next, &outcome);
        camera = next_scene.camera;
    } else if args.full_refresh {
        let outcome = mirror.reconcile(
            &scene.model,
            &scene.steps,
            &mut uploader,
            args.reconcile_options(true),
        );
        report_pass(&args.scene, &outcome);
    }
    println!(
        "[plater_viewer] {} proxies, {} bytes of mesh buffers live",
        mirror.registry().len(),
        uploader.live_bytes()
    );

    let view_projection = camera.view_projection(args.width as f32 / args.height as f32);
    let modifiers = args.modifiers();

    if let Some([x, y]) = args.point {
        let hit = mirror.begin_point_pick(&mut surface, view_projection, x, y);
        println!("[plater_viewer] point {x},{y}: {}", describe_hit(&mirror, hit));
        let press = mirror.press(modifiers);
        mirror.release();
        println!("[plater_viewer] press {modifiers:?}: {press:?}");
    }

    if let Some([x0, y0, x1, y1]) = args.rect {
        let hits = mirror.begin_rect_pick(&mut surface, view_projection, x0, y0, x1, y1);
        println!(
            "[plater_viewer] rect {x0},{y0} -> {x1},{y1}: {} entities",
            hits.len()
        );
        for hit in &hits {
            println!("  {}", describe_hit(&mirror, Some(*hit)));
        }
        let outcome = mirror.rect_release(modifiers);
        println!("[plater_viewer] rect release {modifiers:?}: {outcome:?}");
    }

    print_registry(&mirror);

    if let Some(path) = args.dump_pick.as_deref() {
        let region = surface.full_region();
        let draws = mirror.pick_draws();
        let block = surface
            .render_pick_pass(&draws, view_projection, region)
            .context("rendering pick target for --dump-pick")?;
        export_rgba_to_png(region.width, region.height, &block.rgba, path)
            .with_context(|| format!("writing PNG to {}", path.display()))?;
        println!("[plater_viewer] pick target exported to {}", path.display());
    }

    for diagnostic in mirror.take_diagnostics() {
        match diagnostic {
            Diagnostic::BufferExhausted { identity, error } => {
                println!("[plater_viewer] warning: {identity} not renderable: {error}")
            }
            Diagnostic::StaleReference { identity, reason } => {
                println!("[plater_viewer] warning: skipped {identity}: {reason}")
            }
            Diagnostic::PickFailed(reason) => {
                println!("[plater_viewer] warning: pick failed: {reason}")
            }
        }
    }

    Ok(())
}

fn report_pass(source: &Path, outcome: &ReconcileOutcome) {
    println!(
        "[plater_viewer] reconciled {}: {} retained, {} created, {} released, {} reloaded, {} stale",
        source.display(),
        outcome.retained,
        outcome.created,
        outcome.released,
        outcome.reloaded,
        outcome.stale_references
    );
}

fn describe_hit(mirror: &SceneMirror<GpuMesh>, hit: Option<PickHit>) -> String {
    match hit {
        None => "nothing".to_string(),
        Some(PickHit::Proxy(index)) => match mirror.registry().get(index) {
            Some(proxy) => format!("proxy {index} {}", proxy.identity()),
            None => format!("proxy {index}"),
        },
        Some(PickHit::PlateHandle { plate, slot }) => format!("plate {plate} handle {slot}"),
        Some(PickHit::Gizmo(slot)) => format!("gizmo handle {slot}"),
    }
}

fn print_registry(mirror: &SceneMirror<GpuMesh>) {
    let selection = mirror.current_selection();
    println!(
        "[plater_viewer] selection ({:?}): {:?}",
        selection.mode(),
        selection.indices()
    );
    for (index, proxy) in mirror.registry().iter().enumerate() {
        let kind = match proxy.kind() {
            ProxyKind::Volume { kind } => format!("{kind:?}"),
            ProxyKind::StepArtifact { step } => format!("{step:?}"),
            ProxyKind::Auxiliary { plate, .. } => format!("wipe tower (plate {plate})"),
        };
        let flags = proxy.flags();
        println!(
            "  [{index:>3}] {:<12} {:<24} v{} {:?}{}{}",
            proxy.identity().to_string(),
            kind,
            proxy.content_version(),
            proxy.hover_state(),
            if flags.renderable { "" } else { " non-renderable" },
            if flags.printable { "" } else { " non-printable" },
        );
    }
}

fn export_rgba_to_png(width: u32, height: u32, data: &[u8], destination: &Path) -> Result<()> {
    let expected_len = width as usize * height as usize * 4;
    ensure!(
        data.len() == expected_len,
        "RGBA buffer size {} does not match dimensions {}x{}",
        data.len(),
        width,
        height
    );

    let file = File::create(destination)?;
    let encoder = PngEncoder::new(file);
    encoder.write_image(data, width, height, ColorType::Rgba8.into())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_rejects_mismatched_buffer() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("pick.png");
        assert!(export_rgba_to_png(2, 2, &[0u8; 12], &path).is_err());
        export_rgba_to_png(2, 2, &[7u8; 16], &path).expect("export");
        assert!(path.exists());
    }
}
