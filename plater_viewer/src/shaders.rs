use bytemuck::{Pod, Zeroable};

pub const PICK_SHADER_SOURCE: &str = r#"
struct PickUniforms {
    model_view_projection: mat4x4<f32>,
    color: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> pick: PickUniforms;

@vertex
fn pick_vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return pick.model_view_projection * vec4<f32>(position, 1.0);
}

@fragment
fn pick_fs_main() -> @location(0) vec4<f32> {
    return pick.color;
}
"#;

/// Per-draw uniform block; one slot per draw in a dynamic-offset buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct PickUniforms {
    pub model_view_projection: [[f32; 4]; 4],
    pub color: [f32; 4],
}
