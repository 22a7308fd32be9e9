//! WGSL sources for the pipeline variants.

/// Constant block bound at group 0 by every pipeline. Mirrors
/// [`ViewConstants`](crate::backend::ViewConstants).
const CONSTANTS: &str = r#"
struct ViewConstants {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_view_projection: mat4x4<f32>,
    eye: vec4<f32>,
    viewport_size: vec4<f32>,
    // exposure, white balance gain, velocity precision, shading rate tile size
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> constants: ViewConstants;

struct FullscreenOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) ndc: vec2<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> FullscreenOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    let ndc = uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0);
    var out: FullscreenOutput;
    out.clip = vec4<f32>(ndc, 0.0, 1.0);
    out.ndc = ndc;
    return out;
}
"#;

const SCENE: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

struct InstanceInput {
    @location(2) world_0: vec4<f32>,
    @location(3) world_1: vec4<f32>,
    @location(4) world_2: vec4<f32>,
    @location(5) world_3: vec4<f32>,
    @location(6) next_0: vec4<f32>,
    @location(7) next_1: vec4<f32>,
    @location(8) next_2: vec4<f32>,
    @location(9) next_3: vec4<f32>,
};

struct SceneOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) current: vec4<f32>,
    @location(2) next: vec4<f32>,
};

@vertex
fn vs_scene(vertex: VertexInput, instance: InstanceInput) -> SceneOutput {
    let world = mat4x4<f32>(instance.world_0, instance.world_1, instance.world_2, instance.world_3);
    let next_world = mat4x4<f32>(instance.next_0, instance.next_1, instance.next_2, instance.next_3);
    let view_projection = constants.projection * constants.view;

    var out: SceneOutput;
    out.current = view_projection * world * vec4<f32>(vertex.position, 1.0);
    out.next = view_projection * next_world * vec4<f32>(vertex.position, 1.0);
    out.clip = out.current;
    out.normal = normalize((world * vec4<f32>(vertex.normal, 0.0)).xyz);
    return out;
}

fn shade(normal: vec3<f32>) -> vec4<f32> {
    let light = normalize(vec3<f32>(0.3, 1.0, 0.5));
    let diffuse = max(dot(normalize(normal), light), 0.0) * 0.8 + 0.2;
    let white_balance = vec3<f32>(constants.params.y, 1.0, 2.0 - constants.params.y);
    let color = vec3<f32>(0.9, 0.55, 0.3) * diffuse * constants.params.x * white_balance;
    return vec4<f32>(color, 1.0);
}

@fragment
fn fs_scene(in: SceneOutput) -> @location(0) vec4<f32> {
    return shade(in.normal);
}

struct VelocityOutput {
    @location(0) color: vec4<f32>,
    @location(1) velocity: vec4<u32>,
};

// Screen-space motion in pixels times the precision, 16-bit two's complement per axis.
@fragment
fn fs_scene_velocity(in: SceneOutput) -> VelocityOutput {
    let current = in.current.xy / in.current.w;
    let next = in.next.xy / in.next.w;
    let pixels = (next - current) * 0.5 * constants.viewport_size.xy * vec2<f32>(1.0, -1.0);
    let encoded = vec2<i32>(round(clamp(pixels * constants.params.z, vec2<f32>(-32768.0), vec2<f32>(32767.0))));
    let bits = bitcast<vec2<u32>>(encoded) & vec2<u32>(0xFFFFu);

    var out: VelocityOutput;
    out.color = shade(in.normal);
    out.velocity = vec4<u32>(bits.x & 0xFFu, bits.x >> 8u, bits.y & 0xFFu, bits.y >> 8u);
    return out;
}
"#;

const GRID: &str = r#"
fn grid_line(ndc: vec2<f32>) -> f32 {
    let point = constants.inverse_view_projection * vec4<f32>(ndc, 0.5, 1.0);
    let origin = constants.eye.xyz;
    let direction = point.xyz / point.w - origin;
    let t = select(-1.0, -origin.y / direction.y, abs(direction.y) > 1e-6);
    let hit = origin + direction * max(t, 0.0);
    let width = max(fwidth(hit.xz), vec2<f32>(1e-4));
    let cell = abs(fract(hit.xz - 0.5) - 0.5) / width;
    let line = 1.0 - min(min(cell.x, cell.y), 1.0);
    return select(0.0, line, t > 0.0);
}

@fragment
fn fs_grid(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let sky = mix(vec3<f32>(0.25, 0.45, 0.40), vec3<f32>(0.1, 0.15, 0.2), in.ndc.y * 0.5 + 0.5);
    let color = mix(sky, vec3<f32>(0.8), grid_line(in.ndc));
    return vec4<f32>(color * constants.params.x, 1.0);
}

@fragment
fn fs_grid_blended(in: FullscreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(vec3<f32>(0.8) * constants.params.x, grid_line(in.ndc));
}
"#;

const OCCLUSION: &str = r#"
@vertex
fn vs_occlusion(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_occlusion() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
"#;

const VRS_VISUALIZE: &str = r#"
@group(1) @binding(0) var rate_image: texture_2d<u32>;

@fragment
fn fs_vrs(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let tile = vec2<i32>(in.clip.xy / max(constants.params.w, 1.0));
    let rate = textureLoad(rate_image, tile, 0).r;
    var palette = array<vec3<f32>, 12>(
        vec3<f32>(1.0, 1.0, 1.0), vec3<f32>(0.9, 0.9, 1.0), vec3<f32>(0.8, 0.8, 1.0),
        vec3<f32>(0.7, 0.7, 1.0), vec3<f32>(0.0, 1.0, 0.0), vec3<f32>(0.5, 1.0, 0.0),
        vec3<f32>(0.5, 1.0, 0.0), vec3<f32>(1.0, 1.0, 0.0), vec3<f32>(1.0, 0.5, 0.0),
        vec3<f32>(1.0, 0.5, 0.0), vec3<f32>(1.0, 0.0, 0.0), vec3<f32>(0.0, 0.0, 0.0),
    );
    return vec4<f32>(palette[min(rate, 11u)], 0.35);
}
"#;

/// Source for the mirror window blit, independent of the view constants.
pub const MIRROR_BLIT: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

struct BlitOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_blit(@builtin(vertex_index) index: u32) -> BlitOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: BlitOutput;
    out.clip = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_blit(in: BlitOutput) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}
"#;

/// Complete module holding every entry point used by the frame pipelines.
pub fn frame_module() -> String {
    [CONSTANTS, SCENE, GRID, OCCLUSION].concat()
}

/// Module for the shading-rate visualization, which needs an extra binding.
pub fn vrs_module() -> String {
    [CONSTANTS, VRS_VISUALIZE].concat()
}
