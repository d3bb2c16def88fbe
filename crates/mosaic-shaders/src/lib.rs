//! mosaic-shaders: WGSL source for the mosaic batch pipeline.

/// Number of texture bindings declared by [`MOSAIC_WGSL`].
pub const MOSAIC_TEXTURE_UNITS: u32 = 16;

/// Binding index of the shared sampler in texture group 1.
pub const MOSAIC_SAMPLER_BINDING: u32 = MOSAIC_TEXTURE_UNITS;

/// Batched quads: pixel-space positions, atlas-pixel texture coordinates,
/// straight-alpha vertex color and a per-vertex texture unit (-1 = none).
///
/// Texture coordinates are normalized against the bound texture's real
/// size, so a physical texture larger than its atlas samples correctly.
pub const MOSAIC_WGSL: &str = r#"
struct ViewportUniform {
    scale: vec2<f32>,      // 2/W, -2/H
    translate: vec2<f32>,  // (-1, +1)
};

@group(0) @binding(0) var<uniform> vp: ViewportUniform;

@group(1) @binding(0) var t0: texture_2d<f32>;
@group(1) @binding(1) var t1: texture_2d<f32>;
@group(1) @binding(2) var t2: texture_2d<f32>;
@group(1) @binding(3) var t3: texture_2d<f32>;
@group(1) @binding(4) var t4: texture_2d<f32>;
@group(1) @binding(5) var t5: texture_2d<f32>;
@group(1) @binding(6) var t6: texture_2d<f32>;
@group(1) @binding(7) var t7: texture_2d<f32>;
@group(1) @binding(8) var t8: texture_2d<f32>;
@group(1) @binding(9) var t9: texture_2d<f32>;
@group(1) @binding(10) var t10: texture_2d<f32>;
@group(1) @binding(11) var t11: texture_2d<f32>;
@group(1) @binding(12) var t12: texture_2d<f32>;
@group(1) @binding(13) var t13: texture_2d<f32>;
@group(1) @binding(14) var t14: texture_2d<f32>;
@group(1) @binding(15) var t15: texture_2d<f32>;
@group(1) @binding(16) var samp: sampler;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) @interpolate(flat) unit: i32,
};

@vertex
fn vs_main(
    @location(0) in_pos: vec2<f32>,
    @location(1) in_uv: vec2<f32>,
    @location(2) in_color: vec4<f32>,
    @location(3) in_unit: i32,
) -> VsOut {
    var out: VsOut;
    let ndc = vec2<f32>(in_pos.x * vp.scale.x + vp.translate.x,
                        in_pos.y * vp.scale.y + vp.translate.y);
    out.pos = vec4<f32>(ndc, 0.0, 1.0);
    out.uv = in_uv;
    out.color = in_color;
    out.unit = in_unit;
    return out;
}

// textureSampleLevel: the unit varies per primitive, so sampling happens in
// non-uniform control flow.
fn sample_unit(unit: i32, uv: vec2<f32>) -> vec4<f32> {
    var texel = vec4<f32>(1.0, 1.0, 1.0, 1.0);
    switch unit {
        case 0: { texel = textureSampleLevel(t0, samp, uv / vec2<f32>(textureDimensions(t0)), 0.0); }
        case 1: { texel = textureSampleLevel(t1, samp, uv / vec2<f32>(textureDimensions(t1)), 0.0); }
        case 2: { texel = textureSampleLevel(t2, samp, uv / vec2<f32>(textureDimensions(t2)), 0.0); }
        case 3: { texel = textureSampleLevel(t3, samp, uv / vec2<f32>(textureDimensions(t3)), 0.0); }
        case 4: { texel = textureSampleLevel(t4, samp, uv / vec2<f32>(textureDimensions(t4)), 0.0); }
        case 5: { texel = textureSampleLevel(t5, samp, uv / vec2<f32>(textureDimensions(t5)), 0.0); }
        case 6: { texel = textureSampleLevel(t6, samp, uv / vec2<f32>(textureDimensions(t6)), 0.0); }
        case 7: { texel = textureSampleLevel(t7, samp, uv / vec2<f32>(textureDimensions(t7)), 0.0); }
        case 8: { texel = textureSampleLevel(t8, samp, uv / vec2<f32>(textureDimensions(t8)), 0.0); }
        case 9: { texel = textureSampleLevel(t9, samp, uv / vec2<f32>(textureDimensions(t9)), 0.0); }
        case 10: { texel = textureSampleLevel(t10, samp, uv / vec2<f32>(textureDimensions(t10)), 0.0); }
        case 11: { texel = textureSampleLevel(t11, samp, uv / vec2<f32>(textureDimensions(t11)), 0.0); }
        case 12: { texel = textureSampleLevel(t12, samp, uv / vec2<f32>(textureDimensions(t12)), 0.0); }
        case 13: { texel = textureSampleLevel(t13, samp, uv / vec2<f32>(textureDimensions(t13)), 0.0); }
        case 14: { texel = textureSampleLevel(t14, samp, uv / vec2<f32>(textureDimensions(t14)), 0.0); }
        case 15: { texel = textureSampleLevel(t15, samp, uv / vec2<f32>(textureDimensions(t15)), 0.0); }
        default: {}
    }
    return texel;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    if (inp.unit < 0) {
        return inp.color;
    }
    return inp.color * sample_unit(inp.unit, inp.uv);
}
"#;
