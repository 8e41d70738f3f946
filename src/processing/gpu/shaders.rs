// WGSL sources of the compute stages. Image dimensions travel as f32 in the
// uniform blocks and are rounded back with `+ 0.5`.

// Horizontal pass of the separable Gaussian. Weights come from a storage
// buffer of length 2 * radius + 1.
pub const BLUR_H_SHADER_SRC: &str = r#"
struct BlurParams {
    width: f32,
    height: f32,
    radius: f32,
    _pad: f32,
};

@group(0) @binding(0)
var src_tex: texture_2d<f32>;
@group(0) @binding(1)
var dst_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(2)
var<uniform> params: BlurParams;
@group(0) @binding(3)
var<storage, read> weights: array<f32>;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = i32(params.width + 0.5);
    let h = i32(params.height + 0.5);
    let r = i32(params.radius + 0.5);
    if (i32(gid.x) >= w || i32(gid.y) >= h) {
        return;
    }
    let x = i32(gid.x);
    let y = i32(gid.y);
    var acc = vec3<f32>(0.0);
    for (var k = 0; k <= 2 * r; k++) {
        let sx = clamp(x + k - r, 0, w - 1);
        acc += textureLoad(src_tex, vec2<i32>(sx, y), 0).rgb * weights[k];
    }
    let center = textureLoad(src_tex, vec2<i32>(x, y), 0);
    textureStore(dst_tex, vec2<i32>(x, y), vec4<f32>(acc, center.a));
}
"#;

pub const BLUR_V_SHADER_SRC: &str = r#"
struct BlurParams {
    width: f32,
    height: f32,
    radius: f32,
    _pad: f32,
};

@group(0) @binding(0)
var src_tex: texture_2d<f32>;
@group(0) @binding(1)
var dst_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(2)
var<uniform> params: BlurParams;
@group(0) @binding(3)
var<storage, read> weights: array<f32>;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = i32(params.width + 0.5);
    let h = i32(params.height + 0.5);
    let r = i32(params.radius + 0.5);
    if (i32(gid.x) >= w || i32(gid.y) >= h) {
        return;
    }
    let x = i32(gid.x);
    let y = i32(gid.y);
    var acc = vec3<f32>(0.0);
    for (var k = 0; k <= 2 * r; k++) {
        let sy = clamp(y + k - r, 0, h - 1);
        acc += textureLoad(src_tex, vec2<i32>(x, sy), 0).rgb * weights[k];
    }
    let center = textureLoad(src_tex, vec2<i32>(x, y), 0);
    textureStore(dst_tex, vec2<i32>(x, y), vec4<f32>(acc, center.a));
}
"#;

// Reducer phase 1: one workgroup per (tile, row) folds up to 256 texels in
// shared memory. Partial (tx, y) lands at index y * STRIDE + tx.
pub const REDUCE_ROWS_SHADER_SRC: &str = r#"
const TILE: u32 = 256u;
const STRIDE: u32 = 32u;
const BIG: f32 = 3.4e38;

struct ReduceParams {
    width: f32,
    height: f32,
    groups_x: f32,
    groups_y: f32,
};

@group(0) @binding(0)
var src_tex: texture_2d<f32>;
@group(0) @binding(1)
var<storage, read_write> row_min: array<vec4<f32>>;
@group(0) @binding(2)
var<storage, read_write> row_max: array<vec4<f32>>;
@group(0) @binding(3)
var<uniform> params: ReduceParams;

var<workgroup> lo: array<vec4<f32>, 256>;
var<workgroup> hi: array<vec4<f32>, 256>;

@compute @workgroup_size(256, 1, 1)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let w = u32(params.width + 0.5);
    let x = wid.x * TILE + lid.x;
    let y = wid.y;
    var a = vec4<f32>(BIG);
    var b = vec4<f32>(-BIG);
    if (x < w) {
        let v = textureLoad(src_tex, vec2<i32>(i32(x), i32(y)), 0);
        a = v;
        b = v;
    }
    lo[lid.x] = a;
    hi[lid.x] = b;
    workgroupBarrier();

    for (var span = TILE / 2u; span > 0u; span = span / 2u) {
        if (lid.x < span) {
            lo[lid.x] = min(lo[lid.x], lo[lid.x + span]);
            hi[lid.x] = max(hi[lid.x], hi[lid.x + span]);
        }
        workgroupBarrier();
    }

    if (lid.x == 0u) {
        row_min[y * STRIDE + wid.x] = lo[0];
        row_max[y * STRIDE + wid.x] = hi[0];
    }
}
"#;

// Reducer phase 2: one workgroup per (tile column, tile row) folds up to 256
// phase-1 partials of the same column.
pub const REDUCE_COLS_SHADER_SRC: &str = r#"
const TILE: u32 = 256u;
const STRIDE: u32 = 32u;
const BIG: f32 = 3.4e38;

struct ReduceParams {
    width: f32,
    height: f32,
    groups_x: f32,
    groups_y: f32,
};

@group(0) @binding(0)
var<storage, read> row_min: array<vec4<f32>>;
@group(0) @binding(1)
var<storage, read> row_max: array<vec4<f32>>;
@group(0) @binding(2)
var<storage, read_write> tile_min: array<vec4<f32>>;
@group(0) @binding(3)
var<storage, read_write> tile_max: array<vec4<f32>>;
@group(0) @binding(4)
var<uniform> params: ReduceParams;

var<workgroup> lo: array<vec4<f32>, 256>;
var<workgroup> hi: array<vec4<f32>, 256>;

@compute @workgroup_size(256, 1, 1)
fn main(
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let h = u32(params.height + 0.5);
    let tx = wid.x;
    let y = wid.y * TILE + lid.x;
    var a = vec4<f32>(BIG);
    var b = vec4<f32>(-BIG);
    if (y < h) {
        a = row_min[y * STRIDE + tx];
        b = row_max[y * STRIDE + tx];
    }
    lo[lid.x] = a;
    hi[lid.x] = b;
    workgroupBarrier();

    for (var span = TILE / 2u; span > 0u; span = span / 2u) {
        if (lid.x < span) {
            lo[lid.x] = min(lo[lid.x], lo[lid.x + span]);
            hi[lid.x] = max(hi[lid.x], hi[lid.x + span]);
        }
        workgroupBarrier();
    }

    if (lid.x == 0u) {
        tile_min[wid.y * STRIDE + tx] = lo[0];
        tile_max[wid.y * STRIDE + tx] = hi[0];
    }
}
"#;

// 3x3 Sobel per channel with clamped borders; writes gx, gy and magnitude.
pub const SOBEL_SHADER_SRC: &str = r#"
struct Dims {
    width: f32,
    height: f32,
    _pad0: f32,
    _pad1: f32,
};

@group(0) @binding(0)
var src_tex: texture_2d<f32>;
@group(0) @binding(1)
var gx_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(2)
var gy_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(3)
var mag_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(4)
var<uniform> dims: Dims;

fn at(x: i32, y: i32, w: i32, h: i32) -> vec3<f32> {
    return textureLoad(src_tex, vec2<i32>(clamp(x, 0, w - 1), clamp(y, 0, h - 1)), 0).rgb;
}

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = i32(dims.width + 0.5);
    let h = i32(dims.height + 0.5);
    if (i32(gid.x) >= w || i32(gid.y) >= h) {
        return;
    }
    let x = i32(gid.x);
    let y = i32(gid.y);
    let gx = (at(x + 1, y - 1, w, h) + 2.0 * at(x + 1, y, w, h) + at(x + 1, y + 1, w, h))
           - (at(x - 1, y - 1, w, h) + 2.0 * at(x - 1, y, w, h) + at(x - 1, y + 1, w, h));
    let gy = (at(x - 1, y + 1, w, h) + 2.0 * at(x, y + 1, w, h) + at(x + 1, y + 1, w, h))
           - (at(x - 1, y - 1, w, h) + 2.0 * at(x, y - 1, w, h) + at(x + 1, y - 1, w, h));
    let alpha = textureLoad(src_tex, vec2<i32>(x, y), 0).a;
    let coord = vec2<i32>(x, y);
    textureStore(gx_tex, coord, vec4<f32>(gx, alpha));
    textureStore(gy_tex, coord, vec4<f32>(gy, alpha));
    textureStore(mag_tex, coord, vec4<f32>(sqrt(gx * gx + gy * gy), alpha));
}
"#;

// Point-light diffuse shading over normalized gradients, relief scaled by
// stroke density. Channels are shaded independently.
pub const SHADE_SHADER_SRC: &str = r#"
struct ShadeParams {
    light: vec4<f32>,
    width: f32,
    height: f32,
    pixel_scale: f32,
    gamma_correction: f32,
};

@group(0) @binding(0)
var gx_tex: texture_2d<f32>;
@group(0) @binding(1)
var gy_tex: texture_2d<f32>;
@group(0) @binding(2)
var density_tex: texture_2d<f32>;
@group(0) @binding(3)
var dst_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(4)
var<uniform> params: ShadeParams;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = i32(params.width + 0.5);
    let h = i32(params.height + 0.5);
    if (i32(gid.x) >= w || i32(gid.y) >= h) {
        return;
    }
    let coord = vec2<i32>(i32(gid.x), i32(gid.y));
    let gx = textureLoad(gx_tex, coord, 0).rgb;
    let gy = textureLoad(gy_tex, coord, 0).rgb;
    let density = textureLoad(density_tex, coord, 0).rgb;

    let d = params.light.xyz - vec3<f32>(f32(gid.x), f32(gid.y), 0.0);
    let len = length(d);
    let l = select(vec3<f32>(0.0), d / len, len > 0.0);

    let relief = params.pixel_scale * density;
    let nx = -gx * relief;
    let ny = -gy * relief;
    let n_len = sqrt(nx * nx + ny * ny + vec3<f32>(1.0));
    let k = max((nx * l.x + ny * l.y + vec3<f32>(l.z)) / n_len, vec3<f32>(0.0));
    let lit = pow(max(k, vec3<f32>(1e-6)), vec3<f32>(params.gamma_correction));
    textureStore(dst_tex, coord, vec4<f32>(clamp(lit, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0));
}
"#;

// out.rgb = in.rgb * mul.rgb + add.rgb; backs both scale and offset.
pub const AFFINE_SHADER_SRC: &str = r#"
struct AffineParams {
    mul: vec4<f32>,
    add: vec4<f32>,
    width: f32,
    height: f32,
    _pad0: f32,
    _pad1: f32,
};

@group(0) @binding(0)
var src_tex: texture_2d<f32>;
@group(0) @binding(1)
var dst_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(2)
var<uniform> params: AffineParams;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = i32(params.width + 0.5);
    let h = i32(params.height + 0.5);
    if (i32(gid.x) >= w || i32(gid.y) >= h) {
        return;
    }
    let coord = vec2<i32>(i32(gid.x), i32(gid.y));
    let v = textureLoad(src_tex, coord, 0);
    textureStore(dst_tex, coord, vec4<f32>(v.rgb * params.mul.rgb + params.add.rgb, v.a));
}
"#;

pub const MULTIPLY_SHADER_SRC: &str = r#"
struct Dims {
    width: f32,
    height: f32,
    _pad0: f32,
    _pad1: f32,
};

@group(0) @binding(0)
var a_tex: texture_2d<f32>;
@group(0) @binding(1)
var b_tex: texture_2d<f32>;
@group(0) @binding(2)
var dst_tex: texture_storage_2d<rgba32float, write>;
@group(0) @binding(3)
var<uniform> dims: Dims;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let w = i32(dims.width + 0.5);
    let h = i32(dims.height + 0.5);
    if (i32(gid.x) >= w || i32(gid.y) >= h) {
        return;
    }
    let coord = vec2<i32>(i32(gid.x), i32(gid.y));
    let a = textureLoad(a_tex, coord, 0);
    let b = textureLoad(b_tex, coord, 0);
    textureStore(dst_tex, coord, vec4<f32>(a.rgb * b.rgb, a.a));
}
"#;
