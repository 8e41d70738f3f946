use glam::Vec3;
use rayon::prelude::*;

use super::error::StageError;
use super::hull::{HullBuilder, HullMesh};
use super::image::FloatImage;

/// Backface/parallel rejection threshold of the ray-triangle test.
const DET_EPS: f32 = 1e-8;

/// Slack on the barycentric bounds so rays through shared edges and corners
/// still register on one of the adjacent triangles. Such a ray is accepted by
/// every triangle around the edge, and the first of them in mesh order wins.
const BARY_EPS: f32 = 1e-5;

/// Intersection distances at or below this count as zero.
const DISTANCE_EPS: f32 = 1e-6;

/// Output of palette extraction.
#[derive(Debug, Clone)]
pub struct PaletteFields {
    /// Hull surface color each pixel's ray leaves through, `[0, 255]`.
    pub palette: FloatImage,
    /// `1 - |1 - pixel_distance / intersect_distance|`, replicated to RGB.
    pub stroke_density: FloatImage,
    pub centroid: Vec3,
    pub triangle_count: usize,
    /// Pixels whose ray missed every triangle.
    pub fallback_count: usize,
}

/// Runs the full extraction: color hull, centroid, first-hit ray cast per
/// pixel, left/up miss propagation and stroke density.
pub fn extract(img: &FloatImage, builder: &impl HullBuilder) -> Result<PaletteFields, StageError> {
    if img.is_empty() {
        return Err(StageError::EmptyImage("palette"));
    }
    let (width, height) = img.dimensions();
    let points: Vec<Vec3> = img.rgb_iter().map(Vec3::from_array).collect();

    let mesh = builder.build(&points);
    let centroid = area_weighted_centroid(&mesh).unwrap_or_else(|| {
        tracing::warn!(
            triangles = mesh.triangle_count(),
            "palette: hull has no area, using mean color as centroid"
        );
        mean(&points)
    });
    let triangles = oriented_inward(&mesh, centroid);

    let hits: Vec<Option<Vec3>> = points
        .par_iter()
        .map(|&val| cast(centroid, val, &triangles))
        .collect();

    let mut palette = Vec::with_capacity(points.len());
    let mut fallback_count = 0;
    for (i, hit) in hits.into_iter().enumerate() {
        let color = match hit {
            Some(h) => h,
            None => {
                fallback_count += 1;
                let (x, y) = (i % width as usize, i / width as usize);
                if x > 0 {
                    palette[i - 1]
                } else if y > 0 {
                    palette[i - width as usize]
                } else {
                    tracing::debug!("palette: first pixel missed the hull, keeping its own color");
                    points[i]
                }
            }
        };
        palette.push(color);
    }

    let density: Vec<f32> = points
        .par_iter()
        .zip(palette.par_iter())
        .map(|(&val, &hit)| stroke_density(centroid, val, hit))
        .collect();

    if fallback_count > 0 {
        tracing::warn!(
            fallback_count,
            pixels = points.len(),
            "palette: rays missed the hull, copied neighbor palette"
        );
    }
    tracing::info!(
        width,
        height,
        triangles = mesh.triangle_count(),
        centroid = ?centroid,
        "palette extracted"
    );

    let palette_img = FloatImage::from_fn(width, height, |x, y| {
        let c = palette[(y * width + x) as usize];
        [c.x, c.y, c.z, 255.0]
    });
    let density_img = FloatImage::from_fn(width, height, |x, y| {
        let k = density[(y * width + x) as usize];
        [k, k, k, 1.0]
    });

    Ok(PaletteFields {
        palette: palette_img,
        stroke_density: density_img,
        centroid,
        triangle_count: mesh.triangle_count(),
        fallback_count,
    })
}

/// `Σ(area · triangle centroid) / Σ area`, or `None` for a mesh without area.
pub fn area_weighted_centroid(mesh: &HullMesh) -> Option<Vec3> {
    let mut weighted = Vec3::ZERO;
    let mut total = 0.0_f32;
    for [v1, v2, v3] in mesh.triangles() {
        let area = 0.5 * (v2 - v1).cross(v3 - v1).length();
        weighted += (v1 + v2 + v3) / 3.0 * area;
        total += area;
    }
    (total > f32::EPSILON).then(|| weighted / total)
}

fn mean(points: &[Vec3]) -> Vec3 {
    let sum = points.iter().fold(Vec3::ZERO, |acc, &p| acc + p);
    sum / points.len().max(1) as f32
}

/// Triangles wound so `(v1 - v0) x (v2 - v0)` faces `centroid`: a ray cast
/// outward from the centroid then passes the culling test on exit.
fn oriented_inward(mesh: &HullMesh, centroid: Vec3) -> Vec<[Vec3; 3]> {
    mesh.triangles()
        .map(|[v0, v1, v2]| {
            let normal = (v1 - v0).cross(v2 - v0);
            if normal.dot(centroid - v0) < 0.0 {
                [v0, v2, v1]
            } else {
                [v0, v1, v2]
            }
        })
        .collect()
}

/// Casts from `centroid` toward `val`; the first triangle hit in mesh order wins.
fn cast(centroid: Vec3, val: Vec3, triangles: &[[Vec3; 3]]) -> Option<Vec3> {
    let dir = (val - centroid).normalize_or_zero();
    triangles
        .iter()
        .find_map(|&[v0, v1, v2]| ray_triangle_intersect(centroid, dir, v0, v1, v2))
}

/// Culling Möller–Trumbore test. Returns the hit point, or `None` when the
/// triangle is back-facing, parallel or missed.
pub fn ray_triangle_intersect(orig: Vec3, dir: Vec3, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<Vec3> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let pvec = dir.cross(e2);
    let det = e1.dot(pvec);
    if det < DET_EPS {
        return None;
    }
    let inv_det = 1.0 / det;

    let tvec = orig - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(-BARY_EPS..=1.0 + BARY_EPS).contains(&u) {
        return None;
    }

    let qvec = tvec.cross(e1);
    let v = dir.dot(qvec) * inv_det;
    if v < -BARY_EPS || u + v > 1.0 + BARY_EPS {
        return None;
    }

    let t = e2.dot(qvec) * inv_det;
    Some(orig + dir * t)
}

fn stroke_density(centroid: Vec3, val: Vec3, hit: Vec3) -> f32 {
    let pixel_distance = (val - centroid).length();
    let intersect_distance = (hit - centroid).length();
    if intersect_distance <= DISTANCE_EPS {
        return 1.0;
    }
    1.0 - (1.0 - pixel_distance / intersect_distance).abs()
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{area_weighted_centroid, extract, ray_triangle_intersect};
    use crate::processing::error::StageError;
    use crate::processing::hull::{HullBuilder, HullMesh, QuickHull};
    use crate::processing::image::FloatImage;

    struct NoHull;

    impl HullBuilder for NoHull {
        fn build(&self, _points: &[Vec3]) -> HullMesh {
            HullMesh::default()
        }
    }

    /// Returns the given triangles in order, whatever the colors.
    struct FixedMesh(Vec<[Vec3; 3]>);

    impl HullBuilder for FixedMesh {
        fn build(&self, _points: &[Vec3]) -> HullMesh {
            HullMesh {
                vertices: self.0.iter().flatten().copied().collect(),
                indices: (0..self.0.len() as u32 * 3).collect(),
            }
        }
    }

    fn cap(z: f32) -> [Vec3; 3] {
        [
            Vec3::new(-1.0, -1.0, z),
            Vec3::new(-1.0, 4.0, z),
            Vec3::new(4.0, -1.0, z),
        ]
    }

    /// Large triangle far below the caps; pulls the centroid under them.
    fn floor() -> [Vec3; 3] {
        [
            Vec3::new(-10.0, -10.0, -30.0),
            Vec3::new(-10.0, 20.0, -30.0),
            Vec3::new(20.0, -10.0, -30.0),
        ]
    }

    fn four_color_image() -> FloatImage {
        let colors = [
            [0.0, 0.0, 0.0],
            [255.0, 0.0, 0.0],
            [0.0, 255.0, 0.0],
            [0.0, 0.0, 255.0],
        ];
        FloatImage::from_fn(2, 2, |x, y| {
            let c = colors[(y * 2 + x) as usize];
            [c[0], c[1], c[2], 255.0]
        })
    }

    fn noisy_image(width: u32, height: u32) -> FloatImage {
        FloatImage::from_fn(width, height, |x, y| {
            let h = (x * 73 + y * 151 + x * y * 17) % 256;
            [h as f32, ((h * 7) % 256) as f32, ((x * 31 + y * 5) % 256) as f32, 255.0]
        })
    }

    #[test]
    fn four_distinct_colors_hit_without_fallback() {
        let fields = extract(&four_color_image(), &QuickHull).unwrap();
        assert!(fields.triangle_count >= 4);
        assert_eq!(fields.fallback_count, 0);
        for y in 0..2 {
            for x in 0..2 {
                let k = fields.stroke_density.rgb(x, y)[0];
                // Every color is a hull vertex: the ray exits at the color itself.
                assert!((k - 1.0).abs() < 1e-3, "density {k} at ({x}, {y})");
            }
        }
    }

    #[test]
    fn extraction_is_idempotent() {
        let img = noisy_image(9, 7);
        let a = extract(&img, &QuickHull).unwrap();
        let b = extract(&img, &QuickHull).unwrap();
        assert_eq!(a.palette.as_raw(), b.palette.as_raw());
        assert_eq!(a.stroke_density.as_raw(), b.stroke_density.as_raw());
        assert_eq!(a.centroid, b.centroid);
        assert_eq!(a.fallback_count, b.fallback_count);
    }

    #[test]
    fn monochrome_image_falls_back_to_full_density() {
        let img = FloatImage::from_pixel(3, 3, [40.0, 80.0, 120.0, 255.0]);
        let fields = extract(&img, &QuickHull).unwrap();
        assert_eq!(fields.triangle_count, 0);
        assert_eq!(fields.fallback_count, 9);
        assert_eq!(fields.centroid, Vec3::new(40.0, 80.0, 120.0));
        for k in fields.stroke_density.as_raw() {
            assert!(k.is_finite());
        }
        for y in 0..3 {
            for x in 0..3 {
                assert_eq!(fields.stroke_density.rgb(x, y), [1.0; 3]);
                assert_eq!(fields.palette.rgb(x, y), [40.0, 80.0, 120.0]);
            }
        }
    }

    #[test]
    fn misses_copy_the_first_pixel_when_nothing_hits() {
        let img = noisy_image(4, 3);
        let fields = extract(&img, &NoHull).unwrap();
        assert_eq!(fields.fallback_count, 12);
        let first = img.rgb(0, 0);
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(fields.palette.rgb(x, y), first);
            }
        }
    }

    #[test]
    fn misses_take_left_neighbor_before_the_one_above() {
        // Top row hits the cap at two different points, bottom row points
        // sideways and misses everything.
        let mut img = FloatImage::new(2, 2);
        img.set_rgb(0, 0, [0.0, 0.0, 10.0]);
        img.set_rgb(1, 0, [2.0, 0.0, 10.0]);
        img.set_rgb(0, 1, [-50.0, 0.0, -28.0]);
        img.set_rgb(1, 1, [-50.0, 1.0, -28.0]);
        let fields = extract(&img, &FixedMesh(vec![cap(10.0), floor()])).unwrap();

        assert_eq!(fields.fallback_count, 2);
        let top_left = fields.palette.rgb(0, 0);
        let top_right = fields.palette.rgb(1, 0);
        assert!((top_right[0] - 2.0).abs() < 1e-3, "top_right={top_right:?}");
        assert_ne!(top_left, top_right);
        // x == 0: only the pixel above is available.
        assert_eq!(fields.palette.rgb(0, 1), top_left);
        // x > 0: the left neighbor wins over the one above.
        assert_eq!(fields.palette.rgb(1, 1), fields.palette.rgb(0, 1));
        assert_ne!(fields.palette.rgb(1, 1), top_right);
    }

    #[test]
    fn interior_colors_have_lower_density_than_vertices() {
        let mut img = FloatImage::from_fn(3, 2, |_, _| [0.0, 0.0, 0.0, 255.0]);
        img.set_rgb(1, 0, [255.0, 0.0, 0.0]);
        img.set_rgb(2, 0, [0.0, 255.0, 0.0]);
        img.set_rgb(0, 1, [0.0, 0.0, 255.0]);
        img.set_rgb(1, 1, [255.0, 255.0, 255.0]);
        img.set_rgb(2, 1, [110.0, 100.0, 105.0]);
        let fields = extract(&img, &QuickHull).unwrap();
        assert_eq!(fields.fallback_count, 0);
        let inner = fields.stroke_density.rgb(2, 1)[0];
        let corner = fields.stroke_density.rgb(1, 0)[0];
        assert!(inner < corner, "inner={inner} corner={corner}");
        assert!((0.0..=1.0).contains(&inner));
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = extract(&FloatImage::default(), &QuickHull).unwrap_err();
        assert_eq!(err, StageError::EmptyImage("palette"));
    }

    #[test]
    fn first_hit_in_mesh_order_wins_over_nearest() {
        // Both caps sit above the centroid and cross the ray; only order decides.
        let img = FloatImage::from_pixel(1, 1, [0.5, 0.5, 7.0, 255.0]);

        let far_first = extract(&img, &FixedMesh(vec![cap(10.0), cap(5.0), floor()])).unwrap();
        assert_eq!(far_first.fallback_count, 0);
        let hit = far_first.palette.rgb(0, 0);
        assert!((hit[2] - 10.0).abs() < 1e-3, "hit={hit:?}");

        let near_first = extract(&img, &FixedMesh(vec![cap(5.0), cap(10.0), floor()])).unwrap();
        let hit = near_first.palette.rgb(0, 0);
        assert!((hit[2] - 5.0).abs() < 1e-3, "hit={hit:?}");
    }

    #[test]
    fn rays_along_a_shared_edge_hit_both_neighbors() {
        // Two triangles sharing the edge x == 0 at z = 5, both facing the origin.
        let a = [Vec3::new(0.0, -2.0, 5.0), Vec3::new(-2.0, 0.0, 5.0), Vec3::new(0.0, 2.0, 5.0)];
        let b = [Vec3::new(0.0, 2.0, 5.0), Vec3::new(2.0, 0.0, 5.0), Vec3::new(0.0, -2.0, 5.0)];
        let hit_a = ray_triangle_intersect(Vec3::ZERO, Vec3::Z, a[0], a[1], a[2]);
        let hit_b = ray_triangle_intersect(Vec3::ZERO, Vec3::Z, b[0], b[1], b[2]);
        assert_eq!(hit_a, Some(Vec3::new(0.0, 0.0, 5.0)));
        assert_eq!(hit_b, Some(Vec3::new(0.0, 0.0, 5.0)));
    }

    #[test]
    fn back_facing_triangles_are_culled() {
        let tri = [
            Vec3::new(-1.0, -1.0, 5.0),
            Vec3::new(-1.0, 4.0, 5.0),
            Vec3::new(4.0, -1.0, 5.0),
        ];
        assert!(ray_triangle_intersect(Vec3::ZERO, Vec3::Z, tri[0], tri[1], tri[2]).is_some());
        assert!(ray_triangle_intersect(Vec3::ZERO, Vec3::Z, tri[0], tri[2], tri[1]).is_none());
        // Parallel ray.
        assert!(ray_triangle_intersect(Vec3::ZERO, Vec3::X, tri[0], tri[1], tri[2]).is_none());
    }

    #[test]
    fn centroid_of_empty_mesh_is_none() {
        assert_eq!(area_weighted_centroid(&HullMesh::default()), None);
    }
}
