use std::collections::HashSet;

use glam::{DVec3, Vec3};

/// Triangle mesh of a convex hull. Every three consecutive `indices` form one
/// triangle over `vertices`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HullMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl HullMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Corner positions of every triangle, in index order.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| {
            [
                self.vertices[t[0] as usize],
                self.vertices[t[1] as usize],
                self.vertices[t[2] as usize],
            ]
        })
    }
}

/// Builds the convex hull of a 3-D point cloud.
///
/// Degenerate clouds (fewer than four distinct points, or all points on one
/// plane) produce an empty mesh rather than an error.
pub trait HullBuilder {
    fn build(&self, points: &[Vec3]) -> HullMesh;
}

/// Incremental quickhull in double precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickHull;

struct Face {
    v: [usize; 3],
    normal: DVec3,
    offset: f64,
    outside: Vec<usize>,
    alive: bool,
}

impl Face {
    fn distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) - self.offset
    }
}

impl HullBuilder for QuickHull {
    fn build(&self, points: &[Vec3]) -> HullMesh {
        let pts = distinct_points(points);
        if pts.len() < 4 {
            tracing::warn!(points = pts.len(), "hull: fewer than four distinct points");
            return HullMesh::default();
        }

        let extent = pts
            .iter()
            .fold(1.0_f64, |acc, p| acc.max(p.abs().max_element()));
        let eps = extent * 1e-9;

        let Some(simplex) = initial_simplex(&pts, eps) else {
            tracing::warn!(points = pts.len(), "hull: point cloud is flat");
            return HullMesh::default();
        };
        let interior = simplex.iter().map(|&i| pts[i]).sum::<DVec3>() / 4.0;

        let mut faces: Vec<Face> = Vec::new();
        let [a, b, c, d] = simplex;
        for tri in [[a, b, c], [a, b, d], [a, c, d], [b, c, d]] {
            faces.push(make_face(&pts, tri, interior));
        }

        let in_simplex: HashSet<usize> = simplex.into_iter().collect();
        let candidates: Vec<usize> = (0..pts.len()).filter(|i| !in_simplex.contains(i)).collect();
        assign_outside(&pts, &mut faces, 0, candidates, eps);

        while let Some(fi) = faces.iter().position(|f| f.alive && !f.outside.is_empty()) {
            let apex = farthest_outside(&pts, &faces[fi]);
            let p = pts[apex];

            let visible: Vec<usize> = faces
                .iter()
                .enumerate()
                .filter(|(_, f)| f.alive && f.distance(p) > eps)
                .map(|(i, _)| i)
                .collect();

            let mut edges = HashSet::new();
            for &vi in &visible {
                let [x, y, z] = faces[vi].v;
                edges.insert((x, y));
                edges.insert((y, z));
                edges.insert((z, x));
            }
            // Each visible face is oriented consistently, so a directed edge
            // whose reverse is not visible lies on the horizon.
            let mut horizon: Vec<(usize, usize)> = edges
                .iter()
                .copied()
                .filter(|&(x, y)| !edges.contains(&(y, x)))
                .collect();
            horizon.sort_unstable();

            let mut orphans = Vec::new();
            for &vi in &visible {
                faces[vi].alive = false;
                orphans.extend(faces[vi].outside.drain(..).filter(|&i| i != apex));
            }

            let first_new = faces.len();
            for (x, y) in horizon {
                faces.push(make_face(&pts, [x, y, apex], interior));
            }
            assign_outside(&pts, &mut faces, first_new, orphans, eps);
        }

        emit_mesh(&pts, &faces)
    }
}

fn distinct_points(points: &[Vec3]) -> Vec<DVec3> {
    let mut seen = HashSet::with_capacity(points.len().min(1 << 16));
    points
        .iter()
        .filter(|p| p.is_finite())
        // Adding zero folds -0.0 into 0.0 before hashing the bit patterns.
        .map(|&p| p + Vec3::ZERO)
        .filter(|p| seen.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]))
        .map(|p| p.as_dvec3())
        .collect()
}

/// Four affinely independent points spanning the cloud, or `None` when flat.
fn initial_simplex(pts: &[DVec3], eps: f64) -> Option<[usize; 4]> {
    let mut extremes = [0usize; 6];
    for (i, p) in pts.iter().enumerate() {
        for axis in 0..3 {
            if p[axis] < pts[extremes[axis * 2]][axis] {
                extremes[axis * 2] = i;
            }
            if p[axis] > pts[extremes[axis * 2 + 1]][axis] {
                extremes[axis * 2 + 1] = i;
            }
        }
    }

    let mut best = (0.0, 0, 0);
    for &i in &extremes {
        for &j in &extremes {
            let d = pts[i].distance_squared(pts[j]);
            if d > best.0 {
                best = (d, i, j);
            }
        }
    }
    let (_, a, b) = best;
    if pts[a].distance(pts[b]) <= eps {
        return None;
    }

    let ab = pts[b] - pts[a];
    let c = argmax(pts, |p| (p - pts[a]).cross(ab).length())?;
    let normal = (pts[c] - pts[a]).cross(ab);
    if normal.length() <= eps * ab.length() {
        return None;
    }
    let normal = normal.normalize();
    let d = argmax(pts, |p| (p - pts[a]).dot(normal).abs())?;
    if (pts[d] - pts[a]).dot(normal).abs() <= eps {
        return None;
    }
    Some([a, b, c, d])
}

fn argmax(pts: &[DVec3], score: impl Fn(DVec3) -> f64) -> Option<usize> {
    pts.iter()
        .enumerate()
        .map(|(i, &p)| (i, score(p)))
        .max_by(|x, y| x.1.total_cmp(&y.1))
        .map(|(i, _)| i)
}

/// Face over `tri`, wound so its normal points away from `interior`.
fn make_face(pts: &[DVec3], tri: [usize; 3], interior: DVec3) -> Face {
    let [a, b, c] = tri;
    let mut v = tri;
    let mut normal = (pts[b] - pts[a]).cross(pts[c] - pts[a]).normalize_or_zero();
    if normal.dot(interior - pts[a]) > 0.0 {
        v = [a, c, b];
        normal = -normal;
    }
    Face {
        v,
        normal,
        offset: normal.dot(pts[a]),
        outside: Vec::new(),
        alive: true,
    }
}

/// Hands each candidate to the first face from `first` on that sees it.
/// Candidates no face sees are inside the hull and dropped.
fn assign_outside(pts: &[DVec3], faces: &mut [Face], first: usize, candidates: Vec<usize>, eps: f64) {
    for i in candidates {
        if let Some(face) = faces[first..]
            .iter_mut()
            .find(|f| f.alive && f.distance(pts[i]) > eps)
        {
            face.outside.push(i);
        }
    }
}

fn farthest_outside(pts: &[DVec3], face: &Face) -> usize {
    let mut best = face.outside[0];
    let mut best_d = face.distance(pts[best]);
    for &i in &face.outside[1..] {
        let d = face.distance(pts[i]);
        if d > best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

fn emit_mesh(pts: &[DVec3], faces: &[Face]) -> HullMesh {
    let mut remap = vec![u32::MAX; pts.len()];
    let mut mesh = HullMesh::default();
    for face in faces.iter().filter(|f| f.alive) {
        for &i in &face.v {
            if remap[i] == u32::MAX {
                remap[i] = mesh.vertices.len() as u32;
                mesh.vertices.push(pts[i].as_vec3());
            }
            mesh.indices.push(remap[i]);
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{HullBuilder, HullMesh, QuickHull};

    fn cube_corners(size: f32) -> Vec<Vec3> {
        let mut pts = Vec::new();
        for x in [0.0, size] {
            for y in [0.0, size] {
                for z in [0.0, size] {
                    pts.push(Vec3::new(x, y, z));
                }
            }
        }
        pts
    }

    fn signed_volume(mesh: &HullMesh) -> f32 {
        mesh.triangles()
            .map(|[a, b, c]| a.dot(b.cross(c)) / 6.0)
            .sum()
    }

    fn assert_closed(mesh: &HullMesh) {
        // Every directed edge must appear exactly once and its reverse once.
        let mut edges = std::collections::HashMap::new();
        for t in mesh.indices.chunks_exact(3) {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                *edges.entry((a, b)).or_insert(0) += 1;
            }
        }
        for (&(a, b), &n) in &edges {
            assert_eq!(n, 1, "edge {a}->{b} repeated");
            assert_eq!(edges.get(&(b, a)), Some(&1), "edge {a}->{b} has no twin");
        }
    }

    #[test]
    fn tetrahedron_yields_four_outward_triangles() {
        let pts = [
            Vec3::ZERO,
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::new(0.0, 0.0, 10.0),
        ];
        let mesh = QuickHull.build(&pts);
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(mesh.vertices.len(), 4);
        assert_closed(&mesh);
        assert!((signed_volume(&mesh) - 1000.0 / 6.0).abs() < 1e-3);
    }

    #[test]
    fn cube_with_interior_points_keeps_only_corners() {
        let mut pts = cube_corners(255.0);
        for i in 1..20 {
            let t = i as f32 * 12.0;
            pts.push(Vec3::new(t, 255.0 - t, (t * 7.0) % 250.0 + 1.0));
        }
        let mesh = QuickHull.build(&pts);
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        assert_closed(&mesh);
        let volume = 255.0_f32.powi(3);
        assert!((signed_volume(&mesh) - volume).abs() < volume * 1e-4);
    }

    #[test]
    fn duplicate_points_are_ignored() {
        let mut pts = cube_corners(1.0);
        pts.extend(cube_corners(1.0));
        let mesh = QuickHull.build(&pts);
        assert_eq!(mesh.triangle_count(), 12);
    }

    #[test]
    fn degenerate_clouds_give_empty_mesh() {
        let same = vec![Vec3::splat(128.0); 9];
        assert!(QuickHull.build(&same).is_empty());

        let line: Vec<Vec3> = (0..10).map(|i| Vec3::splat(i as f32)).collect();
        assert!(QuickHull.build(&line).is_empty());

        let plane: Vec<Vec3> = (0..25)
            .map(|i| Vec3::new((i % 5) as f32, (i / 5) as f32, 7.0))
            .collect();
        assert!(QuickHull.build(&plane).is_empty());
    }

    #[test]
    fn sphere_samples_form_closed_hull() {
        // Fibonacci sphere: every sample is a hull vertex, no four coplanar.
        let n = 60;
        let golden = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
        let pts: Vec<Vec3> = (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f32;
                Vec3::new(r * theta.cos(), y, r * theta.sin()) * 100.0 + Vec3::splat(128.0)
            })
            .collect();
        let mesh = QuickHull.build(&pts);
        assert_closed(&mesh);
        assert_eq!(mesh.vertices.len(), n);
        // Euler: a closed triangulated sphere has 2V - 4 faces.
        assert_eq!(mesh.triangle_count(), 2 * n - 4);
        assert!(signed_volume(&mesh) > 0.0);
    }
}
