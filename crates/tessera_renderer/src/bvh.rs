//! Bounding Volume Hierarchy (BVH) over the faces of a [`Mesh`].
//!
//! Built top-down with a binned Surface Area Heuristic into a flat node
//! array. Nodes reference faces through a permutation of face indices, so the
//! mesh itself is never reordered.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tessera_core::{Mesh, MeshError};
use tessera_math::{Aabb, Interval, Ray, Vec3};
use thiserror::Error;

use crate::triangle::{intersect_triangle, TriangleHit};

/// Errors that can occur while building a BVH.
#[derive(Error, Debug)]
pub enum BvhError {
    #[error("Cannot build BVH from a mesh without faces")]
    EmptyMesh,

    #[error("Invalid build options: {0}")]
    InvalidOptions(String),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(#[from] MeshError),
}

/// Result type for BVH operations.
pub type BvhResult<T> = Result<T, BvhError>;

/// Options controlling BVH construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Ranges of this many faces or fewer become leaves
    pub min_leaf_primitives: usize,
    /// Number of SAH bins per axis
    pub bin_size: usize,
    /// Nodes at this depth become leaves regardless of size
    pub max_tree_depth: usize,
    /// Compute face bounds once up front instead of on every visit
    pub cache_bbox: bool,
    /// SAH cost of visiting a node
    pub traversal_cost: f32,
    /// SAH cost of testing one face
    pub intersection_cost: f32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            min_leaf_primitives: 4,
            bin_size: 64,
            max_tree_depth: 256,
            cache_bbox: false,
            traversal_cost: 0.2,
            intersection_cost: 1.0,
        }
    }
}

impl BuildOptions {
    fn validate(&self) -> BvhResult<()> {
        if self.min_leaf_primitives == 0 {
            return Err(BvhError::InvalidOptions(
                "min_leaf_primitives must be at least 1".into(),
            ));
        }
        if self.bin_size < 2 {
            return Err(BvhError::InvalidOptions(format!(
                "bin_size must be at least 2, got {}",
                self.bin_size
            )));
        }
        if self.max_tree_depth == 0 {
            return Err(BvhError::InvalidOptions(
                "max_tree_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Statistics gathered during construction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BuildStatistics {
    pub num_leaf_nodes: u32,
    pub num_branch_nodes: u32,
    /// Depth of the deepest node; the root is at depth 0
    pub max_tree_depth: u32,
    pub build_time: Duration,
}

/// A node in the flat node array.
#[derive(Debug, Clone, Copy)]
pub enum BvhNode {
    /// Internal node; children are indices into the node array.
    Branch { bbox: Aabb, left: u32, right: u32 },
    /// Leaf covering `indices[first..first + count]`.
    Leaf { bbox: Aabb, first: u32, count: u32 },
}

impl BvhNode {
    pub fn bbox(&self) -> &Aabb {
        match self {
            BvhNode::Branch { bbox, .. } | BvhNode::Leaf { bbox, .. } => bbox,
        }
    }
}

/// A BVH over the faces of one mesh.
///
/// `Bvh::default()` is the unbuilt structure: it is not valid and every
/// query misses.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    indices: Vec<u32>,
    triangle_count: usize,
    stats: BuildStatistics,
}

impl Bvh {
    /// Build a BVH over all faces of `mesh`.
    pub fn build(mesh: &Mesh, options: &BuildOptions) -> BvhResult<Self> {
        options.validate()?;
        mesh.validate()?;
        if mesh.is_empty() {
            return Err(BvhError::EmptyMesh);
        }

        log::info!("  BVH build option:");
        log::info!("    # of leaf primitives: {}", options.min_leaf_primitives);
        log::info!("    SAH binsize         : {}", options.bin_size);
        log::info!("  num_triangles = {}", mesh.triangle_count());

        let start = Instant::now();

        let cached: Option<Vec<Aabb>> = options.cache_bbox.then(|| {
            (0..mesh.triangle_count())
                .into_par_iter()
                .map(|face| Aabb::from_triangle(&corners(mesh, face as u32)))
                .collect()
        });

        let mut builder = Builder {
            mesh,
            cached,
            options,
            nodes: Vec::with_capacity(2 * mesh.triangle_count() / options.min_leaf_primitives + 1),
            stats: BuildStatistics::default(),
        };

        let mut indices: Vec<u32> = (0..mesh.triangle_count() as u32).collect();
        builder.build_node(&mut indices, 0, 0);

        let mut stats = builder.stats;
        stats.build_time = start.elapsed();

        let bvh = Self {
            nodes: builder.nodes,
            indices,
            triangle_count: mesh.triangle_count(),
            stats,
        };

        log::info!(
            "BVH build time: {:.3} [ms]",
            stats.build_time.as_secs_f64() * 1000.0
        );
        log::info!("  BVH statistics:");
        log::info!("    # of leaf   nodes: {}", stats.num_leaf_nodes);
        log::info!("    # of branch nodes: {}", stats.num_branch_nodes);
        log::info!("  Max tree depth     : {}", stats.max_tree_depth);
        let bbox = bvh.bounding_box();
        log::info!("  Bmin               : {:?}", bbox.min());
        log::info!("  Bmax               : {:?}", bbox.max());

        Ok(bvh)
    }

    /// True once the BVH has been successfully built.
    pub fn is_valid(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// World-space bounds of the whole mesh. Empty for an unbuilt BVH.
    pub fn bounding_box(&self) -> Aabb {
        self.nodes.first().map(|n| *n.bbox()).unwrap_or(Aabb::EMPTY)
    }

    pub fn statistics(&self) -> BuildStatistics {
        self.stats
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Face indices in leaf order.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Find the closest face of `mesh` hit by `ray` inside `ray_t`.
    ///
    /// `mesh` must be the mesh the BVH was built from.
    pub fn intersect(&self, mesh: &Mesh, ray: &Ray, ray_t: Interval) -> Option<TriangleHit> {
        if !self.is_valid() || mesh.triangle_count() != self.triangle_count {
            return None;
        }

        let mut closest: Option<TriangleHit> = None;
        let mut t_max = ray_t.max;
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.bbox().hit(ray, Interval::new(ray_t.min, t_max)) {
                continue;
            }

            match *node {
                BvhNode::Branch { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                BvhNode::Leaf { first, count, .. } => {
                    let range = first as usize..(first + count) as usize;
                    for &face in &self.indices[range] {
                        let Some(v) = mesh.triangle_vertices(face as usize) else {
                            continue;
                        };
                        if let Some((t, u, w)) =
                            intersect_triangle(ray, &v, Interval::new(ray_t.min, t_max))
                        {
                            t_max = t;
                            closest = Some(TriangleHit { face, t, u, v: w });
                        }
                    }
                }
            }
        }

        closest
    }
}

/// Corner positions of a face of a validated mesh.
fn corners(mesh: &Mesh, face: u32) -> [Vec3; 3] {
    mesh.triangles[face as usize].map(|i| mesh.positions[i as usize])
}

/// A chosen SAH split: faces whose centroid falls in a bin below `bin` go left.
struct Split {
    axis: usize,
    bin: usize,
    origin: f32,
    extent: f32,
}

struct Builder<'a> {
    mesh: &'a Mesh,
    cached: Option<Vec<Aabb>>,
    options: &'a BuildOptions,
    nodes: Vec<BvhNode>,
    stats: BuildStatistics,
}

impl Builder<'_> {
    fn face_bounds(&self, face: u32) -> Aabb {
        match &self.cached {
            Some(bounds) => bounds[face as usize],
            None => Aabb::from_triangle(&corners(self.mesh, face)),
        }
    }

    fn bin_index(&self, centroid: f32, split: &Split) -> usize {
        let bins = self.options.bin_size;
        let relative = (centroid - split.origin) / split.extent;
        ((relative * bins as f32) as usize).min(bins - 1)
    }

    /// Build the subtree for `faces`, which start at `offset` in the final
    /// index array. Returns the node index.
    fn build_node(&mut self, faces: &mut [u32], offset: usize, depth: usize) -> u32 {
        let bbox = faces
            .iter()
            .fold(Aabb::EMPTY, |acc, &f| Aabb::surrounding(&acc, &self.face_bounds(f)));

        self.stats.max_tree_depth = self.stats.max_tree_depth.max(depth as u32);

        let node_index = self.nodes.len() as u32;
        let leaf = BvhNode::Leaf {
            bbox,
            first: offset as u32,
            count: faces.len() as u32,
        };
        self.nodes.push(leaf);

        if faces.len() <= self.options.min_leaf_primitives
            || depth + 1 >= self.options.max_tree_depth
        {
            self.stats.num_leaf_nodes += 1;
            return node_index;
        }

        let mid = match self.find_split(faces, &bbox) {
            Some(split) => self.partition(faces, &split),
            None => 0,
        };
        let mid = if mid == 0 || mid == faces.len() {
            self.median_split(faces)
        } else {
            mid
        };

        let (left_faces, right_faces) = faces.split_at_mut(mid);
        let left = self.build_node(left_faces, offset, depth + 1);
        let right = self.build_node(right_faces, offset + mid, depth + 1);

        self.nodes[node_index as usize] = BvhNode::Branch { bbox, left, right };
        self.stats.num_branch_nodes += 1;
        node_index
    }

    /// Evaluate every bin boundary on every axis and return the cheapest.
    fn find_split(&self, faces: &[u32], bbox: &Aabb) -> Option<Split> {
        let parent_area = bbox.surface_area();
        if parent_area <= 0.0 {
            return None;
        }

        let centroid_bounds = faces.iter().fold(Aabb::EMPTY, |acc, &f| {
            acc.include_point(self.face_bounds(f).centroid())
        });

        let bins = self.options.bin_size;
        let mut best: Option<(f32, Split)> = None;

        for axis in 0..3 {
            let span = centroid_bounds.axis_interval(axis);
            if span.size() <= 0.0 {
                continue;
            }

            let probe = Split {
                axis,
                bin: 0,
                origin: span.min,
                extent: span.size(),
            };

            let mut bin_bounds = vec![Aabb::EMPTY; bins];
            let mut bin_counts = vec![0usize; bins];
            for &f in faces {
                let bounds = self.face_bounds(f);
                let b = self.bin_index(bounds.centroid()[axis], &probe);
                bin_bounds[b] = Aabb::surrounding(&bin_bounds[b], &bounds);
                bin_counts[b] += 1;
            }

            // Right-to-left sweep: area and count of bins[i..].
            let mut right_area = vec![0.0f32; bins];
            let mut right_count = vec![0usize; bins];
            let mut acc = Aabb::EMPTY;
            let mut count = 0;
            for i in (1..bins).rev() {
                acc = Aabb::surrounding(&acc, &bin_bounds[i]);
                count += bin_counts[i];
                right_area[i] = acc.surface_area();
                right_count[i] = count;
            }

            let mut left = Aabb::EMPTY;
            let mut left_count = 0;
            for i in 1..bins {
                left = Aabb::surrounding(&left, &bin_bounds[i - 1]);
                left_count += bin_counts[i - 1];
                if left_count == 0 || right_count[i] == 0 {
                    continue;
                }

                let cost = self.options.traversal_cost
                    + self.options.intersection_cost
                        * (left.surface_area() / parent_area * left_count as f32
                            + right_area[i] / parent_area * right_count[i] as f32);

                if best.as_ref().map_or(true, |(best_cost, _)| cost < *best_cost) {
                    best = Some((
                        cost,
                        Split {
                            bin: i,
                            ..probe
                        },
                    ));
                }
            }
        }

        best.map(|(_, split)| split)
    }

    /// Move faces left of `split` to the front. Returns the number moved.
    fn partition(&self, faces: &mut [u32], split: &Split) -> usize {
        let mut left = 0;
        let mut right = faces.len();
        while left < right {
            let centroid = self.face_bounds(faces[left]).centroid()[split.axis];
            if self.bin_index(centroid, split) < split.bin {
                left += 1;
            } else {
                right -= 1;
                faces.swap(left, right);
            }
        }
        left
    }

    /// Object-median split along the longest centroid axis.
    fn median_split(&self, faces: &mut [u32]) -> usize {
        let centroid_bounds = faces.iter().fold(Aabb::EMPTY, |acc, &f| {
            acc.include_point(self.face_bounds(f).centroid())
        });
        let axis = centroid_bounds.longest_axis();

        faces.sort_unstable_by(|&a, &b| {
            let a = self.face_bounds(a).centroid()[axis];
            let b = self.face_bounds(b).centroid()[axis];
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        });

        faces.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// A row of `n` unit triangles along +X, facing +Z.
    fn strip(n: usize) -> Mesh {
        let mut positions = Vec::with_capacity(n * 3);
        let mut triangles = Vec::with_capacity(n);
        for i in 0..n {
            let x = i as f32 * 2.0;
            let base = positions.len() as u32;
            positions.push(Vec3::new(x, 0.0, 0.0));
            positions.push(Vec3::new(x + 1.0, 0.0, 0.0));
            positions.push(Vec3::new(x, 1.0, 0.0));
            triangles.push([base, base + 1, base + 2]);
        }
        Mesh::new(positions, triangles)
    }

    fn random_soup(n: usize, seed: u64) -> Mesh {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut positions = Vec::with_capacity(n * 3);
        let mut triangles = Vec::with_capacity(n);
        for i in 0..n {
            let center = Vec3::new(
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
            );
            for _ in 0..3 {
                let offset = Vec3::new(
                    rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                );
                positions.push(center + offset);
            }
            let base = (i * 3) as u32;
            triangles.push([base, base + 1, base + 2]);
        }
        Mesh::new(positions, triangles)
    }

    fn brute_force(mesh: &Mesh, ray: &Ray, ray_t: Interval) -> Option<(u32, f32)> {
        let mut best: Option<(u32, f32)> = None;
        for face in 0..mesh.triangle_count() {
            let v = mesh.triangle_vertices(face).unwrap();
            let limit = best.map_or(ray_t.max, |(_, t)| t);
            if let Some((t, _, _)) = intersect_triangle(ray, &v, Interval::new(ray_t.min, limit)) {
                best = Some((face as u32, t));
            }
        }
        best
    }

    #[test]
    fn test_default_bvh_is_invalid() {
        let bvh = Bvh::default();
        let mesh = strip(1);

        assert!(!bvh.is_valid());
        assert!(bvh.bounding_box().is_empty());
        let ray = Ray::new(Vec3::new(0.2, 0.2, 1.0), Vec3::NEG_Z);
        assert!(bvh.intersect(&mesh, &ray, Interval::UNIVERSE).is_none());
    }

    #[test]
    fn test_empty_mesh_fails() {
        let result = Bvh::build(&Mesh::default(), &BuildOptions::default());
        assert!(matches!(result, Err(BvhError::EmptyMesh)));
    }

    #[test]
    fn test_invalid_options_fail() {
        let options = BuildOptions {
            bin_size: 1,
            ..Default::default()
        };
        let result = Bvh::build(&strip(4), &options);
        assert!(matches!(result, Err(BvhError::InvalidOptions(_))));
    }

    #[test]
    fn test_invalid_mesh_fails() {
        let mut mesh = strip(2);
        mesh.triangles[1] = [0, 1, 42];
        let result = Bvh::build(&mesh, &BuildOptions::default());
        assert!(matches!(result, Err(BvhError::InvalidMesh(_))));
    }

    #[test]
    fn test_single_face_is_one_leaf() {
        let bvh = Bvh::build(&strip(1), &BuildOptions::default()).unwrap();
        let stats = bvh.statistics();

        assert!(bvh.is_valid());
        assert_eq!(stats.num_leaf_nodes, 1);
        assert_eq!(stats.num_branch_nodes, 0);
        assert_eq!(stats.max_tree_depth, 0);
        assert!(matches!(bvh.nodes()[0], BvhNode::Leaf { count: 1, .. }));
    }

    #[test]
    fn test_statistics_describe_a_binary_tree() {
        let bvh = Bvh::build(&strip(100), &BuildOptions::default()).unwrap();
        let stats = bvh.statistics();

        assert_eq!(stats.num_leaf_nodes, stats.num_branch_nodes + 1);
        assert_eq!(
            (stats.num_leaf_nodes + stats.num_branch_nodes) as usize,
            bvh.nodes().len()
        );
        // 100 faces in leaves of at most 4 need at least 5 levels.
        assert!(stats.max_tree_depth >= 5, "depth {}", stats.max_tree_depth);

        for node in bvh.nodes() {
            if let BvhNode::Leaf { count, .. } = node {
                assert!(*count >= 1 && *count <= 4, "leaf with {} faces", count);
            }
        }
    }

    #[test]
    fn test_every_face_is_referenced_once() {
        let mesh = random_soup(500, 7);
        let bvh = Bvh::build(&mesh, &BuildOptions::default()).unwrap();

        let mut seen = vec![0u32; mesh.triangle_count()];
        for node in bvh.nodes() {
            if let BvhNode::Leaf { first, count, .. } = node {
                for &face in &bvh.indices()[*first as usize..(*first + *count) as usize] {
                    seen[face as usize] += 1;
                }
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_bounding_box_covers_mesh() {
        let mesh = strip(10);
        let bvh = Bvh::build(&mesh, &BuildOptions::default()).unwrap();
        let bbox = bvh.bounding_box();

        assert!(bbox.x.min <= 0.0 && bbox.x.max >= 19.0);
        assert!(bbox.y.min <= 0.0 && bbox.y.max >= 1.0);
    }

    #[test]
    fn test_identical_faces_still_split() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let triangles = vec![[0, 1, 2]; 20];
        let mesh = Mesh::new(positions, triangles);

        let bvh = Bvh::build(&mesh, &BuildOptions::default()).unwrap();
        for node in bvh.nodes() {
            if let BvhNode::Leaf { count, .. } = node {
                assert!(*count <= 4);
            }
        }
    }

    #[test]
    fn test_max_depth_caps_the_tree() {
        let options = BuildOptions {
            max_tree_depth: 2,
            ..Default::default()
        };
        let bvh = Bvh::build(&strip(64), &options).unwrap();
        assert!(bvh.statistics().max_tree_depth <= 1);
    }

    #[test]
    fn test_intersect_matches_brute_force() {
        let _ = env_logger::builder().is_test(true).try_init();

        for cache_bbox in [false, true] {
            let mesh = random_soup(300, 42);
            let options = BuildOptions {
                cache_bbox,
                ..Default::default()
            };
            let bvh = Bvh::build(&mesh, &options).unwrap();

            let mut rng = StdRng::seed_from_u64(1234);
            for _ in 0..200 {
                let origin = Vec3::new(
                    rng.gen_range(-12.0..12.0),
                    rng.gen_range(-12.0..12.0),
                    -20.0,
                );
                let target = Vec3::new(
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                );
                let ray = Ray::new(origin, target - origin);
                let ray_t = Interval::new(0.0, f32::INFINITY);

                let expected = brute_force(&mesh, &ray, ray_t);
                let actual = bvh.intersect(&mesh, &ray, ray_t);
                match (expected, actual) {
                    (None, None) => {}
                    (Some((_, t)), Some(hit)) => assert!((t - hit.t).abs() < 1e-4),
                    other => panic!("brute force and BVH disagree: {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_intersect_returns_closest_face() {
        // Two parallel triangles; the nearer one must win.
        let positions = vec![
            Vec3::new(-1.0, -1.0, -2.0),
            Vec3::new(1.0, -1.0, -2.0),
            Vec3::new(0.0, 1.0, -2.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
        ];
        let mesh = Mesh::new(positions, vec![[0, 1, 2], [3, 4, 5]]);
        let bvh = Bvh::build(&mesh, &BuildOptions::default()).unwrap();

        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let hit = bvh.intersect(&mesh, &ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert_eq!(hit.face, 1);
        assert!((hit.t - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_intersect_rejects_foreign_mesh() {
        let bvh = Bvh::build(&strip(4), &BuildOptions::default()).unwrap();
        let other = strip(5);
        let ray = Ray::new(Vec3::new(0.2, 0.2, 1.0), Vec3::NEG_Z);
        assert!(bvh.intersect(&other, &ray, Interval::UNIVERSE).is_none());
    }
}
