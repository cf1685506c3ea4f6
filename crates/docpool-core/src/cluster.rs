//! Cluster planning.
//!
//! Two grouping strategies over rows of the [`FeatureIndex`], and a
//! planner that turns groups into an I/O-free [`MovePlan`]:
//!
//! - [`k_partition`]: seeded k-means (k-means++ init, several restarts,
//!   best inertia wins). Needs at least `k` candidates.
//! - [`greedy_threshold`]: single pass over the full pairwise cosine
//!   matrix; each unassigned item seeds a group and absorbs every later
//!   unassigned item at or above the threshold. The matrix is `n × n`,
//!   which bounds the corpus sizes this is meant for.
//!
//! Every candidate handed to the planner ends up in exactly one
//! planned cluster or in the plan's `unclustered` list.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::index::FeatureIndex;
use crate::models::MoveEntry;
use crate::naming::{fallback_dir_name, next_free_path, sanitize_dir_name, DEFAULT_MAX_DIR_NAME_CHARS};
use crate::sparse::SparseVector;

/// Restarts per k-partition run; the lowest-inertia result is kept.
const RESTARTS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub seed: u64,
    pub max_iterations: usize,
    pub keywords_per_label: usize,
    pub max_dir_name_chars: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 300,
            keywords_per_label: 3,
            max_dir_name_chars: DEFAULT_MAX_DIR_NAME_CHARS,
        }
    }
}

/// A document offered to the planner, with its row in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub document_id: i64,
    pub path: PathBuf,
    pub row: usize,
}

/// Result of [`k_partition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// Non-empty groups of input positions, ordered by first member.
    Clusters(Vec<Vec<usize>>),
    Skipped { candidates: usize, requested: usize },
}

/// Result of [`greedy_threshold`]. The two parts partition the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub clusters: Vec<Vec<usize>>,
    pub unclustered: Vec<usize>,
}

/// One materialized cluster in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCluster {
    pub label: String,
    pub directory: PathBuf,
    pub members: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovePlan {
    pub entries: Vec<MoveEntry>,
    pub clusters: Vec<PlannedCluster>,
    /// Documents that stay where they are.
    pub unclustered: Vec<i64>,
}

impl MovePlan {
    /// `(document id, new path)` for every document whose stored path
    /// must change once its move succeeds.
    pub fn path_updates(&self) -> Vec<(i64, PathBuf)> {
        self.entries
            .iter()
            .map(|e| (e.document_id, e.destination.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Planned(MovePlan),
    /// Too few candidates for the requested number of clusters.
    Skipped { candidates: usize, requested: usize },
}

/// Seeded k-means over `vectors`.
pub fn k_partition(
    vectors: &[&SparseVector],
    k: usize,
    seed: u64,
    max_iterations: usize,
) -> Partition {
    let n = vectors.len();
    if k == 0 || n < k {
        return Partition::Skipped {
            candidates: n,
            requested: k,
        };
    }
    let dim = vectors.iter().map(|v| v.dim()).max().unwrap_or(0);

    let mut best: Option<(f64, Vec<usize>)> = None;
    for restart in 0..RESTARTS {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(restart));
        let centroids = seed_centroids(vectors, k, dim, &mut rng);
        let (assignments, inertia) = lloyd(vectors, centroids, dim, max_iterations.max(1));
        if best.as_ref().map_or(true, |(b, _)| inertia < *b) {
            best = Some((inertia, assignments));
        }
    }
    let assignments = best.map(|(_, a)| a).unwrap_or_default();

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (i, &c) in assignments.iter().enumerate() {
        groups[c].push(i);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
    groups.sort_by_key(|g| g[0]);
    Partition::Clusters(groups)
}

/// k-means++ seeding.
fn seed_centroids(vectors: &[&SparseVector], k: usize, dim: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = vectors.len();
    let mut chosen = vec![rng.gen_range(0..n)];
    let mut centroids = vec![densify(vectors[chosen[0]], dim)];
    let mut d2: Vec<f64> = vectors
        .iter()
        .map(|v| sq_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = d2.iter().sum();
        let pick = if total <= f64::EPSILON {
            // All remaining points coincide with a centroid.
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                if target < d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        };
        chosen.push(pick);
        let centroid = densify(vectors[pick], dim);
        for (i, v) in vectors.iter().enumerate() {
            d2[i] = d2[i].min(sq_distance(v, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

/// Lloyd iterations. Returns assignments and final inertia.
fn lloyd(
    vectors: &[&SparseVector],
    mut centroids: Vec<Vec<f32>>,
    dim: usize,
    max_iterations: usize,
) -> (Vec<usize>, f64) {
    let k = centroids.len();
    let mut assignments = vec![usize::MAX; vectors.len()];
    let mut distances = vec![0.0f64; vectors.len()];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (i, v) in vectors.iter().enumerate() {
            let (best, d) = nearest(v, &centroids);
            distances[i] = d;
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, v) in vectors.iter().enumerate() {
            v.accumulate_into(&mut sums[assignments[i]]);
            counts[assignments[i]] += 1;
        }
        for c in 0..k {
            if counts[c] == 0 {
                // Re-seed an empty cluster with the worst-fitting point.
                let far = (0..vectors.len())
                    .max_by(|&a, &b| distances[a].total_cmp(&distances[b]))
                    .unwrap_or(0);
                centroids[c] = densify(vectors[far], dim);
                distances[far] = 0.0;
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            centroids[c] = sums[c].iter().map(|s| s * inv).collect();
        }
    }

    let inertia = vectors
        .iter()
        .map(|v| nearest(v, &centroids).1)
        .sum();
    (assignments, inertia)
}

fn nearest(v: &SparseVector, centroids: &[Vec<f32>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = sq_distance(v, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// `|v - c|²` for sparse `v` and dense `c`.
fn sq_distance(v: &SparseVector, c: &[f32]) -> f64 {
    let c_norm: f64 = c.iter().map(|x| (*x as f64) * (*x as f64)).sum();
    let v_norm = (v.norm() as f64).powi(2);
    let dot: f64 = v
        .iter()
        .filter_map(|(i, w)| c.get(i as usize).map(|x| w as f64 * *x as f64))
        .sum();
    (v_norm - 2.0 * dot + c_norm).max(0.0)
}

fn densify(v: &SparseVector, dim: usize) -> Vec<f32> {
    let mut dense = vec![0.0f32; dim];
    v.accumulate_into(&mut dense);
    dense
}

/// Greedy threshold grouping over the full pairwise similarity matrix.
pub fn greedy_threshold(vectors: &[&SparseVector], threshold: f32) -> Grouping {
    let n = vectors.len();
    let mut sim = vec![0.0f32; n * n];
    for i in 0..n {
        sim[i * n + i] = 1.0;
        for j in (i + 1)..n {
            let s = vectors[i].cosine(vectors[j]);
            sim[i * n + j] = s;
            sim[j * n + i] = s;
        }
    }

    let mut assigned = vec![false; n];
    let mut grouping = Grouping::default();
    for i in 0..n {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut members = vec![i];
        for j in (i + 1)..n {
            if !assigned[j] && sim[i * n + j] >= threshold {
                assigned[j] = true;
                members.push(j);
            }
        }
        if members.len() > 1 {
            grouping.clusters.push(members);
        } else {
            grouping.unclustered.push(i);
        }
    }
    grouping
}

/// Builds move plans from index rows. Never touches the filesystem.
pub struct ClusterPlanner<'a> {
    index: &'a FeatureIndex,
    config: &'a PlannerConfig,
}

impl<'a> ClusterPlanner<'a> {
    pub fn new(index: &'a FeatureIndex, config: &'a PlannerConfig) -> Self {
        Self { index, config }
    }

    /// Split `candidates` into `k` clusters under `base_dir`.
    pub fn plan_k_partition(&self, candidates: &[Candidate], base_dir: &Path, k: usize) -> PlanOutcome {
        let (usable, orphans) = self.resolve(candidates);
        let vectors: Vec<&SparseVector> = usable.iter().map(|(_, v)| *v).collect();
        match k_partition(&vectors, k, self.config.seed, self.config.max_iterations) {
            Partition::Skipped {
                candidates,
                requested,
            } => PlanOutcome::Skipped {
                candidates,
                requested,
            },
            Partition::Clusters(groups) => {
                let groups = remap(&groups, &usable);
                PlanOutcome::Planned(self.build(candidates, groups, orphans, base_dir))
            }
        }
    }

    /// Group `candidates` under `base_dir`; singletons stay in place.
    pub fn plan_greedy(&self, candidates: &[Candidate], base_dir: &Path, threshold: f32) -> MovePlan {
        let (usable, mut orphans) = self.resolve(candidates);
        let vectors: Vec<&SparseVector> = usable.iter().map(|(_, v)| *v).collect();
        let grouping = greedy_threshold(&vectors, threshold);
        let groups = remap(&grouping.clusters, &usable);
        orphans.extend(grouping.unclustered.iter().map(|&i| usable[i].0));
        orphans.sort_unstable();
        self.build(candidates, groups, orphans, base_dir)
    }

    /// Split candidates into those with a row in the index and the rest
    /// (by candidate position).
    fn resolve(&self, candidates: &[Candidate]) -> (Vec<(usize, &'a SparseVector)>, Vec<usize>) {
        let mut usable = Vec::with_capacity(candidates.len());
        let mut orphans = Vec::new();
        for (pos, c) in candidates.iter().enumerate() {
            match self.index.row(c.row) {
                Some(v) => usable.push((pos, v)),
                None => orphans.push(pos),
            }
        }
        (usable, orphans)
    }

    fn label_for(&self, candidates: &[Candidate], members: &[usize], ordinal: usize) -> String {
        let rows: Vec<usize> = members.iter().map(|&m| candidates[m].row).collect();
        self.index
            .get_top_keywords(&rows, self.config.keywords_per_label)
            .ok()
            .and_then(|label| sanitize_dir_name(&label, self.config.max_dir_name_chars))
            .unwrap_or_else(|| fallback_dir_name(ordinal))
    }

    fn build(
        &self,
        candidates: &[Candidate],
        groups: Vec<Vec<usize>>,
        unclustered: Vec<usize>,
        base_dir: &Path,
    ) -> MovePlan {
        let mut plan = MovePlan {
            unclustered: unclustered.iter().map(|&p| candidates[p].document_id).collect(),
            ..Default::default()
        };
        let mut used_dirs: HashSet<String> = HashSet::new();
        let mut taken: HashSet<PathBuf> = HashSet::new();

        for (i, members) in groups.into_iter().enumerate() {
            let ordinal = i + 1;
            let mut label = self.label_for(candidates, &members, ordinal);
            if !used_dirs.insert(label.clone()) {
                label = format!("{label}_{ordinal}");
                used_dirs.insert(label.clone());
            }
            let directory = base_dir.join(&label);
            let mut cluster = PlannedCluster {
                label,
                directory: directory.clone(),
                members: Vec::with_capacity(members.len()),
            };

            for m in members {
                let candidate = &candidates[m];
                cluster.members.push(candidate.document_id);
                let Some(name) = candidate.path.file_name() else {
                    continue;
                };
                let wanted = directory.join(name);
                if wanted == candidate.path {
                    taken.insert(wanted);
                    continue;
                }
                let destination = next_free_path(&wanted, |p| taken.contains(p));
                taken.insert(destination.clone());
                plan.entries.push(MoveEntry {
                    source: candidate.path.clone(),
                    destination,
                    document_id: candidate.document_id,
                });
            }
            plan.clusters.push(cluster);
        }
        plan
    }
}

/// Map groups of positions in `usable` back to candidate positions.
fn remap(groups: &[Vec<usize>], usable: &[(usize, &SparseVector)]) -> Vec<Vec<usize>> {
    groups
        .iter()
        .map(|g| g.iter().map(|&i| usable[i].0).collect())
        .collect()
}
