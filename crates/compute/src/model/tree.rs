use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

/// Growth limits for one regression tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; all of them when >= the feature count.
    pub max_features: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART regression tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    /// Rows going left, a prefix of the sorted order.
    n_left: usize,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree on the rows listed in `indices` (repeats allowed).
    ///
    /// Splits minimise the summed squared error of the children. Candidate
    /// thresholds are midpoints between consecutive distinct values.
    pub fn fit(x: &DMatrix<f64>, y: &[f64], indices: &[usize], params: &TreeParams, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        if indices.is_empty() {
            tree.nodes.push(Node::Leaf { value: 0.0 });
            return tree;
        }
        let mut rows = indices.to_vec();
        tree.grow(x, y, &mut rows, 0, params, rng);
        tree
    }

    fn grow(
        &mut self,
        x: &DMatrix<f64>,
        y: &[f64],
        rows: &mut [usize],
        depth: usize,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        let value = rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64;
        self.nodes.push(Node::Leaf { value });

        let depth_left = params.max_depth.map_or(true, |d| depth < d);
        if !depth_left || rows.len() < params.min_samples_split.max(2) {
            return id;
        }
        let Some(split) = best_split(x, y, rows, params, rng) else {
            return id;
        };

        rows.sort_by(|&a, &b| x[(a, split.feature)].total_cmp(&x[(b, split.feature)]));
        let (left_rows, right_rows) = rows.split_at_mut(split.n_left);
        let left = self.grow(x, y, left_rows, depth + 1, params, rng);
        let right = self.grow(x, y, right_rows, depth + 1, params, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    id = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

fn best_split(x: &DMatrix<f64>, y: &[f64], rows: &[usize], params: &TreeParams, rng: &mut StdRng) -> Option<Split> {
    let n_features = x.ncols();
    if n_features == 0 {
        return None;
    }
    let candidates: Vec<usize> = if params.max_features >= n_features {
        (0..n_features).collect()
    } else {
        sample(rng, n_features, params.max_features.max(1)).into_vec()
    };

    let n = rows.len();
    let total_sum: f64 = rows.iter().map(|&r| y[r]).sum();
    let total_sq: f64 = rows.iter().map(|&r| y[r] * y[r]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;
    let min_leaf = params.min_samples_leaf.max(1);

    let mut best: Option<Split> = None;
    let mut order = rows.to_vec();
    for feature in candidates {
        order.sort_by(|&a, &b| x[(a, feature)].total_cmp(&x[(b, feature)]));
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 0..n - 1 {
            let yi = y[order[i]];
            left_sum += yi;
            left_sq += yi * yi;
            let n_left = i + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let here = x[(order[i], feature)];
            let next = x[(order[i + 1], feature)];
            if here >= next {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / n_left as f64)
                + (right_sq - right_sum * right_sum / n_right as f64);
            let gain = parent_sse - sse;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature,
                    threshold: (here + next) / 2.0,
                    n_left,
                    gain,
                });
            }
        }
    }
    best
}
