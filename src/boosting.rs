//! Градиентный бустинг деревьев регрессии с квадратичной функцией потерь.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

const DEFAULT_N_ESTIMATORS: usize = 300;
const DEFAULT_LEARNING_RATE: f64 = 0.05;
const DEFAULT_MAX_DEPTH: usize = 3;
const DEFAULT_SUBSAMPLE: f64 = 0.7;
const DEFAULT_COLSAMPLE: f64 = 0.7;
const DEFAULT_GAMMA: f64 = 0.2;
const DEFAULT_LAMBDA: f64 = 1.0;
const DEFAULT_MIN_CHILD_WEIGHT: f64 = 1.0;
const DEFAULT_SEED: u64 = 42;

/// Любая обученная модель регрессии, которую можно подставить в прогнозатор.
pub trait Regressor {
    fn predict(&self, features: &[f64]) -> f64;

    fn predict_batch<R: AsRef<[f64]>>(&self, rows: &[R]) -> Vec<f64>
    where
        Self: Sized,
    {
        rows.iter().map(|row| self.predict(row.as_ref())).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Доля строк для каждого дерева.
    pub subsample: f64,
    /// Доля признаков для каждого дерева.
    pub colsample_bytree: f64,
    /// Минимальный выигрыш для разбиения узла.
    pub gamma: f64,
    /// L2-регуляризация весов листьев.
    pub lambda: f64,
    pub min_child_weight: f64,
    pub seed: u64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_depth: DEFAULT_MAX_DEPTH,
            subsample: DEFAULT_SUBSAMPLE,
            colsample_bytree: DEFAULT_COLSAMPLE,
            gamma: DEFAULT_GAMMA,
            lambda: DEFAULT_LAMBDA,
            min_child_weight: DEFAULT_MIN_CHILD_WEIGHT,
            seed: DEFAULT_SEED,
        }
    }
}

impl BoostingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_estimators == 0 {
            return Err("boosting.n_estimators must be > 0".to_string());
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err("boosting.learning_rate must be > 0".to_string());
        }
        if self.max_depth == 0 {
            return Err("boosting.max_depth must be > 0".to_string());
        }
        if !self.subsample.is_finite() || !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err("boosting.subsample must be within (0, 1]".to_string());
        }
        if !self.colsample_bytree.is_finite()
            || !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0)
        {
            return Err("boosting.colsample_bytree must be within (0, 1]".to_string());
        }
        if !self.gamma.is_finite() || self.gamma < 0.0 {
            return Err("boosting.gamma must be >= 0".to_string());
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err("boosting.lambda must be >= 0".to_string());
        }
        if !self.min_child_weight.is_finite() || self.min_child_weight < 0.0 {
            return Err("boosting.min_child_weight must be >= 0".to_string());
        }
        Ok(())
    }

    /// Обучает ансамбль деревьев на матрице `rows` и целях `targets`.
    pub fn fit<R: AsRef<[f64]>>(
        &self,
        rows: &[R],
        targets: &[f64],
    ) -> Result<GradientBoostedTrees, String> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err("rows/targets must be non-empty and the same length".to_string());
        }
        let n_features = rows[0].as_ref().len();
        if n_features == 0 || rows.iter().any(|row| row.as_ref().len() != n_features) {
            return Err("all rows must have the same non-zero number of features".to_string());
        }
        self.validate()?;

        let n_rows = rows.len();
        let base_score = targets.iter().sum::<f64>() / n_rows as f64;
        let mut predictions = vec![base_score; n_rows];
        let mut grad = vec![0.0; n_rows];
        let hess = vec![1.0; n_rows];
        let row_sample = fraction_count(n_rows, self.subsample);
        let col_sample = fraction_count(n_features, self.colsample_bytree);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trees = Vec::with_capacity(self.n_estimators);

        for _ in 0..self.n_estimators {
            for ((g, pred), target) in grad.iter_mut().zip(&predictions).zip(targets) {
                *g = pred - target;
            }

            let mut sampled_rows = sample(&mut rng, n_rows, row_sample).into_vec();
            sampled_rows.sort_unstable();
            let mut sampled_cols = sample(&mut rng, n_features, col_sample).into_vec();
            sampled_cols.sort_unstable();

            let builder = TreeBuilder {
                config: self,
                rows,
                grad: &grad,
                hess: &hess,
                features: &sampled_cols,
            };
            let tree = builder.build(sampled_rows);
            for (pred, row) in predictions.iter_mut().zip(rows) {
                *pred += tree.predict(row.as_ref());
            }
            trees.push(tree);
        }

        Ok(GradientBoostedTrees {
            base_score,
            trees,
            n_features,
        })
    }
}

#[derive(Clone, Debug)]
pub struct GradientBoostedTrees {
    base_score: f64,
    trees: Vec<Tree>,
    n_features: usize,
}

impl GradientBoostedTrees {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for GradientBoostedTrees {
    fn predict(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.n_features);
        self.trees
            .iter()
            .fold(self.base_score, |acc, tree| acc + tree.predict(features))
    }
}

#[derive(Clone, Copy, Debug)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Вес листа, уже умноженный на learning rate.
    Leaf(f64),
}

#[derive(Clone, Debug)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf(weight) => return weight,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // NaN уходит влево.
                    idx = if features[feature] >= threshold {
                        right
                    } else {
                        left
                    };
                }
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a, R> {
    config: &'a BoostingConfig,
    rows: &'a [R],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
}

impl<R: AsRef<[f64]>> TreeBuilder<'_, R> {
    fn build(&self, sample: Vec<usize>) -> Tree {
        let mut nodes = Vec::new();
        self.grow(&mut nodes, sample, 0);
        Tree { nodes }
    }

    fn grow(&self, nodes: &mut Vec<Node>, sample: Vec<usize>, depth: usize) -> usize {
        let (g_sum, h_sum) = self.sums(&sample);
        let idx = nodes.len();
        nodes.push(Node::Leaf(self.leaf_weight(g_sum, h_sum)));

        if depth >= self.config.max_depth || sample.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(&sample, g_sum, h_sum) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&row| self.value(row, split.feature) < split.threshold);
        let left = self.grow(nodes, left_rows, depth + 1);
        let right = self.grow(nodes, right_rows, depth + 1);
        nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    /// Точный жадный поиск разбиения по отсортированным значениям признака.
    fn best_split(&self, sample: &[usize], g_sum: f64, h_sum: f64) -> Option<SplitCandidate> {
        let lambda = self.config.lambda;
        let parent_score = g_sum * g_sum / (h_sum + lambda);
        let mut best: Option<SplitCandidate> = None;
        let mut order = sample.to_vec();

        for &feature in self.features {
            order.sort_by(|&a, &b| {
                self.value(a, feature)
                    .total_cmp(&self.value(b, feature))
                    .then(a.cmp(&b))
            });

            let mut g_left = 0.0;
            let mut h_left = 0.0;
            for pos in 0..order.len() - 1 {
                let row = order[pos];
                g_left += self.grad[row];
                h_left += self.hess[row];

                let current = self.value(row, feature);
                let next = self.value(order[pos + 1], feature);
                if current.is_nan() || next.is_nan() || current >= next {
                    continue;
                }
                let g_right = g_sum - g_left;
                let h_right = h_sum - h_left;
                if h_left < self.config.min_child_weight || h_right < self.config.min_child_weight
                {
                    continue;
                }

                let gain = 0.5
                    * (g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda)
                        - parent_score)
                    - self.config.gamma;
                if gain > 0.0 && best.as_ref().is_none_or(|current| gain > current.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: 0.5 * (current + next),
                        gain,
                    });
                }
            }
        }
        best
    }

    fn sums(&self, sample: &[usize]) -> (f64, f64) {
        sample.iter().fold((0.0, 0.0), |(g, h), &row| {
            (g + self.grad[row], h + self.hess[row])
        })
    }

    fn leaf_weight(&self, g_sum: f64, h_sum: f64) -> f64 {
        let denom = h_sum + self.config.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -g_sum / denom * self.config.learning_rate
    }

    fn value(&self, row: usize, feature: usize) -> f64 {
        self.rows[row].as_ref()[feature]
    }
}

/// Сколько элементов взять из `total` при доле `fraction` (минимум один).
fn fraction_count(total: usize, fraction: f64) -> usize {
    let count = (total as f64 * fraction).round() as usize;
    count.clamp(1, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn step_data() -> (Vec<[f64; 2]>, Vec<f64>) {
        let rows: Vec<[f64; 2]> = (0..60).map(|i| [f64::from(i), f64::from(i % 5)]).collect();
        let targets = rows
            .iter()
            .map(|row| if row[0] < 30.0 { -4.0 } else { 6.0 })
            .collect();
        (rows, targets)
    }

    #[test]
    fn constant_target_is_reproduced_exactly() {
        let rows: Vec<[f64; 2]> = (0..40).map(|i| [f64::from(i), 1.0]).collect();
        let targets = vec![25.0; rows.len()];
        let model = BoostingConfig::default().fit(&rows, &targets).unwrap();

        assert_eq!(model.n_trees(), DEFAULT_N_ESTIMATORS);
        assert_eq!(model.predict(&[3.0, 1.0]), 25.0);
        assert_eq!(model.predict(&[1000.0, -1.0]), 25.0);
    }

    #[test]
    fn learns_a_step_function() {
        let (rows, targets) = step_data();
        let config = BoostingConfig {
            colsample_bytree: 1.0,
            subsample: 1.0,
            ..BoostingConfig::default()
        };
        let model = config.fit(&rows, &targets).unwrap();

        assert_abs_diff_eq!(model.predict(&[5.0, 0.0]), -4.0, epsilon = 0.5);
        assert_abs_diff_eq!(model.predict(&[50.0, 0.0]), 6.0, epsilon = 0.5);
    }

    #[test]
    fn same_seed_gives_identical_models() {
        let (rows, targets) = step_data();
        let config = BoostingConfig::default();
        let first = config.fit(&rows, &targets).unwrap();
        let second = config.fit(&rows, &targets).unwrap();

        let a = first.predict_batch(&rows);
        let b = second.predict_batch(&rows);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_mismatched_input() {
        let rows = vec![[1.0], [2.0]];
        assert!(BoostingConfig::default().fit(&rows, &[1.0]).is_err());
        let empty: Vec<[f64; 1]> = Vec::new();
        assert!(BoostingConfig::default().fit(&empty, &[]).is_err());
    }

    #[test]
    fn validate_rejects_bad_fractions() {
        let config = BoostingConfig {
            subsample: 0.0,
            ..BoostingConfig::default()
        };
        assert!(config.validate().is_err());
        let config = BoostingConfig {
            colsample_bytree: 1.5,
            ..BoostingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn fraction_count_keeps_at_least_one() {
        assert_eq!(fraction_count(1, 0.7), 1);
        assert_eq!(fraction_count(10, 0.7), 7);
        assert_eq!(fraction_count(8, 0.7), 6);
    }
}
