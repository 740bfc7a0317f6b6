//! Forward and backward pass over the shared matrices.
//!
//! One model instance lives on each worker thread and carries its own RNG
//! and scratch vectors. The matrices themselves are only borrowed for the
//! duration of an update.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::args::{Args, LossKind, ModelKind};
use crate::error::JamoTextErrorKind;
use crate::matrix::{Matrix, MatrixKind};
use crate::vector::Vector;
use crate::JamoTextResult;

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: f32 = 8.0;
const LOG_TABLE_SIZE: usize = 512;
const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

#[derive(Debug, Clone)]
struct Node {
    parent: i32,
    left: i32,
    right: i32,
    count: i64,
    binary: bool,
}

pub struct Model {
    hidden: Vector,
    output: Vector,
    grad: Vector,
    osz: i32,
    hsz: i32,
    loss_value: f32,
    nexamples: i64,
    t_sigmoid: Vec<f32>,
    t_log: Vec<f32>,
    negatives: Vec<i32>,
    negpos: usize,
    paths: Vec<Vec<i32>>,
    codes: Vec<Vec<bool>>,
    tree: Vec<Node>,
    loss_kind: LossKind,
    model_kind: ModelKind,
    neg: i32,
    rng: StdRng,
}

// Bounded best-k list ordered by score, ties resolved toward the smaller
// class id.
struct TopK {
    k: usize,
    entries: Vec<(f32, i32)>,
}

impl TopK {
    fn new(k: usize) -> Self {
        TopK {
            k,
            entries: Vec::with_capacity(k + 1),
        }
    }

    fn full(&self) -> bool {
        self.entries.len() >= self.k
    }

    fn worst_score(&self) -> f32 {
        self.entries
            .iter()
            .map(|&(score, _)| score)
            .fold(f32::INFINITY, f32::min)
    }

    fn push(&mut self, score: f32, id: i32) {
        self.entries.push((score, id));
        if self.entries.len() > self.k {
            let evict = self
                .entries
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.entries.swap_remove(evict);
        }
    }

    fn into_sorted(mut self) -> Vec<(f32, i32)> {
        self.entries
            .sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        self.entries
    }
}

impl Model {
    pub fn new(args: &Args, osz: i32, seed: u64) -> Model {
        let hsz = args.dim;
        let mut t_sigmoid = Vec::with_capacity(SIGMOID_TABLE_SIZE + 1);
        for i in 0..=SIGMOID_TABLE_SIZE {
            let x = (i as f32 * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as f32 - MAX_SIGMOID;
            t_sigmoid.push(1.0 / (1.0 + (-x).exp()));
        }
        let mut t_log = Vec::with_capacity(LOG_TABLE_SIZE + 1);
        for i in 0..=LOG_TABLE_SIZE {
            let x = (i as f32 + 1e-5) / LOG_TABLE_SIZE as f32;
            t_log.push(x.ln());
        }
        Model {
            hidden: Vector::new(hsz as usize),
            output: Vector::new(osz as usize),
            grad: Vector::new(hsz as usize),
            osz,
            hsz,
            loss_value: 0.0,
            nexamples: 1,
            t_sigmoid,
            t_log,
            negatives: Vec::new(),
            negpos: 0,
            paths: Vec::new(),
            codes: Vec::new(),
            tree: Vec::new(),
            loss_kind: args.loss,
            model_kind: args.model,
            neg: args.neg,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn loss(&self) -> f32 {
        self.loss_value / self.nexamples as f32
    }

    /// Builds the negative table or the Huffman tree for the output classes.
    /// `counts` must hold one count per output row.
    pub fn set_target_counts(&mut self, counts: &[i64]) -> JamoTextResult<()> {
        if counts.len() as i32 != self.osz {
            return Err(JamoTextErrorKind::Model.with_error(anyhow::anyhow!(
                "Target count size {} does not match output size {}",
                counts.len(),
                self.osz
            )));
        }
        if counts.is_empty() {
            return Ok(());
        }
        if self.loss_kind == LossKind::NegativeSampling {
            self.init_table_negatives(counts);
        }
        if self.loss_kind == LossKind::HierarchicalSoftmax {
            self.build_tree(counts);
        }
        Ok(())
    }

    fn init_table_negatives(&mut self, counts: &[i64]) {
        let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
        self.negatives.clear();
        for (i, &count) in counts.iter().enumerate() {
            let c = (count as f64).sqrt();
            let reps = (c * NEGATIVE_TABLE_SIZE as f64 / z).ceil() as usize;
            for _ in 0..reps {
                self.negatives.push(i as i32);
            }
        }
        self.negatives.shuffle(&mut self.rng);
    }

    fn get_negative(&mut self, target: i32) -> i32 {
        loop {
            let negative = self.negatives[self.negpos];
            self.negpos = (self.negpos + 1) % self.negatives.len();
            if negative != target {
                return negative;
            }
        }
    }

    /// Two-pointer Huffman merge over the count-sorted leaves.
    fn build_tree(&mut self, counts: &[i64]) {
        let osz = self.osz;
        self.tree = vec![
            Node {
                parent: -1,
                left: -1,
                right: -1,
                count: 1_000_000_000_000_000,
                binary: false,
            };
            (2 * osz - 1) as usize
        ];
        for i in 0..osz as usize {
            self.tree[i].count = counts[i];
        }
        let mut leaf = osz - 1;
        let mut node = osz;
        for i in osz..2 * osz - 1 {
            let mut mini = [0i32; 2];
            for m in mini.iter_mut() {
                if leaf >= 0 && self.tree[leaf as usize].count < self.tree[node as usize].count {
                    *m = leaf;
                    leaf -= 1;
                } else {
                    *m = node;
                    node += 1;
                }
            }
            self.tree[i as usize].left = mini[0];
            self.tree[i as usize].right = mini[1];
            self.tree[i as usize].count =
                self.tree[mini[0] as usize].count + self.tree[mini[1] as usize].count;
            self.tree[mini[0] as usize].parent = i;
            self.tree[mini[1] as usize].parent = i;
            self.tree[mini[1] as usize].binary = true;
        }
        self.paths.clear();
        self.codes.clear();
        for i in 0..osz as usize {
            let mut path = Vec::new();
            let mut code = Vec::new();
            let mut j = i as i32;
            while self.tree[j as usize].parent != -1 {
                path.push(self.tree[j as usize].parent - osz);
                code.push(self.tree[j as usize].binary);
                j = self.tree[j as usize].parent;
            }
            self.paths.push(path);
            self.codes.push(code);
        }
    }

    fn sigmoid(&self, x: f32) -> f32 {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as f32 / MAX_SIGMOID / 2.0) as usize;
            self.t_sigmoid[i]
        }
    }

    fn log(&self, x: f32) -> f32 {
        if x > 1.0 {
            return 0.0;
        }
        let i = (x * LOG_TABLE_SIZE as f32) as usize;
        self.t_log[i]
    }

    fn std_log(x: f32) -> f32 {
        (x + 1e-5).ln()
    }

    /// Mean of the input rows.
    pub fn compute_hidden(
        input: &[i32],
        wi: &MatrixKind,
        hidden: &mut Vector,
    ) -> JamoTextResult<()> {
        hidden.zero();
        for &id in input {
            wi.add_to_vector(hidden, id as i64);
        }
        if !input.is_empty() {
            hidden.mul(1.0 / input.len() as f32);
        }
        Ok(())
    }

    fn binary_logistic(
        &mut self,
        wo: &mut Matrix,
        target: i32,
        label: bool,
        lr: f32,
    ) -> JamoTextResult<f32> {
        let score = self.sigmoid(wo.dot_row(&self.hidden, target as i64)?);
        let alpha = lr * (label as i32 as f32 - score);
        self.grad.add_row(wo, target as i64, alpha);
        wo.add_row(&self.hidden, target as i64, alpha);
        if label {
            Ok(-self.log(score))
        } else {
            Ok(-self.log(1.0 - score))
        }
    }

    fn negative_sampling(&mut self, wo: &mut Matrix, target: i32, lr: f32) -> JamoTextResult<f32> {
        let mut loss = 0.0;
        self.grad.zero();
        for n in 0..=self.neg {
            if n == 0 {
                loss += self.binary_logistic(wo, target, true, lr)?;
            } else {
                let negative = self.get_negative(target);
                loss += self.binary_logistic(wo, negative, false, lr)?;
            }
        }
        Ok(loss)
    }

    fn hierarchical_softmax(
        &mut self,
        wo: &mut Matrix,
        target: i32,
        lr: f32,
    ) -> JamoTextResult<f32> {
        let mut loss = 0.0;
        self.grad.zero();
        let path = self.paths[target as usize].clone();
        let code = self.codes[target as usize].clone();
        for (node, bit) in path.iter().zip(code.iter()) {
            loss += self.binary_logistic(wo, *node, *bit, lr)?;
        }
        Ok(loss)
    }

    fn softmax(&mut self, wo: &mut Matrix, target: i32, lr: f32) -> JamoTextResult<f32> {
        self.grad.zero();
        for i in 0..self.osz {
            self.output[i as usize] = wo.dot_row(&self.hidden, i as i64)?;
        }
        softmax_normalize(&mut self.output);
        for i in 0..self.osz {
            let label = if i == target { 1.0 } else { 0.0 };
            let alpha = lr * (label - self.output[i as usize]);
            self.grad.add_row(wo, i as i64, alpha);
            wo.add_row(&self.hidden, i as i64, alpha);
        }
        Ok(-self.log(self.output[target as usize]))
    }

    /// One SGD step: forward over `input`, backward through the configured
    /// loss, scatter-add of the gradient into the input rows.
    pub fn update(
        &mut self,
        wi: &mut Matrix,
        wo: &mut Matrix,
        input: &[i32],
        target: i32,
        lr: f32,
    ) -> JamoTextResult<()> {
        if target < 0 || target >= self.osz {
            return Err(JamoTextErrorKind::Model.with_error(anyhow::anyhow!(
                "Target id {} out of range [0, {})",
                target,
                self.osz
            )));
        }
        if input.is_empty() {
            return Ok(());
        }
        self.hidden.zero();
        for &id in input {
            self.hidden.add_row(wi, id as i64, 1.0);
        }
        self.hidden.mul(1.0 / input.len() as f32);

        let loss = match self.loss_kind {
            LossKind::NegativeSampling => self.negative_sampling(wo, target, lr)?,
            LossKind::HierarchicalSoftmax => self.hierarchical_softmax(wo, target, lr)?,
            LossKind::Softmax => self.softmax(wo, target, lr)?,
        };
        self.loss_value += loss;
        self.nexamples += 1;

        if self.model_kind == ModelKind::Supervised {
            self.grad.mul(1.0 / input.len() as f32);
        }
        for &id in input {
            wi.add_row(&self.grad, id as i64, 1.0);
        }
        Ok(())
    }

    /// Top-k labels by log-probability. Supervised models only.
    pub fn predict(
        &self,
        input: &[i32],
        k: i32,
        wi: &MatrixKind,
        wo: &MatrixKind,
    ) -> JamoTextResult<Vec<(f32, i32)>> {
        if k <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("k needs to be 1 or higher")));
        }
        if self.model_kind != ModelKind::Supervised {
            return Err(JamoTextErrorKind::Model.with_error(anyhow::anyhow!(
                "Model needs to be supervised for prediction"
            )));
        }
        let mut hidden = Vector::new(self.hsz as usize);
        Self::compute_hidden(input, wi, &mut hidden)?;
        let mut heap = TopK::new(k as usize);
        if self.loss_kind == LossKind::HierarchicalSoftmax {
            self.dfs(wo, 2 * self.osz - 2, 0.0, &mut heap, &hidden)?;
        } else {
            self.find_k_best(wo, &mut heap, &hidden)?;
        }
        Ok(heap.into_sorted())
    }

    fn find_k_best(
        &self,
        wo: &MatrixKind,
        heap: &mut TopK,
        hidden: &Vector,
    ) -> JamoTextResult<()> {
        let mut output = Vector::new(self.osz as usize);
        for i in 0..self.osz {
            output[i as usize] = wo.dot_row(hidden, i as i64)?;
        }
        softmax_normalize(&mut output);
        for i in 0..self.osz {
            let score = Self::std_log(output[i as usize]);
            if heap.full() && score < heap.worst_score() {
                continue;
            }
            heap.push(score, i);
        }
        Ok(())
    }

    /// Depth-first walk of the Huffman tree, pruning branches that cannot
    /// reach the current k-th best score.
    fn dfs(
        &self,
        wo: &MatrixKind,
        node: i32,
        score: f32,
        heap: &mut TopK,
        hidden: &Vector,
    ) -> JamoTextResult<()> {
        if heap.full() && score < heap.worst_score() {
            return Ok(());
        }
        let n = &self.tree[node as usize];
        if n.left == -1 && n.right == -1 {
            heap.push(score, node);
            return Ok(());
        }
        let raw = wo.dot_row(hidden, (node - self.osz) as i64)?;
        let f = 1.0 / (1.0 + (-raw).exp());
        let (left, right) = (n.left, n.right);
        self.dfs(wo, left, score + Self::std_log(1.0 - f), heap, hidden)?;
        self.dfs(wo, right, score + Self::std_log(f), heap, hidden)
    }
}

fn softmax_normalize(output: &mut Vector) {
    let mut max = output[0];
    for i in 1..output.len() {
        max = max.max(output[i]);
    }
    let mut z = 0.0;
    for i in 0..output.len() {
        output[i] = (output[i] - max).exp();
        z += output[i];
    }
    for i in 0..output.len() {
        output[i] /= z;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_args(loss: LossKind, model: ModelKind) -> Args {
        let mut args = Args::default();
        args.dim = 4;
        args.loss = loss;
        args.model = model;
        args.neg = 2;
        args
    }

    #[test]
    fn test_sigmoid_table() {
        let args = test_args(LossKind::NegativeSampling, ModelKind::Skipgram);
        let model = Model::new(&args, 3, 1);
        assert!((model.sigmoid(0.0) - 0.5).abs() < 1e-2);
        assert_eq!(model.sigmoid(-9.0), 0.0);
        assert_eq!(model.sigmoid(9.0), 1.0);
        assert!(model.sigmoid(2.0) > 0.85 && model.sigmoid(2.0) < 0.9);
    }

    #[test]
    fn test_log_table() {
        let args = test_args(LossKind::NegativeSampling, ModelKind::Skipgram);
        let model = Model::new(&args, 3, 1);
        assert_eq!(model.log(1.5), 0.0);
        assert!((model.log(1.0) - 0.0).abs() < 1e-2);
        assert!((model.log(0.5) - 0.5f32.ln()).abs() < 1e-2);
    }

    #[test]
    fn test_softmax_normalize() {
        let mut output = Vector::from_vec(vec![1.0, 2.0, 3.0]);
        softmax_normalize(&mut output);
        let sum: f32 = output.data().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(output[2] > output[1] && output[1] > output[0]);
    }

    #[test]
    fn test_huffman_tree_structure() {
        let args = test_args(LossKind::HierarchicalSoftmax, ModelKind::Supervised);
        let mut model = Model::new(&args, 4, 1);
        model.set_target_counts(&[40, 30, 20, 10]).unwrap();
        assert_eq!(model.tree.len(), 7);
        // root holds the total mass
        assert_eq!(model.tree[6].count, 100);
        // rarer leaves sit deeper
        assert!(model.paths[3].len() >= model.paths[0].len());
        for (path, code) in model.paths.iter().zip(&model.codes) {
            assert_eq!(path.len(), code.len());
            assert!(!path.is_empty());
            // inner node ids are offsets from osz
            for &p in path {
                assert!(p >= 0 && p < 3);
            }
        }
    }

    #[test]
    fn test_negative_table_skips_target() {
        let args = test_args(LossKind::NegativeSampling, ModelKind::Skipgram);
        let mut model = Model::new(&args, 3, 1);
        model.set_target_counts(&[100, 50, 25]).unwrap();
        assert!(model.negatives.len() >= NEGATIVE_TABLE_SIZE);
        for _ in 0..1000 {
            assert_ne!(model.get_negative(1), 1);
        }
    }

    #[test]
    fn test_set_target_counts_size_mismatch() {
        let args = test_args(LossKind::NegativeSampling, ModelKind::Skipgram);
        let mut model = Model::new(&args, 3, 1);
        assert!(model.set_target_counts(&[1, 2]).is_err());
    }

    #[test]
    fn test_update_moves_loss() {
        let args = test_args(LossKind::NegativeSampling, ModelKind::Skipgram);
        let mut model = Model::new(&args, 3, 1);
        model.set_target_counts(&[100, 50, 25]).unwrap();
        let mut wi = Matrix::new(5, 4);
        wi.uniform(0.25);
        let mut wo = Matrix::new(3, 4);
        let before = wi.row(0).to_vec();
        for _ in 0..10 {
            model.update(&mut wi, &mut wo, &[0, 2], 1, 0.1).unwrap();
        }
        assert!(model.loss() > 0.0);
        assert_ne!(wi.row(0), before.as_slice());
    }

    #[test]
    fn test_update_rejects_bad_target() {
        let args = test_args(LossKind::Softmax, ModelKind::Supervised);
        let mut model = Model::new(&args, 2, 1);
        let mut wi = Matrix::new(4, 4);
        let mut wo = Matrix::new(2, 4);
        assert!(model.update(&mut wi, &mut wo, &[0], 2, 0.1).is_err());
        assert!(model.update(&mut wi, &mut wo, &[0], -1, 0.1).is_err());
    }

    #[test]
    fn test_predict_orders_and_restricts() {
        let args = test_args(LossKind::Softmax, ModelKind::Supervised);
        let mut model = Model::new(&args, 3, 1);
        model.set_target_counts(&[5, 3, 2]).unwrap();
        let mut wi = Matrix::new(6, 4);
        wi.uniform(0.25);
        let mut wo = Matrix::new(3, 4);
        wo.uniform(0.25);
        // push class 1 up for this input
        for _ in 0..50 {
            model.update(&mut wi, &mut wo, &[0, 1], 1, 0.2).unwrap();
        }
        let wi = MatrixKind::Dense(wi);
        let wo = MatrixKind::Dense(wo);
        let predictions = model.predict(&[0, 1], 2, &wi, &wo).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].1, 1);
        assert!(predictions[0].0 >= predictions[1].0);

        assert!(model.predict(&[0], 0, &wi, &wo).is_err());
    }

    #[test]
    fn test_predict_requires_supervised() {
        let args = test_args(LossKind::Softmax, ModelKind::Skipgram);
        let model = Model::new(&args, 3, 1);
        let wi = MatrixKind::Dense(Matrix::new(4, 4));
        let wo = MatrixKind::Dense(Matrix::new(3, 4));
        assert!(model.predict(&[0], 1, &wi, &wo).is_err());
    }

    #[test]
    fn test_hs_predict_matches_probability_mass() {
        let args = test_args(LossKind::HierarchicalSoftmax, ModelKind::Supervised);
        let mut model = Model::new(&args, 4, 1);
        model.set_target_counts(&[10, 8, 4, 2]).unwrap();
        let mut wi = Matrix::new(6, 4);
        wi.uniform(0.25);
        let mut wo = Matrix::new(3, 4);
        for _ in 0..30 {
            model.update(&mut wi, &mut wo, &[2, 3], 0, 0.2).unwrap();
        }
        let wi = MatrixKind::Dense(wi);
        let wo = MatrixKind::Dense(wo);
        let predictions = model.predict(&[2, 3], 4, &wi, &wo).unwrap();
        assert_eq!(predictions.len(), 4);
        // leaf log-probabilities over the whole tree stay normalized
        let total: f32 = predictions.iter().map(|&(score, _)| score.exp()).sum();
        assert!((total - 1.0).abs() < 0.05, "total mass {}", total);
        assert_eq!(predictions[0].1, 0);
    }

    #[test]
    fn test_topk_tie_breaks_by_id() {
        let mut heap = TopK::new(2);
        heap.push(0.5, 3);
        heap.push(0.5, 1);
        heap.push(0.5, 2);
        let sorted = heap.into_sorted();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].1, 1);
        assert_eq!(sorted[1].1, 2);
    }
}
