//! High-level engine: training, persistence, vector queries, classification
//! and quantization over the core subsystems.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::info;

use jamotext_core::args::{Args, ModelKind};
use jamotext_core::dictionary::{Dictionary, EntryKind, EOS};
use jamotext_core::error::JamoTextErrorKind;
use jamotext_core::io::{read_bool, read_i32, write_bool, write_i32};
use jamotext_core::matrix::{Matrix, MatrixKind};
use jamotext_core::model::Model;
use jamotext_core::quant_matrix::QuantMatrix;
use jamotext_core::vector::Vector;
use jamotext_core::{JamoTextResult, MODEL_FILE_MAGIC, MODEL_FILE_VERSION};

use crate::trainer;

/// One predicted label with its probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub probability: f32,
}

/// Precision/recall aggregate over a labeled evaluation stream.
#[derive(Debug, Clone, Copy)]
pub struct TestMetrics {
    pub nexamples: i64,
    pub nlabels: i64,
    pub k: i32,
    correct: f64,
}

impl TestMetrics {
    pub fn precision(&self) -> f64 {
        if self.nexamples == 0 {
            return 0.0;
        }
        self.correct / (self.k as i64 * self.nexamples) as f64
    }

    pub fn recall(&self) -> f64 {
        if self.nlabels == 0 {
            return 0.0;
        }
        self.correct / self.nlabels as f64
    }
}

pub struct JamoText {
    args: Arc<Args>,
    dict: Dictionary,
    input: MatrixKind,
    output: MatrixKind,
    model: Model,
    word_bank: Option<Matrix>,
}

impl JamoText {
    /// Builds the dictionary from `args.input`, initializes the matrices and
    /// runs the parallel trainer.
    pub fn train(args: Args) -> JamoTextResult<JamoText> {
        Self::train_impl(args, None)
    }

    /// Like `train`, but workers stop between lines once `cancel` is set.
    /// An interrupted run returns an error and no model.
    pub fn train_with_cancel(args: Args, cancel: &AtomicBool) -> JamoTextResult<JamoText> {
        Self::train_impl(args, Some(cancel))
    }

    fn train_impl(mut args: Args, cancel: Option<&AtomicBool>) -> JamoTextResult<JamoText> {
        args.finalize()?;
        if args.input == "-" {
            return Err(JamoTextErrorKind::Io.with_error(anyhow::anyhow!(
                "training needs a seekable input file, not standard input"
            )));
        }
        let args = Arc::new(args);
        let mut dict = Dictionary::new(args.clone());
        let file = File::open(&args.input)
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        dict.read_from_file(&mut BufReader::new(file))?;

        let input = if args.pretrained_vectors.is_empty() {
            let mut input = Matrix::new(
                dict.nwords() as i64 + args.bucket as i64,
                args.dim as i64,
            );
            input.uniform(1.0 / args.dim as f32);
            input
        } else {
            load_pretrained_vectors(&args, &mut dict, &args.pretrained_vectors)?
        };
        let output_rows = match args.model {
            ModelKind::Supervised => dict.nlabels(),
            _ => dict.nwords(),
        } as i64;
        let output = Matrix::new(output_rows, args.dim as i64);

        let (input, output, loss) = trainer::train(&args, &dict, input, output, cancel)?;
        info!("Training finished, loss: {:.6}", loss);

        let model = Self::make_model(&args, &dict, output.rows() as i32)?;
        Ok(JamoText {
            args,
            dict,
            input: MatrixKind::Dense(input),
            output: MatrixKind::Dense(output),
            model,
            word_bank: None,
        })
    }

    fn make_model(args: &Args, dict: &Dictionary, osz: i32) -> JamoTextResult<Model> {
        let mut model = Model::new(args, osz, 0);
        let counts = match args.model {
            ModelKind::Supervised => dict.counts(EntryKind::Label),
            _ => dict.counts(EntryKind::Word),
        };
        model.set_target_counts(&counts)?;
        Ok(model)
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn dim(&self) -> i32 {
        self.args.dim
    }

    pub fn is_quantized(&self) -> bool {
        self.input.is_quantized()
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> JamoTextResult<()> {
        let file = File::create(path.as_ref())
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let mut writer = BufWriter::new(file);
        self.save_model_to_writer(&mut writer)
    }

    pub fn save_model_to_writer<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        write_i32(writer, MODEL_FILE_MAGIC)?;
        write_i32(writer, MODEL_FILE_VERSION)?;
        self.args.save(writer)?;
        self.dict.save(writer)?;
        write_bool(writer, self.input.is_quantized())?;
        match &self.input {
            MatrixKind::Dense(m) => m.save(writer)?,
            MatrixKind::Quantized(q) => q.save(writer)?,
        }
        write_bool(writer, self.args.qout)?;
        match &self.output {
            MatrixKind::Dense(m) => m.save(writer)?,
            MatrixKind::Quantized(q) => q.save(writer)?,
        }
        Ok(())
    }

    pub fn load_model<P: AsRef<Path>>(path: P) -> JamoTextResult<JamoText> {
        let file = File::open(path.as_ref())
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let mut reader = BufReader::new(file);
        Self::load_model_from_reader(&mut reader)
    }

    pub fn load_model_from_reader<R: Read>(reader: &mut R) -> JamoTextResult<JamoText> {
        let magic = read_i32(reader)?;
        if magic != MODEL_FILE_MAGIC {
            return Err(JamoTextErrorKind::Parse
                .with_error(anyhow::anyhow!("Invalid model file: bad magic {}", magic)));
        }
        let version = read_i32(reader)?;
        if version > MODEL_FILE_VERSION {
            return Err(JamoTextErrorKind::Parse.with_error(anyhow::anyhow!(
                "Model file version {} is newer than supported version {}",
                version,
                MODEL_FILE_VERSION
            )));
        }
        let mut args = Args::load(reader)?;
        // Supervised models before version 12 never carried char n-grams.
        if version == 11 && args.model == ModelKind::Supervised {
            args.maxn = 0;
        }
        let dict_args = Arc::new(args.clone());
        let dict = Dictionary::load(dict_args, reader)?;

        let quant_input = read_bool(reader)?;
        let input = if quant_input {
            MatrixKind::Quantized(QuantMatrix::load(reader)?)
        } else {
            MatrixKind::Dense(Matrix::load(reader)?)
        };
        if !quant_input && dict.is_pruned() {
            return Err(JamoTextErrorKind::Parse.with_error(anyhow::anyhow!(
                "Invalid model file: pruned dictionary with a dense input matrix"
            )));
        }
        args.qout = read_bool(reader)?;
        let output = if quant_input && args.qout {
            MatrixKind::Quantized(QuantMatrix::load(reader)?)
        } else {
            MatrixKind::Dense(Matrix::load(reader)?)
        };

        let args = Arc::new(args);
        let model = Self::make_model(&args, &dict, output.rows() as i32)?;
        Ok(JamoText {
            args,
            dict,
            input,
            output,
            model,
            word_bank: None,
        })
    }

    /// Writes the `<count> <dim>` header followed by one vector per word,
    /// floats formatted to five significant digits.
    pub fn save_vectors<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        writeln!(writer, "{} {}", self.dict.nwords(), self.args.dim)
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        for i in 0..self.dict.nwords() {
            let word = self.dict.word(i);
            let vec = self.word_vector(word);
            let mut line = String::with_capacity(16 * vec.len());
            line.push_str(word);
            for &value in vec.data() {
                line.push(' ');
                line.push_str(&format_g(value));
            }
            writeln!(writer, "{}", line)
                .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        }
        Ok(())
    }

    pub fn save_vectors_file<P: AsRef<Path>>(&self, path: P) -> JamoTextResult<()> {
        let file = File::create(path.as_ref())
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let mut writer = BufWriter::new(file);
        self.save_vectors(&mut writer)
    }

    /// Mean of the subword rows of `word`. Out-of-vocabulary words fall back
    /// to their n-grams alone; the zero vector when nothing matches.
    pub fn word_vector(&self, word: &str) -> Vector {
        let ngrams = self.dict.subwords(word);
        let mut vec = Vector::new(self.args.dim as usize);
        for &id in &ngrams {
            self.input.add_to_vector(&mut vec, id as i64);
        }
        if !ngrams.is_empty() {
            vec.mul(1.0 / ngrams.len() as f32);
        }
        vec
    }

    /// Sentence embedding. Supervised models average the line's input rows
    /// (zero for an empty line); unsupervised models average the normalized
    /// word vectors.
    pub fn sentence_vector(&self, text: &str) -> JamoTextResult<Vector> {
        let mut svec = Vector::new(self.args.dim as usize);
        if self.args.model == ModelKind::Supervised {
            let mut line = Vec::new();
            let mut labels = Vec::new();
            self.dict.get_line_labeled(
                &mut Cursor::new(text.as_bytes()),
                &mut line,
                &mut labels,
            )?;
            if line.is_empty() {
                return Ok(svec);
            }
            for &id in &line {
                self.input.add_to_vector(&mut svec, id as i64);
            }
            svec.mul(1.0 / line.len() as f32);
        } else {
            let mut count = 0;
            for word in text.split_whitespace() {
                let mut vec = self.word_vector(word);
                let norm = vec.norm();
                if norm > 0.0 {
                    vec.mul(1.0 / norm);
                    svec.add_vector(&vec, 1.0);
                    count += 1;
                }
            }
            if count > 0 {
                svec.mul(1.0 / count as f32);
            }
        }
        Ok(svec)
    }

    /// Cosine similarity of two sentence embeddings.
    pub fn sentence_similarity(&self, a: &str, b: &str) -> JamoTextResult<f32> {
        let va = self.sentence_vector(a)?;
        let vb = self.sentence_vector(b)?;
        let na = va.norm();
        let nb = vb.norm();
        if na == 0.0 || nb == 0.0 {
            return Ok(0.0);
        }
        let dot: f32 = va.data().iter().zip(vb.data()).map(|(x, y)| x * y).sum();
        Ok(dot / (na * nb))
    }

    /// Per-subword vectors with their n-gram strings, for diagnostics.
    pub fn ngram_vectors(&self, word: &str) -> JamoTextResult<Vec<(String, Vector)>> {
        let (ids, strings) = self.dict.subwords_with_strings(word);
        let rows = self.input.rows();
        let mut out = Vec::with_capacity(ids.len());
        for (&id, s) in ids.iter().zip(strings) {
            let mut vec = Vector::new(self.args.dim as usize);
            if id >= 0 && (id as i64) < rows {
                self.input.add_to_vector(&mut vec, id as i64);
            }
            out.push((s, vec));
        }
        Ok(out)
    }

    /// Nearest neighbors by cosine over the normalized word-vector bank.
    pub fn nn(&mut self, word: &str, k: i32) -> JamoTextResult<Vec<(f32, String)>> {
        if word.is_empty() {
            return Err(JamoTextErrorKind::Args.with_error(anyhow::anyhow!("Empty query word")));
        }
        if k <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("k needs to be 1 or higher")));
        }
        self.ensure_word_bank()?;
        let query = self.word_vector(word);
        let mut ban = HashSet::new();
        ban.insert(self.dict.normalize(word).into_owned());
        self.find_nn(&query, k, &ban)
    }

    /// `a - b + c` analogy query, excluding the three inputs.
    pub fn analogies(&mut self, k: i32, a: &str, b: &str, c: &str) -> JamoTextResult<Vec<(f32, String)>> {
        if a.is_empty() || b.is_empty() || c.is_empty() {
            return Err(JamoTextErrorKind::Args.with_error(anyhow::anyhow!("Empty query word")));
        }
        if k <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("k needs to be 1 or higher")));
        }
        self.ensure_word_bank()?;
        let mut query = Vector::new(self.args.dim as usize);
        query.add_vector(&self.word_vector(a), 1.0);
        query.add_vector(&self.word_vector(b), -1.0);
        query.add_vector(&self.word_vector(c), 1.0);
        let mut ban = HashSet::new();
        for word in [a, b, c] {
            ban.insert(self.dict.normalize(word).into_owned());
        }
        self.find_nn(&query, k, &ban)
    }

    /// Drops the precomputed vector bank; it is rebuilt on the next query.
    pub fn clear_word_bank(&mut self) {
        self.word_bank = None;
    }

    fn ensure_word_bank(&mut self) -> JamoTextResult<()> {
        if self.word_bank.is_some() {
            return Ok(());
        }
        let mut bank = Matrix::new(self.dict.nwords() as i64, self.args.dim as i64);
        for i in 0..self.dict.nwords() {
            let vec = self.word_vector(self.dict.word(i));
            let norm = vec.norm();
            if norm > 0.0 {
                bank.add_row(&vec, i as i64, 1.0 / norm);
            }
        }
        self.word_bank = Some(bank);
        Ok(())
    }

    fn find_nn(
        &self,
        query: &Vector,
        k: i32,
        ban: &HashSet<String>,
    ) -> JamoTextResult<Vec<(f32, String)>> {
        let bank = match &self.word_bank {
            Some(bank) => bank,
            None => {
                return Err(JamoTextErrorKind::Model
                    .with_error(anyhow::anyhow!("word vector bank not initialized")))
            }
        };
        let mut query_norm = query.norm();
        if query_norm.abs() < 1e-8 {
            query_norm = 1.0;
        }
        let mut scored: Vec<(f32, i32)> = Vec::with_capacity(self.dict.nwords() as usize);
        for i in 0..self.dict.nwords() {
            let dp = bank.dot_row(query, i as i64)? / query_norm;
            scored.push((dp, i));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut out = Vec::new();
        for (score, i) in scored {
            let word = self.dict.word(i);
            if ban.contains(word) {
                continue;
            }
            out.push((score, word.to_string()));
            if out.len() == k as usize {
                break;
            }
        }
        Ok(out)
    }

    /// Top-k labels for one line of text. Empty lines yield no predictions.
    pub fn predict_line(&self, text: &str, k: i32) -> JamoTextResult<Vec<Prediction>> {
        let mut line = Vec::new();
        let mut labels = Vec::new();
        self.dict
            .get_line_labeled(&mut Cursor::new(text.as_bytes()), &mut line, &mut labels)?;
        if line.is_empty() {
            return Ok(Vec::new());
        }
        let predictions = self.model.predict(&line, k, &self.input, &self.output)?;
        Ok(predictions
            .into_iter()
            .map(|(score, id)| Prediction {
                label: self.dict.label(id).to_string(),
                probability: score.exp(),
            })
            .collect())
    }

    /// Precision and recall at `k` over a labeled stream.
    pub fn test<R: BufRead + Seek>(&self, reader: &mut R, k: i32) -> JamoTextResult<TestMetrics> {
        let mut metrics = TestMetrics {
            nexamples: 0,
            nlabels: 0,
            k,
            correct: 0.0,
        };
        let mut line = Vec::new();
        let mut labels = Vec::new();
        loop {
            let at_eof = reader
                .fill_buf()
                .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?
                .is_empty();
            if at_eof {
                break;
            }
            self.dict.get_line_labeled(reader, &mut line, &mut labels)?;
            if labels.is_empty() || line.is_empty() {
                continue;
            }
            let predictions = self.model.predict(&line, k, &self.input, &self.output)?;
            for (_, id) in &predictions {
                if labels.contains(id) {
                    metrics.correct += 1.0;
                }
            }
            metrics.nexamples += 1;
            metrics.nlabels += labels.len() as i64;
        }
        Ok(metrics)
    }

    /// Rows kept by the quantization cutoff: the EOS row first, then rows by
    /// descending L2 norm, ties broken by id.
    fn select_embeddings(&self, cutoff: i32) -> JamoTextResult<Vec<i32>> {
        let dense = self.input.dense()?;
        let mut norms = Vector::new(dense.rows() as usize);
        dense.l2_norm_rows(&mut norms)?;
        let eos_id = self.dict.word_id(EOS);
        let mut idx: Vec<i32> = (0..dense.rows() as i32).collect();
        idx.sort_by(|&a, &b| {
            if a == eos_id {
                return Ordering::Less;
            }
            if b == eos_id {
                return Ordering::Greater;
            }
            norms[b as usize].total_cmp(&norms[a as usize]).then(a.cmp(&b))
        });
        idx.truncate(cutoff as usize);
        Ok(idx)
    }

    /// Replaces the dense matrices with product-quantized ones. Supervised
    /// models only; refuses to quantize twice. With a cutoff the input rows
    /// are pruned to the strongest embeddings first, optionally retraining.
    pub fn quantize(&mut self, qargs: &Args) -> JamoTextResult<()> {
        if self.args.model != ModelKind::Supervised {
            return Err(JamoTextErrorKind::Quantize.with_error(anyhow::anyhow!(
                "Only supervised models can be quantized"
            )));
        }
        if self.is_quantized() {
            return Err(JamoTextErrorKind::Quantize
                .with_error(anyhow::anyhow!("Model is already quantized")));
        }
        let mut args = (*self.args).clone();
        args.qout = qargs.qout;
        args.qnorm = qargs.qnorm;
        args.cutoff = qargs.cutoff;
        args.dsub = qargs.dsub;
        if !qargs.input.is_empty() {
            args.input = qargs.input.clone();
        }

        if qargs.cutoff > 0 && (qargs.cutoff as i64) < self.input.rows() {
            let mut idx = self.select_embeddings(qargs.cutoff)?;
            self.dict.prune(&mut idx);
            let dense = self.input.dense()?;
            let mut pruned = Matrix::new(idx.len() as i64, args.dim as i64);
            for (row, &id) in idx.iter().enumerate() {
                for j in 0..args.dim as i64 {
                    *pruned.at_mut(row as i64, j) = dense.at(id as i64, j);
                }
            }
            self.input = MatrixKind::Dense(pruned);
            if qargs.retrain {
                args.epoch = qargs.epoch;
                args.lr = qargs.lr;
                let input = std::mem::replace(&mut self.input, MatrixKind::Dense(Matrix::new(0, 0)));
                let output =
                    std::mem::replace(&mut self.output, MatrixKind::Dense(Matrix::new(0, 0)));
                let (input, output) = match (input, output) {
                    (MatrixKind::Dense(i), MatrixKind::Dense(o)) => (i, o),
                    _ => {
                        return Err(JamoTextErrorKind::Quantize
                            .with_error(anyhow::anyhow!("retraining needs dense matrices")))
                    }
                };
                let (input, output, loss) = trainer::train(&args, &self.dict, input, output, None)?;
                info!("Retraining finished, loss: {:.6}", loss);
                self.input = MatrixKind::Dense(input);
                self.output = MatrixKind::Dense(output);
            }
        }

        let qinput = QuantMatrix::new(self.input.dense()?, args.dsub, args.qnorm)?;
        self.input = MatrixKind::Quantized(qinput);
        if args.qout {
            let qoutput = QuantMatrix::new(self.output.dense()?, 2, args.qnorm)?;
            self.output = MatrixKind::Quantized(qoutput);
        }

        let args = Arc::new(args);
        self.model = Self::make_model(&args, &self.dict, self.output.rows() as i32)?;
        self.args = args;
        self.word_bank = None;
        Ok(())
    }
}

/// Reads a `<count> <dim>` vector text file, merges its words into the
/// dictionary and returns an input matrix seeded with the pretrained rows.
/// A header dimension that differs from `-dim` is fatal.
fn load_pretrained_vectors(
    args: &Args,
    dict: &mut Dictionary,
    path: &str,
) -> JamoTextResult<Matrix> {
    let file = File::open(path)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    let mut reader = BufReader::new(file);
    let mut header = String::new();
    reader
        .read_line(&mut header)
        .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
    let mut fields = header.split_whitespace();
    let n: i64 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            JamoTextErrorKind::Parse
                .with_error(anyhow::anyhow!("Invalid pretrained vectors header"))
        })?;
    let dim: i64 = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            JamoTextErrorKind::Parse
                .with_error(anyhow::anyhow!("Invalid pretrained vectors header"))
        })?;
    if dim != args.dim as i64 {
        return Err(JamoTextErrorKind::Parse.with_error(anyhow::anyhow!(
            "Dimension of pretrained vectors ({}) does not match dim ({})",
            dim,
            args.dim
        )));
    }

    let mut words: Vec<String> = Vec::with_capacity(n as usize);
    let mut pretrained = Matrix::new(n, dim);
    let mut line = String::new();
    for i in 0..n {
        line.clear();
        reader
            .read_line(&mut line)
            .map_err(|err| JamoTextErrorKind::Io.with_error(anyhow::anyhow!(err)))?;
        let mut fields = line.split_whitespace();
        let word = fields.next().ok_or_else(|| {
            JamoTextErrorKind::Parse
                .with_error(anyhow::anyhow!("Missing word on vector line {}", i + 1))
        })?;
        for j in 0..dim {
            let value: f32 = fields
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    JamoTextErrorKind::Parse.with_error(anyhow::anyhow!(
                        "Malformed vector for word {} on line {}",
                        word,
                        i + 1
                    ))
                })?;
            *pretrained.at_mut(i, j) = value;
        }
        words.push(word.to_string());
    }

    dict.absorb_pretrained(words.iter().cloned());

    let mut input = Matrix::new(dict.nwords() as i64 + args.bucket as i64, args.dim as i64);
    input.uniform(1.0 / args.dim as f32);
    for (i, word) in words.iter().enumerate() {
        let id = dict.word_id(word);
        if id < 0 || id >= dict.nwords() {
            continue;
        }
        for j in 0..dim {
            *input.at_mut(id as i64, j) = pretrained.at(i as i64, j);
        }
    }
    Ok(input)
}

/// `%g`-style formatting with five significant digits, trailing zeros
/// stripped.
pub fn format_g(value: f32) -> String {
    let v = value as f64;
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return format!("{}", v);
    }
    let sci = format!("{:.4e}", v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= 5 {
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let (sign, magnitude) = if exp < 0 { ('-', -exp) } else { ('+', exp) };
        format!("{}e{}{:02}", mantissa, sign, magnitude)
    } else {
        let decimals = (4 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, v);
        if fixed.contains('.') {
            fixed
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string()
        } else {
            fixed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_g_fixed() {
        assert_eq!(format_g(0.0), "0");
        assert_eq!(format_g(1.0), "1");
        assert_eq!(format_g(-0.5), "-0.5");
        assert_eq!(format_g(0.12345), "0.12345");
        assert_eq!(format_g(12345.6), "12346");
        assert_eq!(format_g(0.00012345), "0.00012345");
        assert_eq!(format_g(2.5), "2.5");
    }

    #[test]
    fn test_format_g_scientific() {
        assert_eq!(format_g(123456.0), "1.2346e+05");
        assert_eq!(format_g(0.000012345), "1.2345e-05");
        assert_eq!(format_g(-123456.0), "-1.2346e+05");
    }

    #[test]
    fn test_format_g_rounds_significant_digits() {
        assert_eq!(format_g(1.000004), "1");
        assert_eq!(format_g(0.999999), "1");
        assert_eq!(format_g(1.23456789), "1.2346");
    }
}
