use std::io::{Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{JamoTextError, JamoTextErrorKind};
use crate::io::{read_f64, read_i32, write_f64, write_i32};
use crate::JamoTextResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "cbow")]
    Cbow,
    #[serde(rename = "skipgram")]
    Skipgram,
    #[serde(rename = "supervised")]
    Supervised,
}

impl ModelKind {
    pub fn to_wire(self) -> i32 {
        match self {
            ModelKind::Cbow => 1,
            ModelKind::Skipgram => 2,
            ModelKind::Supervised => 3,
        }
    }

    pub fn from_wire(value: i32) -> JamoTextResult<Self> {
        match value {
            1 => Ok(ModelKind::Cbow),
            2 => Ok(ModelKind::Skipgram),
            3 => Ok(ModelKind::Supervised),
            _ => Err(JamoTextErrorKind::Deserialize
                .with_error(anyhow::anyhow!("Unknown model id: {}", value))),
        }
    }
}

impl FromStr for ModelKind {
    type Err = JamoTextError;

    fn from_str(name: &str) -> Result<ModelKind, Self::Err> {
        match name {
            "cbow" => Ok(ModelKind::Cbow),
            "sg" | "skipgram" => Ok(ModelKind::Skipgram),
            "sup" | "supervised" => Ok(ModelKind::Supervised),
            _ => Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("Unknown model name: {}", name))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    #[serde(rename = "hs")]
    HierarchicalSoftmax,
    #[serde(rename = "ns")]
    NegativeSampling,
    #[serde(rename = "softmax")]
    Softmax,
}

impl LossKind {
    pub fn to_wire(self) -> i32 {
        match self {
            LossKind::HierarchicalSoftmax => 1,
            LossKind::NegativeSampling => 2,
            LossKind::Softmax => 3,
        }
    }

    pub fn from_wire(value: i32) -> JamoTextResult<Self> {
        match value {
            1 => Ok(LossKind::HierarchicalSoftmax),
            2 => Ok(LossKind::NegativeSampling),
            3 => Ok(LossKind::Softmax),
            _ => Err(JamoTextErrorKind::Deserialize
                .with_error(anyhow::anyhow!("Unknown loss id: {}", value))),
        }
    }
}

impl FromStr for LossKind {
    type Err = JamoTextError;

    fn from_str(name: &str) -> Result<LossKind, Self::Err> {
        match name {
            "hs" => Ok(LossKind::HierarchicalSoftmax),
            "ns" => Ok(LossKind::NegativeSampling),
            "softmax" => Ok(LossKind::Softmax),
            _ => {
                Err(JamoTextErrorKind::Args
                    .with_error(anyhow::anyhow!("Unknown loss name: {}", name)))
            }
        }
    }
}

/// Training and quantization configuration. Frozen before workers start.
///
/// Only the fields up to `t` travel in the binary model header; the rest are
/// runtime-only knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Args {
    pub input: String,
    pub output: String,
    pub lr: f64,
    pub lr_update_rate: i32,
    pub dim: i32,
    pub ws: i32,
    pub epoch: i32,
    pub min_count: i32,
    pub min_count_label: i32,
    pub neg: i32,
    pub word_ngrams: i32,
    pub loss: LossKind,
    pub model: ModelKind,
    pub bucket: i32,
    pub minn: i32,
    pub maxn: i32,
    pub thread: i32,
    pub t: f64,
    pub label: String,
    pub verbose: i32,
    pub pretrained_vectors: String,
    pub qout: bool,
    pub qnorm: bool,
    pub retrain: bool,
    pub cutoff: i32,
    pub dsub: i32,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            input: String::new(),
            output: String::new(),
            lr: 0.05,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            loss: LossKind::NegativeSampling,
            model: ModelKind::Skipgram,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: 12,
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            pretrained_vectors: String::new(),
            qout: false,
            qnorm: false,
            retrain: false,
            cutoff: 0,
            dsub: 2,
        }
    }
}

impl Args {
    /// Defaults for supervised classification. The subword machinery is off
    /// and every token is kept.
    pub fn supervised() -> Self {
        Args {
            model: ModelKind::Supervised,
            loss: LossKind::Softmax,
            min_count: 1,
            minn: 0,
            maxn: 0,
            lr: 0.1,
            ..Args::default()
        }
    }

    /// Validates argument ranges and resolves derived values. Must run once
    /// before the dictionary is built.
    pub fn finalize(&mut self) -> JamoTextResult<()> {
        self.validate()?;
        if self.word_ngrams <= 1 && self.maxn == 0 {
            self.bucket = 0;
        }
        Ok(())
    }

    pub fn validate(&self) -> JamoTextResult<()> {
        if self.dim <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("dim must be positive: {}", self.dim)));
        }
        if self.ws <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("ws must be positive: {}", self.ws)));
        }
        if self.epoch <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("epoch must be positive: {}", self.epoch)));
        }
        if self.neg < 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("neg must not be negative: {}", self.neg)));
        }
        if self.thread <= 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("thread must be positive: {}", self.thread)));
        }
        if self.lr <= 0.0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("lr must be positive: {}", self.lr)));
        }
        if self.t <= 0.0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("t must be positive: {}", self.t)));
        }
        if self.minn < 0 || self.maxn < self.minn {
            return Err(JamoTextErrorKind::Args.with_error(anyhow::anyhow!(
                "invalid subword range: minn={} maxn={}",
                self.minn,
                self.maxn
            )));
        }
        if self.bucket < 0 {
            return Err(JamoTextErrorKind::Args
                .with_error(anyhow::anyhow!("bucket must not be negative: {}", self.bucket)));
        }
        Ok(())
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        write_i32(writer, self.dim)?;
        write_i32(writer, self.ws)?;
        write_i32(writer, self.epoch)?;
        write_i32(writer, self.min_count)?;
        write_i32(writer, self.neg)?;
        write_i32(writer, self.word_ngrams)?;
        write_i32(writer, self.loss.to_wire())?;
        write_i32(writer, self.model.to_wire())?;
        write_i32(writer, self.bucket)?;
        write_i32(writer, self.minn)?;
        write_i32(writer, self.maxn)?;
        write_i32(writer, self.lr_update_rate)?;
        write_f64(writer, self.t)
    }

    pub fn load<R: Read>(reader: &mut R) -> JamoTextResult<Args> {
        let mut args = Args::default();
        args.dim = read_i32(reader)?;
        args.ws = read_i32(reader)?;
        args.epoch = read_i32(reader)?;
        args.min_count = read_i32(reader)?;
        args.neg = read_i32(reader)?;
        args.word_ngrams = read_i32(reader)?;
        args.loss = LossKind::from_wire(read_i32(reader)?)?;
        args.model = ModelKind::from_wire(read_i32(reader)?)?;
        args.bucket = read_i32(reader)?;
        args.minn = read_i32(reader)?;
        args.maxn = read_i32(reader)?;
        args.lr_update_rate = read_i32(reader)?;
        args.t = read_f64(reader)?;
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_model_loss_names() {
        assert_eq!(ModelKind::from_str("sg").unwrap(), ModelKind::Skipgram);
        assert_eq!(ModelKind::from_str("cbow").unwrap(), ModelKind::Cbow);
        assert_eq!(
            ModelKind::from_str("supervised").unwrap(),
            ModelKind::Supervised
        );
        assert!(ModelKind::from_str("glove").is_err());

        assert_eq!(LossKind::from_str("hs").unwrap(), LossKind::HierarchicalSoftmax);
        assert_eq!(LossKind::from_str("ns").unwrap(), LossKind::NegativeSampling);
        assert_eq!(LossKind::from_str("softmax").unwrap(), LossKind::Softmax);
        assert!(LossKind::from_str("nce").is_err());
    }

    #[test]
    fn test_supervised_defaults() {
        let args = Args::supervised();
        assert_eq!(args.model, ModelKind::Supervised);
        assert_eq!(args.loss, LossKind::Softmax);
        assert_eq!(args.min_count, 1);
        assert_eq!(args.minn, 0);
        assert_eq!(args.maxn, 0);
        assert!((args.lr - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finalize_clears_bucket_without_subwords() {
        let mut args = Args::supervised();
        args.finalize().unwrap();
        assert_eq!(args.bucket, 0);

        let mut args = Args::supervised();
        args.word_ngrams = 2;
        args.finalize().unwrap();
        assert_eq!(args.bucket, 2_000_000);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut args = Args::default();
        args.dim = 0;
        assert!(args.validate().is_err());

        let mut args = Args::default();
        args.minn = 4;
        args.maxn = 3;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_header_round_trip() {
        let mut args = Args::default();
        args.dim = 64;
        args.loss = LossKind::HierarchicalSoftmax;
        args.model = ModelKind::Cbow;
        args.t = 5e-5;

        let mut buffer = Vec::new();
        args.save(&mut buffer).unwrap();
        // 12 ints and one double
        assert_eq!(buffer.len(), 12 * 4 + 8);

        let loaded = Args::load(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(loaded.dim, 64);
        assert_eq!(loaded.loss, LossKind::HierarchicalSoftmax);
        assert_eq!(loaded.model, ModelKind::Cbow);
        assert!((loaded.t - 5e-5).abs() < 1e-12);
    }
}
