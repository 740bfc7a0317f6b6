use std::io::{Read, Write};

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::JamoTextErrorKind;
use crate::io::{read_f32_into, read_i64, write_f32_slice, write_i64};
use crate::quant_matrix::QuantMatrix;
use crate::vector::Vector;
use crate::JamoTextResult;

// Matrix init has to be reproducible, so the fill always runs on a fresh
// generator with this seed.
const UNIFORM_SEED: u64 = 1;

/// Dense row-major f32 matrix. `input` is (nwords + bucket, dim), `output`
/// is (nwords, dim) or (nlabels, dim) for supervised models.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    m: i64,
    n: i64,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(m: i64, n: i64) -> Self {
        Matrix {
            m,
            n,
            data: vec![0.0; (m * n) as usize],
        }
    }

    pub fn rows(&self) -> i64 {
        self.m
    }

    pub fn cols(&self) -> i64 {
        self.n
    }

    pub fn at(&self, i: i64, j: i64) -> f32 {
        self.data[(i * self.n + j) as usize]
    }

    pub fn at_mut(&mut self, i: i64, j: i64) -> &mut f32 {
        &mut self.data[(i * self.n + j) as usize]
    }

    pub fn row(&self, i: i64) -> &[f32] {
        let start = (i * self.n) as usize;
        &self.data[start..start + self.n as usize]
    }

    pub fn row_mut(&mut self, i: i64) -> &mut [f32] {
        let start = (i * self.n) as usize;
        let n = self.n as usize;
        &mut self.data[start..start + n]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Fills the matrix from U(-a, a) in row-major order with a fixed seed.
    pub fn uniform(&mut self, a: f32) {
        let mut rng = StdRng::seed_from_u64(UNIFORM_SEED);
        let uniform = Uniform::new(-a, a);
        for value in &mut self.data {
            *value = uniform.sample(&mut rng);
        }
    }

    /// row_i += a * vec
    pub fn add_row(&mut self, vec: &Vector, i: i64, a: f32) {
        debug_assert_eq!(vec.len() as i64, self.n);
        for (dst, src) in self.row_mut(i).iter_mut().zip(vec.data()) {
            *dst += a * src;
        }
    }

    /// row_i . vec
    pub fn dot_row(&self, vec: &Vector, i: i64) -> JamoTextResult<f32> {
        debug_assert_eq!(vec.len() as i64, self.n);
        let d: f32 = self
            .row(i)
            .iter()
            .zip(vec.data())
            .map(|(a, b)| a * b)
            .sum();
        if d.is_nan() {
            return Err(JamoTextErrorKind::Numeric
                .with_error(anyhow::anyhow!("Encountered NaN in dot_row, row {}", i)));
        }
        Ok(d)
    }

    /// Scales rows `ib..ie` by the matching entries of `scales`. Zero scales
    /// leave the row untouched.
    pub fn multiply_row(&mut self, scales: &Vector, ib: i64, ie: i64) {
        for i in ib..ie {
            let s = scales[(i - ib) as usize];
            if s != 0.0 {
                for value in self.row_mut(i) {
                    *value *= s;
                }
            }
        }
    }

    /// Divides rows `ib..ie` by the matching entries of `scales`. Zero
    /// denominators leave the row untouched.
    pub fn divide_row(&mut self, scales: &Vector, ib: i64, ie: i64) {
        for i in ib..ie {
            let s = scales[(i - ib) as usize];
            if s != 0.0 {
                for value in self.row_mut(i) {
                    *value /= s;
                }
            }
        }
    }

    pub fn l2_norm_row(&self, i: i64) -> JamoTextResult<f32> {
        let norm: f32 = self.row(i).iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm.is_nan() {
            return Err(JamoTextErrorKind::Numeric
                .with_error(anyhow::anyhow!("Encountered NaN in l2_norm_row, row {}", i)));
        }
        Ok(norm)
    }

    pub fn l2_norm_rows(&self, norms: &mut Vector) -> JamoTextResult<()> {
        debug_assert_eq!(norms.len() as i64, self.m);
        for i in 0..self.m {
            norms[i as usize] = self.l2_norm_row(i)?;
        }
        Ok(())
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        write_i64(writer, self.m)?;
        write_i64(writer, self.n)?;
        write_f32_slice(writer, &self.data)
    }

    pub fn load<R: Read>(reader: &mut R) -> JamoTextResult<Matrix> {
        let m = read_i64(reader)?;
        let n = read_i64(reader)?;
        if m < 0 || n < 0 {
            return Err(JamoTextErrorKind::Deserialize
                .with_error(anyhow::anyhow!("Invalid matrix shape: {}x{}", m, n)));
        }
        let mut data = vec![0.0f32; (m * n) as usize];
        read_f32_into(reader, &mut data)?;
        Ok(Matrix { m, n, data })
    }
}

/// Storage of a model matrix. Training always runs on `Dense`; after
/// quantization inference dispatches through this so row lookups never
/// materialize quantized rows.
#[derive(Debug, Clone)]
pub enum MatrixKind {
    Dense(Matrix),
    Quantized(QuantMatrix),
}

impl MatrixKind {
    pub fn rows(&self) -> i64 {
        match self {
            MatrixKind::Dense(m) => m.rows(),
            MatrixKind::Quantized(q) => q.rows(),
        }
    }

    pub fn cols(&self) -> i64 {
        match self {
            MatrixKind::Dense(m) => m.cols(),
            MatrixKind::Quantized(q) => q.cols(),
        }
    }

    pub fn dot_row(&self, vec: &Vector, i: i64) -> JamoTextResult<f32> {
        match self {
            MatrixKind::Dense(m) => m.dot_row(vec, i),
            MatrixKind::Quantized(q) => q.dot_row(vec, i),
        }
    }

    /// vec += row_i (decoded for quantized storage).
    pub fn add_to_vector(&self, vec: &mut Vector, i: i64) {
        match self {
            MatrixKind::Dense(m) => vec.add_row(m, i, 1.0),
            MatrixKind::Quantized(q) => q.add_to_vector(vec, i),
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, MatrixKind::Quantized(_))
    }

    /// The dense matrix, or an unsupported-operation error for quantized
    /// storage. Mutating row ops and norms only exist on dense matrices.
    pub fn dense(&self) -> JamoTextResult<&Matrix> {
        match self {
            MatrixKind::Dense(m) => Ok(m),
            MatrixKind::Quantized(_) => Err(JamoTextErrorKind::Matrix.with_error(
                anyhow::anyhow!("Operation not supported on a quantized matrix"),
            )),
        }
    }

    pub fn dense_mut(&mut self) -> JamoTextResult<&mut Matrix> {
        match self {
            MatrixKind::Dense(m) => Ok(m),
            MatrixKind::Quantized(_) => Err(JamoTextErrorKind::Matrix.with_error(
                anyhow::anyhow!("Operation not supported on a quantized matrix"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_uniform_is_deterministic() {
        let mut a = Matrix::new(4, 3);
        let mut b = Matrix::new(4, 3);
        a.uniform(0.1);
        b.uniform(0.1);
        assert_eq!(a, b);
        assert!(a.data().iter().all(|v| v.abs() <= 0.1));
        assert!(a.data().iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_add_and_dot_row() {
        let mut m = Matrix::new(2, 3);
        let vec = Vector::from_vec(vec![1.0, 2.0, 3.0]);
        m.add_row(&vec, 1, 2.0);
        assert_eq!(m.row(1), &[2.0, 4.0, 6.0]);
        let d = m.dot_row(&vec, 1).unwrap();
        assert!((d - (2.0 + 8.0 + 18.0)).abs() < 1e-6);
        assert_eq!(m.dot_row(&vec, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_dot_row_rejects_nan() {
        let mut m = Matrix::new(1, 2);
        *m.at_mut(0, 0) = f32::NAN;
        let vec = Vector::from_vec(vec![1.0, 1.0]);
        assert!(m.dot_row(&vec, 0).is_err());
        assert!(m.l2_norm_row(0).is_err());
    }

    #[test]
    fn test_divide_and_multiply_row() {
        let mut m = Matrix::new(2, 2);
        let vec = Vector::from_vec(vec![2.0, 4.0]);
        m.add_row(&vec, 0, 1.0);
        m.add_row(&vec, 1, 1.0);
        let scales = Vector::from_vec(vec![2.0, 0.0]);
        m.divide_row(&scales, 0, 2);
        assert_eq!(m.row(0), &[1.0, 2.0]);
        // zero scale leaves the row alone
        assert_eq!(m.row(1), &[2.0, 4.0]);
        m.multiply_row(&scales, 0, 2);
        assert_eq!(m.row(0), &[2.0, 4.0]);
        assert_eq!(m.row(1), &[2.0, 4.0]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut m = Matrix::new(3, 2);
        m.uniform(0.5);
        let mut buffer = Vec::new();
        m.save(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 16 + 3 * 2 * 4);
        let loaded = Matrix::load(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(m, loaded);
    }
}
