use std::io::{Read, Write};

use crate::error::JamoTextErrorKind;
use crate::io::{
    read_bool, read_bytes, read_i32, read_i64, write_bool, write_bytes, write_i32, write_i64,
};
use crate::matrix::Matrix;
use crate::product_quantizer::ProductQuantizer;
use crate::vector::Vector;
use crate::JamoTextResult;

/// Product-quantized matrix. Each row is `nsubq` code bytes; with `qnorm`
/// the rows are L2-normalized before coding and the norm travels as one
/// extra byte per row through a 1-dimensional quantizer.
#[derive(Debug, Clone)]
pub struct QuantMatrix {
    qnorm: bool,
    m: i64,
    n: i64,
    codesize: i32,
    codes: Vec<u8>,
    pq: ProductQuantizer,
    norm_codes: Vec<u8>,
    npq: Option<ProductQuantizer>,
}

impl QuantMatrix {
    pub fn new(mat: &Matrix, dsub: i32, qnorm: bool) -> JamoTextResult<QuantMatrix> {
        let m = mat.rows();
        let n = mat.cols();
        let codesize = (m * ((n + dsub as i64 - 1) / dsub as i64)) as i32;
        let mut pq = ProductQuantizer::new(n as i32, dsub);
        let mut codes = vec![0u8; codesize as usize];

        let mut temp = mat.clone();
        let mut norm_codes = Vec::new();
        let mut npq = None;
        if qnorm {
            let mut norms = Vector::new(m as usize);
            temp.l2_norm_rows(&mut norms)?;
            temp.divide_row(&norms, 0, m);

            let mut quantizer = ProductQuantizer::new(1, 1);
            quantizer.train(m as i32, norms.data())?;
            norm_codes = vec![0u8; m as usize];
            quantizer.compute_codes(norms.data(), &mut norm_codes, m as i32);
            npq = Some(quantizer);
        }

        pq.train(m as i32, temp.data())?;
        pq.compute_codes(temp.data(), &mut codes, m as i32);

        Ok(QuantMatrix {
            qnorm,
            m,
            n,
            codesize,
            codes,
            pq,
            norm_codes,
            npq,
        })
    }

    pub fn rows(&self) -> i64 {
        self.m
    }

    pub fn cols(&self) -> i64 {
        self.n
    }

    fn norm(&self, i: i64) -> f32 {
        match &self.npq {
            Some(npq) => npq.centroid(0, self.norm_codes[i as usize])[0],
            None => 1.0,
        }
    }

    pub fn dot_row(&self, vec: &Vector, i: i64) -> JamoTextResult<f32> {
        debug_assert_eq!(vec.len() as i64, self.n);
        let d = self.pq.mul_code(vec, &self.codes, i, self.norm(i));
        if d.is_nan() {
            return Err(JamoTextErrorKind::Numeric
                .with_error(anyhow::anyhow!("Encountered NaN in dot_row, row {}", i)));
        }
        Ok(d)
    }

    /// vec += decoded row i
    pub fn add_to_vector(&self, vec: &mut Vector, i: i64) {
        self.pq.add_code(vec, &self.codes, i, self.norm(i));
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        write_bool(writer, self.qnorm)?;
        write_i64(writer, self.m)?;
        write_i64(writer, self.n)?;
        write_i32(writer, self.codesize)?;
        write_bytes(writer, &self.codes)?;
        self.pq.save(writer)?;
        if self.qnorm {
            write_bytes(writer, &self.norm_codes)?;
            match &self.npq {
                Some(npq) => npq.save(writer)?,
                None => {
                    return Err(JamoTextErrorKind::Serialize
                        .with_error(anyhow::anyhow!("qnorm set without a norm quantizer")))
                }
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(reader: &mut R) -> JamoTextResult<QuantMatrix> {
        let qnorm = read_bool(reader)?;
        let m = read_i64(reader)?;
        let n = read_i64(reader)?;
        let codesize = read_i32(reader)?;
        if m < 0 || n < 0 || codesize < 0 {
            return Err(JamoTextErrorKind::Deserialize.with_error(anyhow::anyhow!(
                "Invalid quantized matrix header: m={} n={} codesize={}",
                m,
                n,
                codesize
            )));
        }
        let codes = read_bytes(reader, codesize as usize)?;
        let pq = ProductQuantizer::load(reader)?;
        let mut norm_codes = Vec::new();
        let mut npq = None;
        if qnorm {
            norm_codes = read_bytes(reader, m as usize)?;
            npq = Some(ProductQuantizer::load(reader)?);
        }
        Ok(QuantMatrix {
            qnorm,
            m,
            n,
            codesize,
            codes,
            pq,
            norm_codes,
            npq,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_matrix() -> Matrix {
        let mut mat = Matrix::new(300, 4);
        for i in 0..300 {
            for j in 0..4 {
                *mat.at_mut(i, j) = ((i as f32) * 0.01 + j as f32).sin();
            }
        }
        mat
    }

    #[test]
    fn test_quantized_dot_tracks_dense() {
        let mat = sample_matrix();
        let qmat = QuantMatrix::new(&mat, 2, true).unwrap();
        let vec = Vector::from_vec(vec![0.3, -0.7, 1.1, 0.5]);
        let mut worst = 0.0f32;
        for i in 0..mat.rows() {
            let dense = mat.dot_row(&vec, i).unwrap();
            let quant = qmat.dot_row(&vec, i).unwrap();
            worst = worst.max((dense - quant).abs());
        }
        assert!(worst < 0.3, "quantization drift {}", worst);
    }

    #[test]
    fn test_add_to_vector_shape() {
        let mat = sample_matrix();
        let qmat = QuantMatrix::new(&mat, 2, false).unwrap();
        let mut vec = Vector::new(4);
        qmat.add_to_vector(&mut vec, 12);
        assert!(vec.data().iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_save_load_round_trip() {
        let mat = sample_matrix();
        let qmat = QuantMatrix::new(&mat, 2, true).unwrap();

        let mut buffer = Vec::new();
        qmat.save(&mut buffer).unwrap();
        let loaded = QuantMatrix::load(&mut Cursor::new(buffer)).unwrap();

        assert_eq!(loaded.m, qmat.m);
        assert_eq!(loaded.n, qmat.n);
        assert_eq!(loaded.codes, qmat.codes);
        assert_eq!(loaded.norm_codes, qmat.norm_codes);

        let vec = Vector::from_vec(vec![1.0, 0.0, -1.0, 2.0]);
        for i in [0i64, 150, 299] {
            let a = qmat.dot_row(&vec, i).unwrap();
            let b = loaded.dot_row(&vec, i).unwrap();
            assert_eq!(a, b);
        }
    }
}
