//! Product quantization of matrix rows.
//!
//! Rows are cut into `nsubq` slices of width `dsub` (the final slice keeps
//! the remainder width) and each slice is coded against 256 k-means
//! centroids, one byte per slice.

use std::io::{Read, Write};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::JamoTextErrorKind;
use crate::io::{read_f32_into, read_i32, write_f32_slice, write_i32};
use crate::vector::Vector;
use crate::JamoTextResult;

const NBITS: usize = 8;
const KSUB: usize = 1 << NBITS;
const MAX_POINTS_PER_CLUSTER: usize = 256;
const MAX_POINTS: usize = MAX_POINTS_PER_CLUSTER * KSUB;
const SEED: u64 = 1234;
const NITER: usize = 25;
const EPS: f32 = 1e-7;

#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dim: i32,
    nsubq: i32,
    dsub: i32,
    lastdsub: i32,
    centroids: Vec<f32>,
    rng: StdRng,
}

fn dist_l2(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}

fn assign_centroid(x: &[f32], centroids: &[f32], d: usize) -> u8 {
    let mut best = 0u8;
    let mut dmin = dist_l2(x, &centroids[..d]);
    for k in 1..KSUB {
        let dist = dist_l2(x, &centroids[k * d..(k + 1) * d]);
        if dist < dmin {
            dmin = dist;
            best = k as u8;
        }
    }
    best
}

fn e_step(x: &[f32], centroids: &[f32], codes: &mut [u8], d: usize, n: usize) {
    for i in 0..n {
        codes[i] = assign_centroid(&x[i * d..(i + 1) * d], centroids, d);
    }
}

fn m_step(rng: &mut StdRng, x: &[f32], centroids: &mut [f32], codes: &[u8], d: usize, n: usize) {
    let mut nelts = vec![0i32; KSUB];
    centroids.fill(0.0);
    for i in 0..n {
        let k = codes[i] as usize;
        for j in 0..d {
            centroids[k * d + j] += x[i * d + j];
        }
        nelts[k] += 1;
    }
    for k in 0..KSUB {
        let z = nelts[k] as f32;
        if z != 0.0 {
            for j in 0..d {
                centroids[k * d + j] /= z;
            }
        }
    }
    // Empty clusters steal a heavy centroid, picked by rejection sampling
    // weighted with cluster size, and both copies are nudged apart so the
    // next E-step can separate them.
    for k in 0..KSUB {
        if nelts[k] != 0 {
            continue;
        }
        let mut m = 0usize;
        while rng.gen::<f32>() * (n - KSUB) as f32 >= (nelts[m] - 1) as f32 {
            m = (m + 1) % KSUB;
        }
        let (src, dst) = (m * d, k * d);
        for j in 0..d {
            centroids[dst + j] = centroids[src + j];
        }
        for j in 0..d {
            let sign = ((j % 2) as f32) * 2.0 - 1.0;
            centroids[dst + j] += sign * EPS;
            centroids[src + j] -= sign * EPS;
        }
        nelts[k] = nelts[m] / 2;
        nelts[m] -= nelts[k];
    }
}

fn kmeans(rng: &mut StdRng, x: &[f32], centroids: &mut [f32], n: usize, d: usize) {
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    for i in 0..KSUB {
        centroids[i * d..(i + 1) * d].copy_from_slice(&x[perm[i] * d..perm[i] * d + d]);
    }
    let mut codes = vec![0u8; n];
    for _ in 0..NITER {
        e_step(x, centroids, &mut codes, d, n);
        m_step(rng, x, centroids, &codes, d, n);
    }
}

impl ProductQuantizer {
    pub fn new(dim: i32, dsub: i32) -> Self {
        let nsubq = dim / dsub + (dim % dsub != 0) as i32;
        let mut lastdsub = dim % dsub;
        if lastdsub == 0 {
            lastdsub = dsub;
        }
        ProductQuantizer {
            dim,
            nsubq,
            dsub,
            lastdsub,
            centroids: vec![0.0; dim as usize * KSUB],
            rng: StdRng::seed_from_u64(SEED),
        }
    }

    pub fn dim(&self) -> i32 {
        self.dim
    }

    pub fn nsubq(&self) -> i32 {
        self.nsubq
    }

    fn subq_width(&self, m: usize) -> usize {
        if m as i32 == self.nsubq - 1 {
            self.lastdsub as usize
        } else {
            self.dsub as usize
        }
    }

    /// Centroid `i` of sub-quantizer `m`.
    pub fn centroid(&self, m: usize, i: u8) -> &[f32] {
        let d = self.subq_width(m);
        let start = m * KSUB * self.dsub as usize + i as usize * d;
        &self.centroids[start..start + d]
    }

    /// Trains one sub-quantizer per slice over at most 65536 shuffled rows.
    pub fn train(&mut self, n: i32, x: &[f32]) -> JamoTextResult<()> {
        if n < KSUB as i32 {
            return Err(JamoTextErrorKind::Quantize.with_error(anyhow::anyhow!(
                "Matrix too small for quantization. Must have at least {} rows",
                KSUB
            )));
        }
        let n = n as usize;
        let dim = self.dim as usize;
        let dsub = self.dsub as usize;
        let nsubq = self.nsubq as usize;
        let np = n.min(MAX_POINTS);
        let mut perm: Vec<usize> = (0..n).collect();
        let mut slice = vec![0.0f32; np * dsub];
        for m in 0..nsubq {
            let d = self.subq_width(m);
            if np != n {
                perm.shuffle(&mut self.rng);
            }
            for (j, &p) in perm.iter().take(np).enumerate() {
                let src = p * dim + m * dsub;
                slice[j * d..(j + 1) * d].copy_from_slice(&x[src..src + d]);
            }
            let start = m * KSUB * dsub;
            kmeans(
                &mut self.rng,
                &slice[..np * d],
                &mut self.centroids[start..start + KSUB * d],
                np,
                d,
            );
        }
        Ok(())
    }

    /// Codes one row of `dim` values, one byte per sub-quantizer.
    pub fn compute_code(&self, x: &[f32], code: &mut [u8]) {
        let dsub = self.dsub as usize;
        for m in 0..self.nsubq as usize {
            let d = self.subq_width(m);
            let start = m * KSUB * dsub;
            code[m] = assign_centroid(
                &x[m * dsub..m * dsub + d],
                &self.centroids[start..start + KSUB * d],
                d,
            );
        }
    }

    pub fn compute_codes(&self, x: &[f32], codes: &mut [u8], n: i32) {
        let dim = self.dim as usize;
        let nsubq = self.nsubq as usize;
        for i in 0..n as usize {
            self.compute_code(&x[i * dim..(i + 1) * dim], &mut codes[i * nsubq..(i + 1) * nsubq]);
        }
    }

    /// alpha * <x, decoded row t>
    pub fn mul_code(&self, x: &Vector, codes: &[u8], t: i64, alpha: f32) -> f32 {
        let nsubq = self.nsubq as usize;
        let dsub = self.dsub as usize;
        let code = &codes[t as usize * nsubq..(t as usize + 1) * nsubq];
        let mut res = 0.0;
        for m in 0..nsubq {
            let c = self.centroid(m, code[m]);
            for (j, cj) in c.iter().enumerate() {
                res += x[m * dsub + j] * cj;
            }
        }
        res * alpha
    }

    /// x += alpha * decoded row t
    pub fn add_code(&self, x: &mut Vector, codes: &[u8], t: i64, alpha: f32) {
        let nsubq = self.nsubq as usize;
        let dsub = self.dsub as usize;
        let code = &codes[t as usize * nsubq..(t as usize + 1) * nsubq];
        for m in 0..nsubq {
            let c = self.centroid(m, code[m]);
            for (j, cj) in c.iter().enumerate() {
                x[m * dsub + j] += alpha * cj;
            }
        }
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> JamoTextResult<()> {
        write_i32(writer, self.dim)?;
        write_i32(writer, self.nsubq)?;
        write_i32(writer, self.dsub)?;
        write_i32(writer, self.lastdsub)?;
        write_f32_slice(writer, &self.centroids)
    }

    pub fn load<R: Read>(reader: &mut R) -> JamoTextResult<ProductQuantizer> {
        let dim = read_i32(reader)?;
        let nsubq = read_i32(reader)?;
        let dsub = read_i32(reader)?;
        let lastdsub = read_i32(reader)?;
        if dim <= 0 || nsubq <= 0 || dsub <= 0 || lastdsub <= 0 {
            return Err(JamoTextErrorKind::Deserialize.with_error(anyhow::anyhow!(
                "Invalid product quantizer header: dim={} nsubq={} dsub={} lastdsub={}",
                dim,
                nsubq,
                dsub,
                lastdsub
            )));
        }
        let mut centroids = vec![0.0f32; dim as usize * KSUB];
        read_f32_into(reader, &mut centroids)?;
        Ok(ProductQuantizer {
            dim,
            nsubq,
            dsub,
            lastdsub,
            centroids,
            rng: StdRng::seed_from_u64(SEED),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_slice_widths() {
        let pq = ProductQuantizer::new(10, 4);
        assert_eq!(pq.nsubq, 3);
        assert_eq!(pq.lastdsub, 2);

        let pq = ProductQuantizer::new(8, 4);
        assert_eq!(pq.nsubq, 2);
        assert_eq!(pq.lastdsub, 4);

        let pq = ProductQuantizer::new(1, 1);
        assert_eq!(pq.nsubq, 1);
        assert_eq!(pq.lastdsub, 1);
    }

    #[test]
    fn test_train_rejects_small_input() {
        let mut pq = ProductQuantizer::new(4, 2);
        let rows = vec![0.0f32; 10 * 4];
        assert!(pq.train(10, &rows).is_err());
    }

    #[test]
    fn test_train_and_reconstruct() {
        // 256 well separated rows and 256 centroids per slice, so the coded
        // reconstruction lands on the training points.
        let n = 256usize;
        let dim = 4usize;
        let mut rows = vec![0.0f32; n * dim];
        for i in 0..n {
            for j in 0..dim {
                rows[i * dim + j] = (i * (j + 1)) as f32;
            }
        }
        let mut pq = ProductQuantizer::new(dim as i32, 2);
        pq.train(n as i32, &rows).unwrap();

        let mut codes = vec![0u8; n * pq.nsubq() as usize];
        pq.compute_codes(&rows, &mut codes, n as i32);

        let mut worst = 0.0f32;
        for i in 0..n {
            let mut decoded = Vector::new(dim);
            pq.add_code(&mut decoded, &codes, i as i64, 1.0);
            for j in 0..dim {
                worst = worst.max((decoded[j] - rows[i * dim + j]).abs());
            }
        }
        assert!(worst < 1e-2, "reconstruction error {}", worst);
    }

    #[test]
    fn test_mul_code_matches_decoded_dot() {
        let n = 300usize;
        let dim = 6usize;
        let mut rows = vec![0.0f32; n * dim];
        for i in 0..n {
            for j in 0..dim {
                rows[i * dim + j] = ((i + 1) as f32).sin() * (j + 1) as f32;
            }
        }
        let mut pq = ProductQuantizer::new(dim as i32, 4);
        pq.train(n as i32, &rows).unwrap();
        let mut codes = vec![0u8; n * pq.nsubq() as usize];
        pq.compute_codes(&rows, &mut codes, n as i32);

        let x = Vector::from_vec(vec![0.5, -1.0, 2.0, 0.0, 1.0, -0.5]);
        for t in [0i64, 17, 299] {
            let mut decoded = Vector::new(dim);
            pq.add_code(&mut decoded, &codes, t, 1.0);
            let expected: f32 = (0..dim).map(|j| decoded[j] * x[j]).sum();
            let got = pq.mul_code(&x, &codes, t, 1.0);
            assert!((got - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let n = 256usize;
        let dim = 3usize;
        let mut rows = vec![0.0f32; n * dim];
        for (i, value) in rows.iter_mut().enumerate() {
            *value = (i as f32).cos();
        }
        let mut pq = ProductQuantizer::new(dim as i32, 2);
        pq.train(n as i32, &rows).unwrap();

        let mut buffer = Vec::new();
        pq.save(&mut buffer).unwrap();
        let loaded = ProductQuantizer::load(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(loaded.dim, pq.dim);
        assert_eq!(loaded.nsubq, pq.nsubq);
        assert_eq!(loaded.lastdsub, pq.lastdsub);
        assert_eq!(loaded.centroids, pq.centroids);
    }
}
