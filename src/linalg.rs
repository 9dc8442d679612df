// ADAPT DENSE LINEAR ALGEBRA
// SQUARE MATRICES ONLY, FLAT ROW-MAJOR STORAGE: a[i * n + j].
// GAUSS-JORDAN WITH PARTIAL PIVOTING FOR BOTH DETERMINANT AND INVERSE.
// SMALL SYSTEMS ONLY (FILTER ORDER, NOT DATASET SIZE).

use std::fmt;
use std::ops::{Index, IndexMut};

// |PIVOT| BELOW THIS IS TREATED AS ZERO
const SINGULAR_EPS: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    n: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    // PANICS ON RAGGED OR NON-SQUARE INPUT
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), n, "row {} has {} entries, expected {}", i, row.len(), n);
            data.extend_from_slice(row);
        }
        Self { n, data }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.data.chunks(self.n.max(1)).map(<[f64]>::to_vec).collect()
    }

    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.n, other.n, "dimension mismatch");
        let n = self.n;
        let mut out = Matrix::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let a = self[(i, k)];
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out[(i, j)] += a * other[(k, j)];
                }
            }
        }
        out
    }

    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(self.n, x.len(), "dimension mismatch");
        (0..self.n)
            .map(|i| (0..self.n).map(|j| self[(i, j)] * x[j]).sum())
            .collect()
    }

    pub fn determinant(&self) -> f64 {
        let n = self.n;
        let mut a = self.data.clone();
        let mut det = 1.0;
        for col in 0..n {
            let pivot = pivot_row(&a, n, col);
            if a[pivot * n + col].abs() < SINGULAR_EPS {
                return 0.0;
            }
            if pivot != col {
                swap_rows(&mut a, n, pivot, col);
                det = -det;
            }
            let p = a[col * n + col];
            det *= p;
            for r in (col + 1)..n {
                let factor = a[r * n + col] / p;
                if factor == 0.0 {
                    continue;
                }
                for c in col..n {
                    a[r * n + c] -= factor * a[col * n + c];
                }
            }
        }
        det
    }

    // NONE WHEN SINGULAR (SOME PIVOT BELOW SINGULAR_EPS)
    pub fn inverse(&self) -> Option<Matrix> {
        let n = self.n;
        let mut a = self.data.clone();
        let mut inv = Matrix::identity(n).data;

        for col in 0..n {
            let pivot = pivot_row(&a, n, col);
            if a[pivot * n + col].abs() < SINGULAR_EPS {
                return None;
            }
            if pivot != col {
                swap_rows(&mut a, n, pivot, col);
                swap_rows(&mut inv, n, pivot, col);
            }

            let p = a[col * n + col];
            for c in 0..n {
                a[col * n + c] /= p;
                inv[col * n + c] /= p;
            }

            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = a[r * n + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    a[r * n + c] -= factor * a[col * n + c];
                    inv[r * n + c] -= factor * inv[col * n + c];
                }
            }
        }
        Some(Matrix { n, data: inv })
    }

    pub fn max_abs_diff(&self, other: &Matrix) -> f64 {
        assert_eq!(self.n, other.n, "dimension mismatch");
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

// LARGEST |a[r][col]| AT OR BELOW THE DIAGONAL
fn pivot_row(a: &[f64], n: usize, col: usize) -> usize {
    let mut best = col;
    for r in (col + 1)..n {
        if a[r * n + col].abs() > a[best * n + col].abs() {
            best = r;
        }
    }
    best
}

fn swap_rows(a: &mut [f64], n: usize, i: usize, j: usize) {
    for c in 0..n {
        a.swap(i * n + c, j * n + c);
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.n + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.n + j]
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.data.chunks(self.n.max(1)) {
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{:>10.4}", v)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
