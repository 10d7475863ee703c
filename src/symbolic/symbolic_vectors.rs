//! Symbolic vectors and matrices over `Expr`. These are the data carriers for
//! the assembled dynamical system: the state vector, the linear coefficient
//! matrix, the residual vector, sample matrices during order inference and
//! the propagator matrix. Numeric evaluation lands in nalgebra types.

use crate::symbolic::symbolic_engine::Expr;
use nalgebra::{DMatrix, DVector};
use std::ops::{Index, IndexMut};

#[derive(Clone, Debug, PartialEq)]
pub struct ExprVector {
    data: Vec<Expr>,
}

impl ExprVector {
    pub fn new(data: Vec<Expr>) -> Self {
        ExprVector { data }
    }

    pub fn zeros(size: usize) -> Self {
        ExprVector {
            data: vec![Expr::Const(0.0); size],
        }
    }

    pub fn from_variables(vars: &[&str]) -> Self {
        ExprVector {
            data: vars.iter().map(|v| Expr::Var(v.to_string())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Expr> {
        self.data.iter()
    }

    pub fn push(&mut self, expr: Expr) {
        self.data.push(expr);
    }

    pub fn as_vec(&self) -> Vec<Expr> {
        self.data.clone()
    }

    pub fn map<F>(&self, f: F) -> ExprVector
    where
        F: Fn(&Expr) -> Expr,
    {
        ExprVector {
            data: self.data.iter().map(f).collect(),
        }
    }

    pub fn substitute(&self, var: &str, value: &Expr) -> ExprVector {
        self.map(|e| e.substitute_variable(var, value))
    }

    pub fn diff(&self, var: &str) -> ExprVector {
        self.map(|e| e.diff(var))
    }

    pub fn simplify(&self) -> ExprVector {
        self.map(|e| e.simplify())
    }

    /// rows selected by index, in the given order
    pub fn select(&self, idx: &[usize]) -> ExprVector {
        ExprVector {
            data: idx.iter().map(|&i| self.data[i].clone()).collect(),
        }
    }

    pub fn evaluate(&self, vars: &[&str], values: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.data.len(),
            self.data.iter().map(|e| e.eval_expression(vars, values)),
        )
    }
}

impl Index<usize> for ExprVector {
    type Output = Expr;

    fn index(&self, i: usize) -> &Self::Output {
        &self.data[i]
    }
}

impl IndexMut<usize> for ExprVector {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.data[i]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExprMatrix {
    data: Vec<Vec<Expr>>,
    nrows: usize,
    ncols: usize,
}

impl ExprMatrix {
    pub fn new(data: Vec<Vec<Expr>>) -> Self {
        let nrows = data.len();
        let ncols = if nrows > 0 { data[0].len() } else { 0 };
        for row in &data {
            assert_eq!(row.len(), ncols, "all rows must have the same length");
        }
        ExprMatrix { data, nrows, ncols }
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        ExprMatrix {
            data: vec![vec![Expr::Const(0.0); ncols]; nrows],
            nrows,
            ncols,
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = ExprMatrix::zeros(size, size);
        for i in 0..size {
            m.data[i][i] = Expr::Const(1.0);
        }
        m
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    pub fn row(&self, i: usize) -> ExprVector {
        ExprVector::new(self.data[i].clone())
    }

    pub fn column(&self, j: usize) -> ExprVector {
        ExprVector::new(self.data.iter().map(|row| row[j].clone()).collect())
    }

    pub fn transpose(&self) -> ExprMatrix {
        let mut out = ExprMatrix::zeros(self.ncols, self.nrows);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                out.data[j][i] = self.data[i][j].clone();
            }
        }
        out
    }

    pub fn map<F>(&self, f: F) -> ExprMatrix
    where
        F: Fn(&Expr) -> Expr,
    {
        ExprMatrix {
            data: self
                .data
                .iter()
                .map(|row| row.iter().map(&f).collect())
                .collect(),
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    pub fn simplify(&self) -> ExprMatrix {
        self.map(|e| e.simplify())
    }

    pub fn substitute(&self, var: &str, value: &Expr) -> ExprMatrix {
        self.map(|e| e.substitute_variable(var, value))
    }

    pub fn diff(&self, var: &str) -> ExprMatrix {
        self.map(|e| e.diff(var))
    }

    pub fn scale(&self, scalar: &Expr) -> ExprMatrix {
        self.map(|e| Expr::Mul(scalar.clone().boxed(), e.clone().boxed()).simplify_())
    }

    pub fn mul_vector(&self, vec: &ExprVector) -> ExprVector {
        assert_eq!(self.ncols, vec.len(), "dimension mismatch");
        let mut out = ExprVector::zeros(self.nrows);
        for i in 0..self.nrows {
            let mut sum = Expr::Const(0.0);
            for j in 0..self.ncols {
                if self.data[i][j].is_zero() || vec[j].is_zero() {
                    continue;
                }
                sum = sum + self.data[i][j].clone() * vec[j].clone();
            }
            out[i] = sum.simplify_();
        }
        out
    }

    pub fn mul_matrix(&self, other: &ExprMatrix) -> ExprMatrix {
        assert_eq!(self.ncols, other.nrows, "dimension mismatch");
        let mut out = ExprMatrix::zeros(self.nrows, other.ncols);
        for i in 0..self.nrows {
            for j in 0..other.ncols {
                let mut sum = Expr::Const(0.0);
                for k in 0..self.ncols {
                    if self.data[i][k].is_zero() || other.data[k][j].is_zero() {
                        continue;
                    }
                    sum = sum + self.data[i][k].clone() * other.data[k][j].clone();
                }
                out.data[i][j] = sum.simplify_();
            }
        }
        out
    }

    pub fn add_matrix(&self, other: &ExprMatrix) -> ExprMatrix {
        assert_eq!(self.shape(), other.shape(), "dimension mismatch");
        let mut out = ExprMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                out.data[i][j] =
                    (self.data[i][j].clone() + other.data[i][j].clone()).simplify_();
            }
        }
        out
    }

    pub fn sub_matrix(&self, other: &ExprMatrix) -> ExprMatrix {
        assert_eq!(self.shape(), other.shape(), "dimension mismatch");
        let mut out = ExprMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                out.data[i][j] =
                    (self.data[i][j].clone() - other.data[i][j].clone()).simplify_();
            }
        }
        out
    }

    /// Get minor matrix (remove row i and column j)
    pub fn minor(&self, row: usize, col: usize) -> ExprMatrix {
        assert!(row < self.nrows && col < self.ncols, "index out of bounds");
        let data: Vec<Vec<Expr>> = self
            .data
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != row)
            .map(|(_, r)| {
                r.iter()
                    .enumerate()
                    .filter(|(j, _)| *j != col)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .collect();
        ExprMatrix::new(data)
    }

    /// Determinant by cofactor expansion along the first row, skipping
    /// structurally zero entries. Exponential in the matrix size; meant for
    /// the small systems this crate assembles.
    pub fn determinant(&self) -> Expr {
        assert!(self.is_square(), "matrix must be square");
        match self.nrows {
            0 => Expr::Const(1.0),
            1 => self.data[0][0].clone(),
            2 => {
                let a = &self.data[0][0];
                let b = &self.data[0][1];
                let c = &self.data[1][0];
                let d = &self.data[1][1];
                (a.clone() * d.clone() - b.clone() * c.clone()).simplify_()
            }
            _ => {
                let mut det = Expr::Const(0.0);
                for j in 0..self.ncols {
                    if self.data[0][j].is_zero() {
                        continue;
                    }
                    let cofactor = self.data[0][j].clone() * self.minor(0, j).determinant();
                    det = if j % 2 == 0 {
                        det + cofactor
                    } else {
                        det - cofactor
                    };
                }
                det.simplify_()
            }
        }
    }

    /// Adjugate inverse. None when the determinant is identically zero.
    pub fn inverse(&self) -> Option<ExprMatrix> {
        assert!(self.is_square(), "matrix must be square");
        let det = self.determinant().simplify();
        if det.is_identically_zero() {
            return None;
        }
        if self.nrows == 1 {
            return Some(ExprMatrix::new(vec![vec![
                Expr::Div(Expr::Const(1.0).boxed(), self.data[0][0].clone().boxed()),
            ]]));
        }
        let mut out = ExprMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                // adjugate: transposed cofactor matrix
                let cof = self.minor(j, i).determinant();
                let signed = if (i + j) % 2 == 0 {
                    cof
                } else {
                    Expr::Mul(Expr::Const(-1.0).boxed(), cof.boxed())
                };
                out.data[i][j] = Expr::Div(signed.boxed(), det.clone().boxed());
            }
        }
        Some(out)
    }

    /// Kronecker product
    pub fn kronecker(&self, other: &ExprMatrix) -> ExprMatrix {
        let mut out = ExprMatrix::zeros(self.nrows * other.nrows, self.ncols * other.ncols);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                if self.data[i][j].is_zero() {
                    continue;
                }
                for k in 0..other.nrows {
                    for l in 0..other.ncols {
                        if other.data[k][l].is_zero() {
                            continue;
                        }
                        out.data[i * other.nrows + k][j * other.ncols + l] =
                            (self.data[i][j].clone() * other.data[k][l].clone()).simplify_();
                    }
                }
            }
        }
        out
    }

    /// rows and columns selected by index, in the given order
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> ExprMatrix {
        let data: Vec<Vec<Expr>> = rows
            .iter()
            .map(|&i| cols.iter().map(|&j| self.data[i][j].clone()).collect())
            .collect();
        ExprMatrix {
            data,
            nrows: rows.len(),
            ncols: cols.len(),
        }
    }

    /// contiguous submatrix
    pub fn submatrix(
        &self,
        row_range: std::ops::Range<usize>,
        col_range: std::ops::Range<usize>,
    ) -> ExprMatrix {
        let rows: Vec<usize> = row_range.collect();
        let cols: Vec<usize> = col_range.collect();
        self.select(&rows, &cols)
    }

    pub fn evaluate(&self, vars: &[&str], values: &[f64]) -> DMatrix<f64> {
        let mut result = DMatrix::zeros(self.nrows, self.ncols);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                result[(i, j)] = self.data[i][j].eval_expression(vars, values);
            }
        }
        result
    }
}

impl Index<(usize, usize)> for ExprMatrix {
    type Output = Expr;

    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        &self.data[i][j]
    }
}

impl IndexMut<(usize, usize)> for ExprMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut Self::Output {
        &mut self.data[i][j]
    }
}
