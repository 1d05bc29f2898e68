//! Non-negative least squares: `min ‖Ax − b‖₂  s.t.  x ≥ 0`.
//!
//! Lawson–Hanson active-set method. The unconstrained subproblem over the
//! passive set is solved through the normal equations with a tiny ridge term
//! and a Cholesky factorization, which keeps rank-deficient systems (the
//! regression rows always share dependencies) solvable.

/// Output of [`nnls`].
#[derive(Clone, Debug, PartialEq)]
pub struct NnlsResult {
    pub x: Vec<f64>,
    /// ‖Ax − b‖₂ at `x`
    pub residual_norm: f64,
    /// Outer iterations performed
    pub iterations: usize,
    /// False when the iteration cap was hit before the optimality test passed
    pub converged: bool,
}

/// Solve `min ‖Ax − b‖₂` over `x ≥ 0`.
///
/// `a` is given row-major (`a.len()` equations of `n` unknowns each, `n`
/// taken from the first row). Returns an empty solution for an empty or
/// ragged system.
pub fn nnls(a: &[Vec<f64>], b: &[f64]) -> NnlsResult {
    let m = a.len();
    let n = a.first().map_or(0, Vec::len);
    if m == 0 || n == 0 || b.len() != m || a.iter().any(|row| row.len() != n) {
        return NnlsResult {
            x: Vec::new(),
            residual_norm: 0.0,
            iterations: 0,
            converged: false,
        };
    }

    let norm1 = (0..n)
        .map(|j| a.iter().map(|row| row[j].abs()).sum::<f64>())
        .fold(0.0, f64::max);
    let mut x = vec![0.0; n];
    let mut passive = vec![false; n];
    let mut w = gradient(a, b, &x);

    // Optimality test on the gradient sits above the ridge term's footprint;
    // `x_tol` decides when a passive variable has hit zero.
    let w_max = w.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tol = (10.0 * f64::EPSILON * norm1.max(1.0) * m.max(n) as f64).max(1e-8 * w_max);
    let x_tol = 1e-12 * b.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let max_iter = 3 * n;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        let next = (0..n)
            .filter(|&j| !passive[j])
            .max_by(|&i, &j| w[i].total_cmp(&w[j]))
            .filter(|&j| w[j] > tol);
        let Some(j) = next else {
            converged = true;
            break;
        };
        iterations += 1;
        passive[j] = true;

        // Inner loop: step toward the passive-set optimum until it is feasible.
        let mut inner = 0;
        loop {
            inner += 1;
            let s = passive_solve(a, b, &passive);
            if (0..n).filter(|&i| passive[i]).all(|i| s[i] > 0.0) {
                x = s;
                break;
            }
            let alpha = (0..n)
                .filter(|&i| passive[i] && s[i] <= 0.0)
                .map(|i| x[i] / (x[i] - s[i]))
                .filter(|v| v.is_finite())
                .fold(1.0_f64, f64::min)
                .max(0.0);
            for i in 0..n {
                x[i] += alpha * (s[i] - x[i]);
            }
            for i in 0..n {
                if passive[i] && x[i] <= x_tol {
                    passive[i] = false;
                    x[i] = 0.0;
                }
            }
            if inner > n || !passive.iter().any(|&p| p) {
                break;
            }
        }
        w = gradient(a, b, &x);
    }

    for v in &mut x {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
    let residual_norm = residual(a, b, &x).iter().map(|r| r * r).sum::<f64>().sqrt();
    NnlsResult {
        x,
        residual_norm,
        iterations,
        converged,
    }
}

fn residual(a: &[Vec<f64>], b: &[f64], x: &[f64]) -> Vec<f64> {
    a.iter()
        .zip(b)
        .map(|(row, bi)| bi - row.iter().zip(x).map(|(aij, xj)| aij * xj).sum::<f64>())
        .collect()
}

/// `Aᵀ(b − Ax)`, the negative gradient of ½‖Ax − b‖².
fn gradient(a: &[Vec<f64>], b: &[f64], x: &[f64]) -> Vec<f64> {
    let r = residual(a, b, x);
    let n = x.len();
    let mut w = vec![0.0; n];
    for (row, ri) in a.iter().zip(&r) {
        for j in 0..n {
            w[j] += row[j] * ri;
        }
    }
    w
}

/// Unconstrained least squares over the passive columns; zero elsewhere.
fn passive_solve(a: &[Vec<f64>], b: &[f64], passive: &[bool]) -> Vec<f64> {
    let cols: Vec<usize> = (0..passive.len()).filter(|&j| passive[j]).collect();
    let k = cols.len();
    let mut out = vec![0.0; passive.len()];
    if k == 0 {
        return out;
    }

    let mut ata = vec![vec![0.0; k]; k];
    let mut atb = vec![0.0; k];
    for (row, bi) in a.iter().zip(b) {
        for (p, &cp) in cols.iter().enumerate() {
            let v = row[cp];
            if v == 0.0 {
                continue;
            }
            atb[p] += v * bi;
            for (q, &cq) in cols.iter().enumerate() {
                ata[p][q] += v * row[cq];
            }
        }
    }

    let max_diag = (0..k).map(|i| ata[i][i]).fold(0.0, f64::max).max(1.0);
    let ridge = 1e-10 * max_diag;
    for (i, row) in ata.iter_mut().enumerate() {
        row[i] += ridge;
    }

    if let Some(s) = cholesky_solve(&ata, &atb) {
        for (p, &cp) in cols.iter().enumerate() {
            out[cp] = s[p];
        }
    }
    out
}

/// Solve `Mx = y` for symmetric positive-definite `M`.
fn cholesky_solve(m: &[Vec<f64>], y: &[f64]) -> Option<Vec<f64>> {
    let n = m.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = m[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[i][i] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = y[i];
        for k in 0..i {
            sum -= l[i][k] * z[k];
        }
        z[i] = sum / l[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn unconstrained_optimum_is_non_negative() {
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let b = vec![1.0, 2.0, 3.0];
        let r = nnls(&a, &b);
        assert!(r.converged);
        assert!(close(&r.x, &[1.0, 2.0], 1e-6));
        assert!(r.residual_norm < 1e-6);
    }

    #[test]
    fn negative_component_is_clamped() {
        // unconstrained solution is (2, -1)
        let a = vec![vec![1.0, 1.0], vec![1.0, -1.0]];
        let b = vec![1.0, 3.0];
        let r = nnls(&a, &b);
        assert!(r.converged);
        assert!(r.x.iter().all(|v| *v >= 0.0));
        assert!(r.x[1].abs() < 1e-9);
        // min over x1 ≥ 0 of (x1 − 1)² + (x1 − 3)² → x1 = 2
        assert!((r.x[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn rank_deficient_system() {
        // two currency rows and two exchange rows over a 2x2 grid
        let a = vec![
            vec![1.0, 0.0, 1.0, 0.0],
            vec![0.0, 1.0, 0.0, 1.0],
            vec![1.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 1.0],
        ];
        let b = vec![60.0, 40.0, 50.0, 50.0];
        let r = nnls(&a, &b);
        assert!(r.converged);
        assert!(r.residual_norm < 1e-6);
        assert!(r.x.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn all_negative_target_gives_zero() {
        let a = vec![vec![1.0], vec![2.0]];
        let b = vec![-1.0, -2.0];
        let r = nnls(&a, &b);
        assert!(r.converged);
        assert_eq!(r.x, vec![0.0]);
        assert_eq!(r.iterations, 0);
    }

    #[test]
    fn empty_or_ragged_input() {
        assert!(nnls(&[], &[]).x.is_empty());
        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(nnls(&ragged, &[1.0, 1.0]).x.is_empty());
    }

    #[test]
    fn cholesky_small_system() {
        let m = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let x = cholesky_solve(&m, &[2.0, 1.0]).unwrap();
        assert!(close(&x, &[0.5, 0.0], 1e-12));
        assert!(cholesky_solve(&[vec![-1.0]], &[1.0]).is_none());
    }
}
