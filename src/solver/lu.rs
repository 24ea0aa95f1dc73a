//! Dense LU factorization.
//!
//! Crout's method with implicit row scaling and partial pivoting, operating
//! in place on a row-major `n x n` slice. The factored matrix holds L (unit
//! diagonal, below the diagonal) and U (on and above the diagonal); the
//! pivot array records the row interchange performed at each column.

use crate::error::{Result, SimError};

/// Factor `a` in place.
///
/// `pivots` and `scale` must hold at least `n` entries; `scale` is scratch
/// space so repeated factoring does not allocate.
pub fn lu_factor(a: &mut [f64], n: usize, pivots: &mut [usize], scale: &mut [f64]) -> Result<()> {
    debug_assert!(a.len() >= n * n);

    // Divide each row by its largest element, keeping the scale factors
    for i in 0..n {
        let largest = a[i * n..(i + 1) * n]
            .iter()
            .fold(0.0f64, |m, x| m.max(x.abs()));
        if largest == 0.0 {
            return Err(SimError::SingularMatrix);
        }
        scale[i] = 1.0 / largest;
    }

    // Crout's method: loop through the columns
    for j in 0..n {
        // Upper triangular elements for this column
        for i in 0..j {
            let mut q = a[i * n + j];
            for k in 0..i {
                q -= a[i * n + k] * a[k * n + j];
            }
            a[i * n + j] = q;
        }

        // Lower triangular elements, tracking the best scaled pivot
        let mut largest = 0.0;
        let mut largest_row = j;
        for i in j..n {
            let mut q = a[i * n + j];
            for k in 0..j {
                q -= a[i * n + k] * a[k * n + j];
            }
            a[i * n + j] = q;
            let x = q.abs() * scale[i];
            if x >= largest {
                largest = x;
                largest_row = i;
            }
        }

        if j != largest_row {
            for k in 0..n {
                a.swap(largest_row * n + k, j * n + k);
            }
            scale[largest_row] = scale[j];
        }
        pivots[j] = largest_row;

        let pivot = a[j * n + j];
        if pivot == 0.0 || !pivot.is_finite() {
            return Err(SimError::SingularMatrix);
        }

        if j != n - 1 {
            let mult = 1.0 / pivot;
            for i in (j + 1)..n {
                a[i * n + j] *= mult;
            }
        }
    }

    Ok(())
}

/// Solve `A x = b` using factors from [`lu_factor`]. The solution replaces `b`.
pub fn lu_solve(a: &[f64], n: usize, pivots: &[usize], b: &mut [f64]) {
    if n == 0 {
        return;
    }

    // Skip leading zeros of the permuted right-hand side
    let mut i = 0;
    while i < n {
        b.swap(pivots[i], i);
        if b[i] != 0.0 {
            break;
        }
        i += 1;
    }

    // Forward substitution using the lower triangular matrix
    let first = i;
    for i in (first + 1)..n {
        let row = pivots[i];
        let mut tot = b[row];
        b[row] = b[i];
        for j in first..i {
            tot -= a[i * n + j] * b[j];
        }
        b[i] = tot;
    }

    // Back substitution using the upper triangular matrix
    for i in (0..n).rev() {
        let mut tot = b[i];
        for j in (i + 1)..n {
            tot -= a[i * n + j] * b[j];
        }
        b[i] = tot / a[i * n + i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small xorshift generator so the tests are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next_f64(&mut self) -> f64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
        }
    }

    fn factor_and_solve(mut a: Vec<f64>, n: usize, mut b: Vec<f64>) -> Result<Vec<f64>> {
        let mut pivots = vec![0; n];
        let mut scale = vec![0.0; n];
        lu_factor(&mut a, n, &mut pivots, &mut scale)?;
        lu_solve(&a, n, &pivots, &mut b);
        Ok(b)
    }

    #[test]
    fn test_random_round_trip() {
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        for n in [1usize, 2, 3, 5, 8, 13, 21] {
            for _ in 0..10 {
                let mut a: Vec<f64> = (0..n * n).map(|_| rng.next_f64()).collect();
                // Keep it well conditioned
                for i in 0..n {
                    a[i * n + i] += n as f64 * if rng.next_f64() < 0.0 { -1.0 } else { 1.0 };
                }
                let x: Vec<f64> = (0..n).map(|_| rng.next_f64() * 10.0).collect();
                let b: Vec<f64> = (0..n)
                    .map(|i| (0..n).map(|j| a[i * n + j] * x[j]).sum())
                    .collect();

                let solved = factor_and_solve(a, n, b).unwrap();
                let norm = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
                for (got, want) in solved.iter().zip(&x) {
                    assert!((got - want).abs() <= 1e-9 * norm.max(1.0), "{got} vs {want}");
                }
            }
        }
    }

    #[test]
    fn test_needs_pivoting() {
        // Zero on the leading diagonal forces a row interchange
        let a = vec![0.0, 1.0, 1.0, 1.0];
        let x = factor_and_solve(a, 2, vec![2.0, 5.0]).unwrap();
        assert!((x[0] - 3.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_badly_scaled_rows() {
        let a = vec![1e-9, 2e-9, 3.0, 1.0];
        let x = factor_and_solve(a, 2, vec![5e-9, 5.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_right_side_prefix() {
        let a = vec![4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0];
        let x = factor_and_solve(a, 3, vec![0.0, 0.0, 2.0]).unwrap();
        // Check A x = b
        assert!((4.0 * x[0] + x[1]).abs() < 1e-12);
        assert!((x[0] + 3.0 * x[1] + x[2]).abs() < 1e-12);
        assert!((x[1] + 2.0 * x[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_dependent_rows() {
        let a = vec![1.0, 2.0, 2.0, 4.0];
        assert_eq!(
            factor_and_solve(a, 2, vec![1.0, 2.0]),
            Err(SimError::SingularMatrix)
        );
    }

    #[test]
    fn test_singular_zero_row() {
        let a = vec![1.0, 0.0, 0.0, 0.0];
        let err = factor_and_solve(a, 2, vec![1.0, 0.0]).unwrap_err();
        assert_eq!(err.code(), Some(crate::error::ErrorCode::E2));
    }

    #[test]
    fn test_empty_system() {
        let x = factor_and_solve(Vec::new(), 0, Vec::new()).unwrap();
        assert!(x.is_empty());
    }
}
