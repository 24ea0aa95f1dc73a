//! MNA matrix assembly, symbolic reduction and solving.

use log::debug;

use super::lu::{lu_factor, lu_solve};
use crate::error::{Result, SimError};

/// Maximum hops followed when resolving chains of equal rows.
const MAX_EQUAL_CHAIN: usize = 100;

/// Round to 12 decimal digits.
fn round_time(t: f64) -> f64 {
    (t * 1e12).round() / 1e12
}

/// Classification of one unknown after symbolic reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowKind {
    /// Solved by the LU system
    Normal,
    /// Known in closed form
    Constant(f64),
    /// Proven equal to another unknown
    EqualTo(usize),
}

/// Per-unknown bookkeeping.
#[derive(Debug, Clone)]
pub struct RowInfo {
    pub kind: RowKind,
    /// Column in the reduced matrix; `None` for constants
    pub map_col: Option<usize>,
    /// Row in the reduced matrix; `None` for dropped rows
    pub map_row: Option<usize>,
    /// Left side is restamped every sub-iteration
    pub left_changes: bool,
    /// Right side is restamped every sub-iteration
    pub right_changes: bool,
    /// Excluded from the reduced system
    pub drop_row: bool,
}

impl Default for RowInfo {
    fn default() -> Self {
        Self {
            kind: RowKind::Normal,
            map_col: None,
            map_row: None,
            left_changes: false,
            right_changes: false,
            drop_row: false,
        }
    }
}

/// MNA system Ax = z with its reduction map.
///
/// Node arguments of the stamping methods are dense node indices where 0 is
/// ground; unknown `k` (1-based) lives in matrix row `k - 1`. Voltage source
/// `vs` is unknown `node_count + vs`.
///
/// Buffers are resized only when an analysis changes the matrix size, so
/// ticking never allocates.
#[derive(Debug)]
pub struct MnaSystem {
    /// Dense nodes including ground
    node_count: usize,
    /// Unknowns before reduction
    full_size: usize,
    /// Dimension of the working matrix
    size: usize,
    /// Working matrix (row-major)
    matrix: Vec<f64>,
    /// Working right side; holds the solution after solving
    right_side: Vec<f64>,
    /// Reduced matrix as stamped at analysis
    orig_matrix: Vec<f64>,
    /// Reduced right side as stamped at analysis
    orig_right_side: Vec<f64>,
    row_info: Vec<RowInfo>,
    pivots: Vec<usize>,
    scale: Vec<f64>,
    /// Stamps go through the reduction map
    needs_map: bool,
    nonlinear: bool,
    converged: bool,
    factored: bool,
    time: f64,
    /// Time at the last rewind or step change; `time` is measured from here
    time_base: f64,
    steps: u64,
    time_step: f64,
}

impl MnaSystem {
    /// Create an empty system.
    pub fn new(time_step: f64) -> Self {
        Self {
            node_count: 1,
            full_size: 0,
            size: 0,
            matrix: Vec::new(),
            right_side: Vec::new(),
            orig_matrix: Vec::new(),
            orig_right_side: Vec::new(),
            row_info: Vec::new(),
            pivots: Vec::new(),
            scale: Vec::new(),
            needs_map: false,
            nonlinear: false,
            converged: true,
            factored: false,
            time: 0.0,
            time_base: 0.0,
            steps: 0,
            time_step,
        }
    }

    /// Size the full system for `node_count` dense nodes (ground included)
    /// and `voltage_sources` source unknowns, clearing every entry.
    pub fn allocate(&mut self, node_count: usize, voltage_sources: usize) {
        let size = node_count.saturating_sub(1) + voltage_sources;
        self.node_count = node_count;
        self.full_size = size;
        self.size = size;
        self.matrix.clear();
        self.matrix.resize(size * size, 0.0);
        self.right_side.clear();
        self.right_side.resize(size, 0.0);
        self.row_info.clear();
        self.row_info.resize(size, RowInfo::default());
        self.pivots.resize(size, 0);
        self.scale.resize(size, 0.0);
        self.needs_map = false;
        self.factored = false;
    }

    /// Number of dense nodes, ground included.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Unknowns before reduction.
    pub fn full_size(&self) -> usize {
        self.full_size
    }

    /// Dimension of the system handed to the LU solver.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn row_info(&self) -> &[RowInfo] {
        &self.row_info
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
        self.time_base = time;
        self.steps = 0;
    }

    /// Step time forward by one `time_step`. Time is always
    /// `round(base + steps * h, 12)`, never a running sum.
    pub(crate) fn advance_time(&mut self) {
        self.steps += 1;
        self.time = round_time(self.time_base + self.steps as f64 * self.time_step);
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub(crate) fn set_time_step(&mut self, time_step: f64) {
        if time_step != self.time_step {
            self.time_base = self.time;
            self.steps = 0;
        }
        self.time_step = time_step;
    }

    pub fn is_nonlinear(&self) -> bool {
        self.nonlinear
    }

    pub(crate) fn set_nonlinear(&mut self, nonlinear: bool) {
        self.nonlinear = nonlinear;
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub(crate) fn set_converged(&mut self, converged: bool) {
        self.converged = converged;
    }

    /// Called by nonlinear components whose operating point is still moving.
    pub fn set_not_converged(&mut self) {
        self.converged = false;
    }

    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Drop the factorization so the next analysis starts clean.
    pub(crate) fn invalidate(&mut self) {
        self.factored = false;
    }

    /// Unknown index (1-based) of a voltage source.
    pub fn voltage_source_unknown(&self, vs: usize) -> usize {
        self.node_count + vs
    }

    /// Add `x` to A[i, j]; unknowns are 1-based and 0 is ground.
    pub fn stamp_matrix(&mut self, i: usize, j: usize, x: f64) {
        if i == 0 || j == 0 {
            return;
        }
        if !self.needs_map {
            self.matrix[(i - 1) * self.size + (j - 1)] += x;
            return;
        }
        let Some(row) = self.row_info[i - 1].map_row else {
            debug_assert!(false, "stamp into dropped row {i}");
            return;
        };
        let col_info = &self.row_info[j - 1];
        match (col_info.kind, col_info.map_col) {
            (RowKind::Constant(value), _) => self.right_side[row] -= x * value,
            (_, Some(col)) => self.matrix[row * self.size + col] += x,
            (_, None) => debug_assert!(false, "unmapped column {j}"),
        }
    }

    /// Add `x` to z[i].
    pub fn stamp_right_side(&mut self, i: usize, x: f64) {
        if i == 0 {
            return;
        }
        if !self.needs_map {
            self.right_side[i - 1] += x;
            return;
        }
        match self.row_info[i - 1].map_row {
            Some(row) => self.right_side[row] += x,
            None => debug_assert!(false, "stamp into dropped row {i}"),
        }
    }

    /// Mark z[i] as restamped every sub-iteration.
    pub fn mark_right_side_changes(&mut self, i: usize) {
        if i > 0 {
            self.row_info[i - 1].right_changes = true;
        }
    }

    /// Mark row i as restamped every sub-iteration.
    pub fn mark_nonlinear(&mut self, i: usize) {
        if i > 0 {
            self.row_info[i - 1].left_changes = true;
        }
    }

    /// Stamp a resistance between two nodes.
    pub fn stamp_resistor(&mut self, n1: usize, n2: usize, r: f64) {
        self.stamp_conductance(n1, n2, 1.0 / r);
    }

    /// Stamp a conductance G between two nodes:
    ///   A[n1,n1] += G, A[n2,n2] += G, A[n1,n2] -= G, A[n2,n1] -= G
    pub fn stamp_conductance(&mut self, n1: usize, n2: usize, g: f64) {
        self.stamp_matrix(n1, n1, g);
        self.stamp_matrix(n2, n2, g);
        self.stamp_matrix(n1, n2, -g);
        self.stamp_matrix(n2, n1, -g);
    }

    /// Stamp a current source. Current flows from n1 through the source to n2.
    pub fn stamp_current_source(&mut self, n1: usize, n2: usize, current: f64) {
        self.stamp_right_side(n1, -current);
        self.stamp_right_side(n2, current);
    }

    /// Stamp the incidence of voltage source `vs`: V[n2] - V[n1] = E.
    fn stamp_voltage_incidence(&mut self, n1: usize, n2: usize, vs: usize) -> usize {
        let vn = self.voltage_source_unknown(vs);
        self.stamp_matrix(vn, n1, -1.0);
        self.stamp_matrix(vn, n2, 1.0);
        self.stamp_matrix(n1, vn, 1.0);
        self.stamp_matrix(n2, vn, -1.0);
        vn
    }

    /// Stamp a fixed voltage source: V[n2] - V[n1] = voltage.
    pub fn stamp_voltage_source(&mut self, n1: usize, n2: usize, vs: usize, voltage: f64) {
        let vn = self.stamp_voltage_incidence(n1, n2, vs);
        self.stamp_right_side(vn, voltage);
    }

    /// Stamp a voltage source whose value is set by
    /// [`update_voltage_source`](Self::update_voltage_source) every step.
    pub fn stamp_varying_voltage_source(&mut self, n1: usize, n2: usize, vs: usize) {
        let vn = self.stamp_voltage_incidence(n1, n2, vs);
        self.mark_right_side_changes(vn);
    }

    /// Set the value of a varying voltage source for this sub-iteration.
    pub fn update_voltage_source(&mut self, vs: usize, voltage: f64) {
        let vn = self.voltage_source_unknown(vs);
        self.stamp_right_side(vn, voltage);
    }

    /// Classify rows that never change during sub-iteration and have at most
    /// two nonzero entries as constants or equalities.
    pub(crate) fn simplify(&mut self) -> Result<()> {
        let n = self.full_size;
        let mut i = 0;
        while i < n {
            let info = &self.row_info[i];
            if info.left_changes || info.right_changes || info.drop_row {
                i += 1;
                continue;
            }

            let mut qp: Option<usize> = None;
            let mut qm: Option<usize> = None;
            let mut qv = 0.0;
            let mut rsadd = 0.0;
            let mut reducible = true;
            for j in 0..n {
                let q = self.matrix[i * n + j];
                if let RowKind::Constant(value) = self.row_info[j].kind {
                    // Running total of constants removed already
                    rsadd -= value * q;
                    continue;
                }
                if q == 0.0 {
                    continue;
                }
                if qp.is_none() {
                    qp = Some(j);
                    qv = q;
                    continue;
                }
                if qm.is_none() && q == -qv {
                    qm = Some(j);
                    continue;
                }
                reducible = false;
                break;
            }
            if !reducible {
                i += 1;
                continue;
            }

            let Some(mut qp) = qp else {
                return Err(SimError::MatrixReduction { row: i });
            };
            let rhs = self.right_side[i] + rsadd;

            match qm {
                None => {
                    // Single nonzero entry: the unknown is a constant
                    let mut hops = 0;
                    while let RowKind::EqualTo(next) = self.row_info[qp].kind {
                        if hops == MAX_EQUAL_CHAIN {
                            break;
                        }
                        qp = next;
                        hops += 1;
                    }
                    match self.row_info[qp].kind {
                        RowKind::EqualTo(_) => {
                            debug!("breaking equal chain at row {qp}");
                            self.row_info[qp].kind = RowKind::Normal;
                            i += 1;
                        }
                        RowKind::Constant(_) => {
                            debug!("row {qp} is already constant");
                            i += 1;
                        }
                        RowKind::Normal => {
                            self.row_info[qp].kind = RowKind::Constant(rhs / qv);
                            self.row_info[i].drop_row = true;
                            // Start over from scratch
                            i = 0;
                        }
                    }
                }
                Some(qm) if rhs == 0.0 => {
                    // Two opposite entries and no source: the unknowns are equal
                    let (mut target, mut other) = (qp, qm);
                    if self.row_info[target].kind != RowKind::Normal {
                        std::mem::swap(&mut target, &mut other);
                    }
                    if self.row_info[target].kind == RowKind::Normal {
                        self.row_info[target].kind = RowKind::EqualTo(other);
                        self.row_info[i].drop_row = true;
                    }
                    i += 1;
                }
                Some(_) => i += 1,
            }
        }
        Ok(())
    }

    /// Build the reduced matrix from the full one, folding constants into
    /// the right side, and snapshot it as the original system.
    pub(crate) fn compact(&mut self) -> Result<()> {
        let n = self.full_size;

        // Assign columns
        let mut new_size = 0;
        for i in 0..n {
            match self.row_info[i].kind {
                RowKind::Normal => {
                    self.row_info[i].map_col = Some(new_size);
                    new_size += 1;
                }
                RowKind::EqualTo(first) => {
                    let mut target = first;
                    for _ in 0..MAX_EQUAL_CHAIN {
                        match self.row_info[target].kind {
                            RowKind::EqualTo(next) if next != i => target = next,
                            _ => break,
                        }
                    }
                    self.row_info[i].kind = RowKind::EqualTo(target);
                }
                RowKind::Constant(_) => self.row_info[i].map_col = None,
            }
        }
        for i in 0..n {
            if let RowKind::EqualTo(target) = self.row_info[i].kind {
                match self.row_info[target].kind {
                    RowKind::Constant(value) => {
                        // Equal to a constant is a constant
                        self.row_info[i].kind = RowKind::Constant(value);
                        self.row_info[i].map_col = None;
                    }
                    _ => match self.row_info[target].map_col {
                        Some(col) => self.row_info[i].map_col = Some(col),
                        None => return Err(SimError::MatrixReduction { row: i }),
                    },
                }
            }
        }

        self.orig_matrix.clear();
        self.orig_matrix.resize(new_size * new_size, 0.0);
        self.orig_right_side.clear();
        self.orig_right_side.resize(new_size, 0.0);

        let mut ii = 0;
        for i in 0..n {
            if self.row_info[i].drop_row {
                self.row_info[i].map_row = None;
                continue;
            }
            if ii == new_size {
                return Err(SimError::MatrixReduction { row: i });
            }
            self.orig_right_side[ii] = self.right_side[i];
            self.row_info[i].map_row = Some(ii);
            for j in 0..n {
                let q = self.matrix[i * n + j];
                match (self.row_info[j].kind, self.row_info[j].map_col) {
                    (RowKind::Constant(value), _) => self.orig_right_side[ii] -= value * q,
                    (_, Some(col)) => self.orig_matrix[ii * new_size + col] += q,
                    (_, None) => return Err(SimError::MatrixReduction { row: j }),
                }
            }
            ii += 1;
        }
        if ii != new_size {
            return Err(SimError::MatrixReduction { row: ii });
        }

        self.size = new_size;
        self.matrix.clear();
        self.matrix.extend_from_slice(&self.orig_matrix);
        self.right_side.clear();
        self.right_side.extend_from_slice(&self.orig_right_side);
        self.needs_map = true;
        Ok(())
    }

    /// Restore the working right side (and matrix, if nonlinear) from the
    /// snapshot taken at analysis.
    pub(crate) fn restore(&mut self) {
        self.right_side.copy_from_slice(&self.orig_right_side);
        if self.nonlinear {
            self.matrix.copy_from_slice(&self.orig_matrix);
        }
    }

    /// Fail on NaN or infinite matrix entries.
    pub(crate) fn check_finite(&self) -> Result<()> {
        let n = self.size;
        match self.matrix.iter().position(|x| !x.is_finite()) {
            Some(idx) => Err(SimError::NumericalOverflow {
                row: idx / n,
                col: idx % n,
            }),
            None => Ok(()),
        }
    }

    /// LU-factor the working matrix in place.
    pub(crate) fn factor(&mut self) -> Result<()> {
        self.factored = false;
        lu_factor(&mut self.matrix, self.size, &mut self.pivots, &mut self.scale)?;
        self.factored = true;
        Ok(())
    }

    /// Solve with the current factors; the solution replaces the right side.
    pub(crate) fn solve(&mut self) {
        lu_solve(&self.matrix, self.size, &self.pivots, &mut self.right_side);
    }

    /// Solved value of unknown `j` (0-based, full numbering).
    pub fn unknown_value(&self, j: usize) -> f64 {
        match (self.row_info[j].kind, self.row_info[j].map_col) {
            (RowKind::Constant(value), _) => value,
            (_, Some(col)) => self.right_side[col],
            (_, None) => f64::NAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_time() {
        assert_eq!(round_time(0.1 + 0.2), 0.3);
        assert_eq!(round_time(5e-6 * 3.0), 1.5e-5);
    }

    #[test]
    fn test_time_counts_steps() {
        let h = 1e-6 / 3.0;
        let mut mna = MnaSystem::new(h);
        for _ in 0..3000 {
            mna.advance_time();
        }
        assert_eq!(mna.time(), round_time(3000.0 * h));

        // A new step rebases on the current time
        mna.set_time_step(1e-3);
        mna.advance_time();
        assert_eq!(mna.time(), round_time(round_time(3000.0 * h) + 1e-3));

        mna.set_time(0.0);
        mna.advance_time();
        assert_eq!(mna.time(), 1e-3);
    }

    /// Node 1 -- 1k -- node 2 -- 1k -- ground, 10 V source at node 1.
    fn divider(mna: &mut MnaSystem) {
        mna.allocate(3, 1);
        mna.stamp_resistor(1, 2, 1000.0);
        mna.stamp_resistor(2, 0, 1000.0);
        mna.stamp_voltage_source(0, 1, 0, 10.0);
    }

    fn solve_all(mna: &mut MnaSystem) -> Vec<f64> {
        mna.compact().unwrap();
        mna.factor().unwrap();
        mna.solve();
        (0..mna.full_size()).map(|j| mna.unknown_value(j)).collect()
    }

    #[test]
    fn test_stamp_conductance() {
        let mut mna = MnaSystem::new(1e-6);
        mna.allocate(3, 0);
        mna.stamp_conductance(1, 2, 0.5);
        assert_eq!(mna.matrix, vec![0.5, -0.5, -0.5, 0.5]);

        // Ground entries are skipped
        mna.stamp_conductance(1, 0, 0.25);
        assert_eq!(mna.matrix[0], 0.75);
    }

    #[test]
    fn test_divider_unreduced() {
        let mut mna = MnaSystem::new(1e-6);
        divider(&mut mna);
        let x = solve_all(&mut mna);
        assert_eq!(mna.size(), 3);
        assert!((x[0] - 10.0).abs() < 1e-12);
        assert!((x[1] - 5.0).abs() < 1e-12);
        // Source current: 10 V across 2k
        assert!((x[2] - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_divider_reduced_matches() {
        let mut mna = MnaSystem::new(1e-6);
        divider(&mut mna);
        mna.simplify().unwrap();
        assert_eq!(mna.row_info()[0].kind, RowKind::Constant(10.0));
        let x = solve_all(&mut mna);
        assert!(mna.size() < 3);
        assert!((x[0] - 10.0).abs() < 1e-12);
        assert!((x[1] - 5.0).abs() < 1e-12);
        assert!((x[2] - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_equal_rows() {
        // Node 2 hangs off node 1 through a resistor only
        let mut mna = MnaSystem::new(1e-6);
        mna.allocate(3, 1);
        mna.stamp_resistor(1, 2, 100.0);
        mna.stamp_resistor(1, 0, 100.0);
        mna.stamp_varying_voltage_source(0, 1, 0);
        mna.simplify().unwrap();
        assert!(matches!(mna.row_info()[0].kind, RowKind::EqualTo(1)));
        mna.compact().unwrap();
        mna.update_voltage_source(0, 3.0);
        mna.factor().unwrap();
        mna.solve();
        assert!((mna.unknown_value(0) - 3.0).abs() < 1e-12);
        assert!((mna.unknown_value(1) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_changing_rows_are_kept() {
        let mut mna = MnaSystem::new(1e-6);
        mna.allocate(2, 0);
        mna.stamp_resistor(1, 0, 10.0);
        mna.mark_right_side_changes(1);
        mna.simplify().unwrap();
        assert_eq!(mna.row_info()[0].kind, RowKind::Normal);
    }

    #[test]
    fn test_empty_row_is_reduction_error() {
        let mut mna = MnaSystem::new(1e-6);
        mna.allocate(3, 0);
        mna.stamp_resistor(1, 0, 10.0);
        let err = mna.simplify().unwrap_err();
        assert_eq!(err, SimError::MatrixReduction { row: 1 });
    }

    #[test]
    fn test_check_finite() {
        let mut mna = MnaSystem::new(1e-6);
        mna.allocate(2, 0);
        mna.stamp_resistor(1, 0, 0.0);
        mna.compact().unwrap();
        assert_eq!(
            mna.check_finite(),
            Err(SimError::NumericalOverflow { row: 0, col: 0 })
        );
    }
}
