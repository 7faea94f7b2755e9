//! Geometric multigrid tests for kspmg
//!
//! The test problem is the 1D Poisson equation `tridiag(-1, 2, -1)` on
//! `2^k - 1` interior points, with linear interpolation between levels and
//! Galerkin coarse operators `Pᵀ A P` formed with faer dense products.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use faer::Mat;
use kspmg::config::OptionsDb;
use kspmg::core::{DVector, Layout, LinearOperator, MatStructure, NormType};
use kspmg::error::KError;
use kspmg::matrix::CsrMatrix;
use kspmg::parallel::{CommRef, SerialComm, ThreadComm};
use kspmg::preconditioner::{MgType, Multigrid, PcOperators, Preconditioner};
use kspmg::utils::{ConvergedReason, Tolerances};
use kspmg::{KspContext, SolverKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn poisson_dense(n: usize) -> Mat<f64> {
    let mut a = Mat::<f64>::zeros(n, n);
    for i in 0..n {
        a[(i, i)] = 2.0;
        if i > 0 {
            a[(i, i - 1)] = -1.0;
        }
        if i + 1 < n {
            a[(i, i + 1)] = -1.0;
        }
    }
    a
}

/// Linear interpolation from `nc` points to `2 nc + 1`.
fn interpolation_dense(nc: usize) -> Mat<f64> {
    let mut p = Mat::<f64>::zeros(2 * nc + 1, nc);
    for j in 0..nc {
        p[(2 * j, j)] = 0.5;
        p[(2 * j + 1, j)] = 1.0;
        p[(2 * j + 2, j)] = 0.5;
    }
    p
}

/// Owned rows of a global dense matrix.
fn distribute(rows: &Arc<Layout>, cols: &Arc<Layout>, m: &Mat<f64>) -> CsrMatrix<f64> {
    let (s, e) = rows.ownership_range();
    let mut t = Vec::new();
    for i in s..e {
        for j in 0..m.ncols() {
            if m[(i, j)] != 0.0 {
                t.push((i, j, m[(i, j)]));
            }
        }
    }
    CsrMatrix::from_triplets(rows, cols, &t).unwrap()
}

/// Operators coarsest first, and the interpolation into each level above
/// the coarsest (`interps[l - 1]` feeds level `l`).
struct Hierarchy {
    ops: Vec<Arc<CsrMatrix<f64>>>,
    interps: Vec<Arc<CsrMatrix<f64>>>,
}

impl Hierarchy {
    fn new(comm: &CommRef, levels: usize, n_coarse: usize) -> Self {
        let mut sizes = vec![n_coarse];
        for l in 1..levels {
            sizes.push(2 * sizes[l - 1] + 1);
        }
        let layouts: Vec<Arc<Layout>> = sizes.iter().map(|&n| Layout::split(comm.clone(), n)).collect();

        let mut dense_ops = vec![poisson_dense(sizes[levels - 1])];
        let mut dense_p = Vec::new();
        for l in (1..levels).rev() {
            let p = interpolation_dense(sizes[l - 1]);
            let ap = dense_ops[0].as_ref() * p.as_ref();
            let coarse = p.transpose() * ap.as_ref();
            dense_ops.insert(0, coarse);
            dense_p.insert(0, p);
        }
        let ops = (0..levels).map(|l| Arc::new(distribute(&layouts[l], &layouts[l], &dense_ops[l]))).collect();
        let interps = (1..levels)
            .map(|l| Arc::new(distribute(&layouts[l], &layouts[l - 1], &dense_p[l - 1])))
            .collect();
        Hierarchy { ops, interps }
    }

    fn finest(&self) -> Arc<CsrMatrix<f64>> {
        self.ops[self.ops.len() - 1].clone()
    }

    fn multigrid(&self, comm: &CommRef, mg_type: MgType) -> Multigrid<f64> {
        let n = self.ops.len();
        let mut mg = Multigrid::with_levels(n, comm).unwrap();
        mg.set_type(mg_type);
        for l in 1..n {
            mg.set_interpolation(l, self.interps[l - 1].clone()).unwrap();
        }
        for l in 0..n - 1 {
            let a = self.ops[l].clone();
            mg.smoother(l).unwrap().set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern).unwrap();
        }
        mg
    }

    fn fine_ops(&self) -> PcOperators<f64> {
        PcOperators { amat: self.finest(), pmat: self.finest(), structure: MatStructure::DifferentNonzeroPattern }
    }
}

fn init_logging() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Debug, simplelog::Config::default());
}

fn random_values(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn true_residual(a: &CsrMatrix<f64>, b: &DVector<f64>, x: &DVector<f64>) -> f64 {
    let mut r = b.duplicate();
    a.residual(b, x, &mut r).unwrap();
    r.norm(NormType::L2).unwrap()
}

/// Preconditioner that counts its applications and acts as the identity.
struct Counting {
    visits: Arc<AtomicUsize>,
}

impl Preconditioner<f64> for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }
    fn setup(&mut self, _ops: &PcOperators<f64>) -> Result<(), KError> {
        Ok(())
    }
    fn apply(&mut self, x: &DVector<f64>, y: &mut DVector<f64>) -> Result<(), KError> {
        self.visits.fetch_add(1, Ordering::SeqCst);
        y.copy_from(x);
        Ok(())
    }
}

#[test]
fn test_galerkin_operator_is_the_scaled_coarse_stencil() {
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, 3, 3);
    let coarse = h.ops[0].to_dense().unwrap();
    let expect = poisson_dense(3);
    for i in 0..3 {
        for j in 0..3 {
            assert_relative_eq!(coarse[(i, j)], 0.25 * expect[(i, j)], epsilon = 1e-15);
        }
    }
    assert_eq!(h.ops[1].global_shape(), (7, 7));
    assert_eq!(h.interps[1].global_shape(), (15, 7));
}

#[test]
fn test_vcycle_leaves_exact_solution_unchanged() {
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, 3, 3);
    let mut mg = h.multigrid(&comm, MgType::Multiplicative);
    mg.setup(&h.fine_ops()).unwrap();

    let fine = h.finest();
    let l = fine.row_layout().clone();
    let exact = DVector::from_local(&l, random_values(15, 3)).unwrap();
    let mut b = DVector::zeros(&l);
    fine.apply(&exact, &mut b).unwrap();

    let mut x = exact.duplicate();
    x.copy_from(&exact);
    let tol = Tolerances::new(0.0, 0.0, 1e5, 1).unwrap();
    let out = mg.apply_richardson(&b, &mut x, &tol).unwrap();
    assert_eq!(out.its, 1);
    assert_eq!(out.reason, ConvergedReason::ConvergedIts);
    assert_relative_eq!(x.local(), exact.local(), epsilon = 1e-12);
}

fn coarse_visits(levels: usize, mg_type: MgType, configure: impl Fn(&mut Multigrid<f64>)) -> usize {
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, levels, 3);
    let mut mg = h.multigrid(&comm, mg_type);
    configure(&mut mg);
    let visits = Arc::new(AtomicUsize::new(0));
    mg.coarse_solve().unwrap().set_pc(Box::new(Counting { visits: visits.clone() }));
    mg.setup(&h.fine_ops()).unwrap();
    let l = h.finest().row_layout().clone();
    let b = DVector::from_local(&l, vec![1.0; l.global_len()]).unwrap();
    let mut y = DVector::zeros(&l);
    mg.apply(&b, &mut y).unwrap();
    visits.load(Ordering::SeqCst)
}

#[test]
fn test_cycle_counts_visit_the_coarse_level() {
    assert_eq!(coarse_visits(2, MgType::Multiplicative, |_| {}), 1);
    assert_eq!(
        coarse_visits(2, MgType::Multiplicative, |mg| mg.set_cycles_on_level(1, 2).unwrap()),
        2
    );
    assert_eq!(coarse_visits(3, MgType::Multiplicative, |mg| mg.set_cycles(2).unwrap()), 4);
    assert_eq!(coarse_visits(3, MgType::Multiplicative, |_| {}), 1);
    assert_eq!(coarse_visits(3, MgType::Full, |_| {}), 3);
    assert_eq!(coarse_visits(3, MgType::Kaskade, |_| {}), 1);
    assert_eq!(coarse_visits(3, MgType::Additive, |_| {}), 1);
}

/// GMRES preconditioned with every cycle type on four levels.
#[test]
fn test_every_cycle_type_preconditions_gmres() {
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, 4, 3);
    let fine = h.finest();
    let l = fine.row_layout().clone();
    let b = DVector::from_local(&l, random_values(31, 9)).unwrap();

    for (mg_type, cycles, bound) in [
        (MgType::Multiplicative, 1, 15),
        (MgType::Multiplicative, 2, 15),
        (MgType::Full, 1, 15),
        (MgType::Kaskade, 1, 100),
        (MgType::Additive, 1, 100),
    ] {
        let mut mg = h.multigrid(&comm, mg_type);
        mg.set_cycles(cycles).unwrap();
        let mut ksp = KspContext::new(&comm, SolverKind::default()).unwrap();
        ksp.set_pc(Box::new(mg));
        ksp.set_tolerances(Some(1e-10), None, None, Some(200)).unwrap();
        ksp.set_operators(fine.clone(), fine.clone(), MatStructure::DifferentNonzeroPattern).unwrap();
        let mut x = DVector::zeros(&l);
        let stats = ksp.solve(&b, &mut x).unwrap();
        assert!(stats.converged, "{mg_type} cycles={cycles}: {}", stats.reason);
        assert!(stats.iterations <= bound, "{mg_type}: {} iterations", stats.iterations);
        assert!(true_residual(&fine, &b, &x) < 1e-7 * b.norm(NormType::L2).unwrap());
    }
}

/// Richardson with unit damping hands the whole iteration to multigrid,
/// which stops on the finest pre-smoothed residual.
#[test]
fn test_richardson_multigrid_stops_at_relative_tolerance() {
    init_logging();
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, 4, 3);
    let fine = h.finest();
    let l = fine.row_layout().clone();
    let b = DVector::from_local(&l, random_values(31, 4)).unwrap();

    let mut ksp = KspContext::new(&comm, SolverKind::Richardson { scale: 1.0 }).unwrap();
    ksp.set_pc(Box::new(h.multigrid(&comm, MgType::Multiplicative)));
    ksp.set_tolerances(Some(1e-8), None, None, Some(50)).unwrap();
    ksp.set_operators(fine.clone(), fine.clone(), MatStructure::DifferentNonzeroPattern).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert_eq!(stats.reason, ConvergedReason::ConvergedRtol);
    assert!(stats.iterations < 50);
    assert!(true_residual(&fine, &b, &x) <= 1e-8 * b.norm(NormType::L2).unwrap() * (1.0 + 1e-10));

    // without a tolerance every cycle runs
    ksp.set_tolerances(Some(0.0), Some(0.0), None, Some(3)).unwrap();
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert_eq!(stats.reason, ConvergedReason::ConvergedIts);
    assert_eq!(stats.iterations, 3);
}

#[test]
fn test_options_configure_type_and_smoothers() {
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, 3, 7);
    let fine = h.finest();
    let l = fine.row_layout().clone();
    let mut mg = h.multigrid(&comm, MgType::Multiplicative);
    let db = OptionsDb::from_pairs([
        ("-pc_mg_type", "full"),
        ("-pc_mg_smoothup", "2"),
        ("-mg_levels_pc_sor_symmetric", "true"),
        ("-mg_levels_2_ksp_max_it", "3"),
    ]);
    mg.set_from_options(&db, "").unwrap();
    assert_eq!(mg.mg_type(), MgType::Full);
    assert_eq!(mg.smoother_down(2).unwrap().tolerances().max_its, 3);
    assert_eq!(mg.smoother_up(1).unwrap().tolerances().max_its, 2);
    assert_eq!(mg.coarse_solve().unwrap().pc().name(), "lu");
    let view = mg.view();
    assert!(view.contains("type is full"));
    assert!(view.contains("Up solver (post-smoother) on level 2"));

    let mut ksp = KspContext::new(&comm, SolverKind::default()).unwrap();
    ksp.set_pc(Box::new(mg));
    ksp.set_tolerances(Some(1e-10), None, None, Some(100)).unwrap();
    ksp.set_operators(fine.clone(), fine.clone(), MatStructure::DifferentNonzeroPattern).unwrap();
    let b = DVector::from_local(&l, vec![1.0; l.global_len()]).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert!(stats.converged);
    assert!(stats.iterations <= 10);
}

#[test]
fn test_setup_reports_missing_pieces() {
    let comm = SerialComm::shared();
    let h = Hierarchy::new(&comm, 2, 3);
    let mut mg = Multigrid::<f64>::with_levels(2, &comm).unwrap();
    assert!(matches!(mg.setup(&h.fine_ops()), Err(KError::WrongState(_))));
    mg.set_interpolation(1, h.interps[0].clone()).unwrap();
    assert_eq!(mg.check().unwrap(), 1);
    assert!(matches!(mg.setup(&h.fine_ops()), Err(KError::WrongState(_))));
    assert!(matches!(
        mg.set_interpolation(0, h.interps[0].clone()),
        Err(KError::InvalidArgument(_))
    ));

    let l = h.finest().row_layout().clone();
    let b = DVector::from_local(&l, vec![1.0; 7]).unwrap();
    let mut y = DVector::zeros(&l);
    assert!(matches!(mg.apply(&b, &mut y), Err(KError::WrongState(_))));
}

/// Two ranks: local SOR smoothing and a redundant LU on the coarsest level.
#[test]
fn test_distributed_vcycle_converges() {
    let out = ThreadComm::run(2, |comm: CommRef| {
        let h = Hierarchy::new(&comm, 3, 7);
        let fine = h.finest();
        let l = fine.row_layout().clone();
        let b_global = random_values(l.global_len(), 17);
        let b = DVector::from_global(&l, &b_global).unwrap();

        let mut mg = h.multigrid(&comm, MgType::Multiplicative);
        let coarse_pc = mg.coarse_solve().unwrap().pc().name();
        let mut ksp = KspContext::new(&comm, SolverKind::default()).unwrap();
        ksp.set_pc(Box::new(mg));
        ksp.set_tolerances(Some(1e-10), None, None, Some(100)).unwrap();
        ksp.set_operators(fine.clone(), fine.clone(), MatStructure::DifferentNonzeroPattern).unwrap();
        let mut x = DVector::zeros(&l);
        let stats = ksp.solve(&b, &mut x).unwrap();
        (
            coarse_pc,
            stats.converged,
            stats.iterations,
            true_residual(&fine, &b, &x) / b.norm(NormType::L2).unwrap(),
            x.gather_all().unwrap(),
        )
    });
    for (coarse_pc, converged, its, rel, x) in &out {
        assert_eq!(*coarse_pc, "redundant");
        assert!(converged);
        assert!(*its <= 20);
        assert!(*rel < 1e-7);
        assert_eq!(x, &out[0].4);
    }
}
