//! Tests for the Krylov methods behind `KspContext` against faer direct solves.
//!
//! Random diagonally dominant systems are solved with GMRES (left and right
//! preconditioned, both Gram-Schmidt variants), CG and FGMRES with an inner
//! Krylov preconditioner, and the results are compared elementwise with a
//! full-pivoting LU from faer.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use faer::Mat;
use faer::linalg::solvers::SolveCore;
use kspmg::config::OptionsDb;
use kspmg::core::{DVector, Layout, LinearOperator, MatStructure, NormType};
use kspmg::error::KError;
use kspmg::matrix::{CsrMatrix, DenseMatrix};
use kspmg::parallel::{CommRef, SerialComm, ThreadComm};
use kspmg::preconditioner::{Identity, PcType, SorConfig};
use kspmg::solver::{
    CgsRefinement, GmresConfig, GmresSolver, KrylovMethod, Orthogonalization, Preconditioning,
};
use kspmg::utils::{ConvergedReason, Convergence, Tolerances};
use kspmg::{KspContext, SolverKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random nonsymmetric matrix with a dominant diagonal and a random
/// right-hand side.
fn random_nonsymmetric(n: usize, seed: u64) -> (Mat<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Mat::<f64>::zeros(n, n);
    for j in 0..n {
        for i in 0..n {
            a[(i, j)] = rng.gen_range(-1.0..1.0) / (n as f64).sqrt();
        }
        a[(j, j)] += 2.0 + rng.gen_range(0.0..2.0);
    }
    let b = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    (a, b)
}

/// `A = Mᵀ M + I` with a random `M`.
fn random_spd(n: usize, seed: u64) -> (Mat<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut m = Mat::<f64>::zeros(n, n);
    for j in 0..n {
        for i in 0..n {
            m[(i, j)] = rng.gen_range(0.0..1.0);
        }
    }
    let a = m.transpose() * m.as_ref() + Mat::<f64>::identity(n, n);
    let b = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
    (a, b)
}

fn direct_solve(a: &Mat<f64>, b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = b.to_vec();
    let lu = faer::linalg::solvers::PartialPivLu::new(a.as_ref());
    let x_mat = faer::MatMut::from_column_major_slice_mut(&mut x, n, 1);
    lu.solve_in_place_with_conj(faer::Conj::No, x_mat);
    assert!(x.iter().all(|v| v.is_finite()), "reference solve produced non-finite values");
    x
}

fn solve_dense(a: Mat<f64>, b: &[f64], kind: SolverKind, pc: PcType) -> (Vec<f64>, usize) {
    let comm = SerialComm::shared();
    let n = b.len();
    let a = Arc::new(DenseMatrix::new(a));
    let mut ksp = KspContext::new(&comm, kind).unwrap();
    ksp.set_pc_type(pc).unwrap();
    ksp.set_tolerances(Some(1e-12), None, None, Some(1000)).unwrap();
    ksp.set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern).unwrap();
    let l = Layout::sequential(n);
    let rhs = DVector::from_local(&l, b.to_vec()).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve(&rhs, &mut x).unwrap();
    assert!(stats.converged, "{} stopped with {}", kind.name(), stats.reason);
    (x.local().to_vec(), stats.iterations)
}

/// Sparse nonsymmetric convection-diffusion operator on `n` points.
fn convection_diffusion(rows: &Arc<Layout>) -> CsrMatrix<f64> {
    let n = rows.global_len();
    let (s, e) = rows.ownership_range();
    let mut t = Vec::new();
    for i in s..e {
        t.push((i, i, 2.2));
        if i > 0 {
            t.push((i, i - 1, -1.4));
        }
        if i + 1 < n {
            t.push((i, i + 1, -0.6));
        }
    }
    CsrMatrix::from_triplets(rows, rows, &t).unwrap()
}

#[test]
fn cg_vs_direct_on_spd() {
    let n = 12;
    let (a, b) = random_spd(n, 1);
    let x_direct = direct_solve(&a, &b);
    for pc in [PcType::None, PcType::Jacobi] {
        let (x, _) = solve_dense(a.clone(), &b, SolverKind::Cg, pc);
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-6);
        }
    }
}

#[test]
fn gmres_left_and_right_vs_direct() {
    let n = 25;
    let (a, b) = random_nonsymmetric(n, 2);
    let x_direct = direct_solve(&a, &b);
    for side in [Preconditioning::Left, Preconditioning::Right, Preconditioning::None] {
        let cfg = GmresConfig { preconditioning: side, restart: 10, ..GmresConfig::default() };
        let (x, its) = solve_dense(a.clone(), &b, SolverKind::Gmres(cfg), PcType::Jacobi);
        assert!(its > 0);
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-8);
        }
    }
}

/// Classical Gram-Schmidt with and without refinement follows modified
/// Gram-Schmidt iteration for iteration on a well-conditioned system.
#[test]
fn gmres_orthogonalization_variants_agree() {
    let n = 30;
    let (dense, b) = random_nonsymmetric(n, 3);
    let a = DenseMatrix::new(dense);
    let l = Layout::sequential(n);
    let rhs = DVector::from_local(&l, b).unwrap();
    let tol = Tolerances::new(1e-10, 1e-50, 1e5, 500).unwrap();

    let mut results = Vec::new();
    for orthog in [
        Orthogonalization::Modified,
        Orthogonalization::classical(CgsRefinement::Never),
        Orthogonalization::classical(CgsRefinement::IfNeeded),
        Orthogonalization::classical(CgsRefinement::Always),
    ] {
        let mut solver = GmresSolver::<f64>::new(GmresConfig { orthog, ..GmresConfig::default() }).unwrap();
        let mut conv = Convergence::new(tol);
        let mut x = DVector::zeros(&l);
        let stats = solver.solve(&a, &mut Identity, &rhs, &mut x, &mut conv).unwrap();
        assert_eq!(stats.reason, ConvergedReason::ConvergedRtol);
        results.push((stats.iterations, solver.refinements(), x));
    }
    let (its0, _, x0) = &results[0];
    for (its, _, x) in &results[1..] {
        assert!(its.abs_diff(*its0) <= 1);
        for i in 0..n {
            assert_abs_diff_eq!(x.local()[i], x0.local()[i], epsilon = 1e-9);
        }
    }
    assert_eq!(results[1].1, 0);
    // one refinement pass per Arnoldi step
    assert_eq!(results[3].1, results[3].0);
    assert!(results[2].1 <= results[3].1);
}

/// FGMRES around an inner GMRES that is cut off after three iterations:
/// the preconditioner changes with every application.
#[test]
fn fgmres_with_inexact_inner_krylov() {
    let comm = SerialComm::shared();
    let n = 60;
    let l = Layout::sequential(n);
    let a = Arc::new(convection_diffusion(&l));
    let mut ksp = KspContext::new(&comm, SolverKind::Fgmres(GmresConfig::default())).unwrap();
    let db = OptionsDb::from_pairs([
        ("-pc_type", "ksp"),
        ("-ksp_ksp_type", "gmres"),
        ("-ksp_ksp_max_it", "3"),
        ("-ksp_pc_type", "sor"),
        ("-ksp_rtol", "1e-10"),
    ]);
    ksp.set_from_options(&db, "").unwrap();
    assert_eq!(ksp.pc().name(), "ksp");
    assert!(ksp.view().contains("KSP type: gmres"));
    ksp.set_operators(a.clone(), a.clone(), MatStructure::DifferentNonzeroPattern).unwrap();

    let b = DVector::from_local(&l, (0..n).map(|i| (i as f64 * 0.3).sin()).collect()).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert_eq!(stats.reason, ConvergedReason::ConvergedRtol);

    let mut r = DVector::zeros(&l);
    a.residual(&b, &x, &mut r).unwrap();
    assert!(r.norm(NormType::L2).unwrap() < 1e-9 * b.norm(NormType::L2).unwrap());
}

/// `Aᵀ x = b` through the transposed operator and preconditioner.
#[test]
fn gmres_transpose_solve() {
    let comm = SerialComm::shared();
    let n = 20;
    let (dense, b) = random_nonsymmetric(n, 4);
    let mut at = Mat::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            at[(i, j)] = dense[(j, i)];
        }
    }
    let x_direct = direct_solve(&at, &b);

    let a = Arc::new(DenseMatrix::new(dense));
    let mut ksp = KspContext::new(&comm, SolverKind::default()).unwrap();
    ksp.set_pc_type(PcType::Jacobi).unwrap();
    ksp.set_tolerances(Some(1e-12), None, None, None).unwrap();
    ksp.set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern).unwrap();
    let l = Layout::sequential(n);
    let rhs = DVector::from_local(&l, b).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve_transpose(&rhs, &mut x).unwrap();
    assert!(stats.converged);
    for i in 0..n {
        assert_abs_diff_eq!(x.local()[i], x_direct[i], epsilon = 1e-8);
    }
}

#[test]
fn monitor_and_history_see_every_check() {
    let comm = SerialComm::shared();
    let n = 40;
    let l = Layout::sequential(n);
    let a = Arc::new(convection_diffusion(&l));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();

    let mut ksp = KspContext::new(&comm, SolverKind::default()).unwrap();
    ksp.set_pc_type(PcType::Sor(SorConfig::default())).unwrap();
    ksp.set_residual_history(true);
    ksp.set_monitor(move |its, rnorm| sink.borrow_mut().push((its, rnorm)));
    ksp.set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern).unwrap();
    let b = DVector::from_local(&l, vec![1.0; n]).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert!(stats.converged);

    let seen = seen.borrow();
    let history = ksp.residual_history().unwrap();
    assert_eq!(history.len(), seen.len());
    assert_eq!(seen[0].0, 0);
    assert_eq!(seen.last().unwrap().0, stats.iterations);
    for (h, (_, m)) in history.iter().zip(seen.iter()) {
        assert_eq!(h, m);
    }
    // GMRES residuals never grow within a cycle
    for w in history.windows(2) {
        assert!(w[1] <= w[0] * (1.0 + 1e-12));
    }
}

/// Undamped Richardson on an operator with spectrum around 3 blows up.
#[test]
fn richardson_divergence_is_detected() {
    let comm = SerialComm::shared();
    let n = 5;
    let l = Layout::sequential(n);
    let a = Arc::new(CsrMatrix::from_triplets(&l, &l, &(0..n).map(|i| (i, i, 3.0)).collect::<Vec<_>>()).unwrap());
    let mut ksp = KspContext::new(&comm, SolverKind::Richardson { scale: 1.0 }).unwrap();
    ksp.set_tolerances(None, None, Some(1e3), Some(100)).unwrap();
    ksp.set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern).unwrap();
    let b = DVector::from_local(&l, vec![1.0; n]).unwrap();
    let mut x = DVector::zeros(&l);
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert_eq!(stats.reason, ConvergedReason::DivergedDtol);
    assert!(!stats.converged);
    assert_eq!(ksp.converged_reason(), ConvergedReason::DivergedDtol);

    // damping 1/3 makes it a direct solve
    ksp.set_type(SolverKind::Richardson { scale: 1.0 / 3.0 }).unwrap();
    let stats = ksp.solve(&b, &mut x).unwrap();
    assert!(stats.converged);
    assert!(stats.iterations <= 2);
}

#[test]
fn options_select_method_and_reject_unknown_names() {
    let comm = SerialComm::shared();
    let mut ksp = KspContext::<f64>::new(&comm, SolverKind::default()).unwrap();
    let db = OptionsDb::from_pairs([("-ksp_type", "cg"), ("-pc_type", "jacobi"), ("-ksp_max_it", "7")]);
    ksp.set_from_options(&db, "").unwrap();
    assert_eq!(ksp.kind(), SolverKind::Cg);
    assert_eq!(ksp.pc().name(), "jacobi");
    assert_eq!(ksp.tolerances().max_its, 7);

    let bad = OptionsDb::from_pairs([("-ksp_type", "bogus")]);
    assert!(matches!(ksp.set_from_options(&bad, ""), Err(KError::InvalidArgument(_))));
    let bad = OptionsDb::from_pairs([("-ksp_gmres_cgs_refinement_type", "sometimes"), ("-ksp_type", "gmres")]);
    assert!(matches!(ksp.set_from_options(&bad, ""), Err(KError::InvalidArgument(_))));
}

/// Distributed GMRES with local SOR on three ranks matches the serial
/// direct solution.
#[test]
fn gmres_on_threads_matches_direct() {
    let n = 30;
    let serial = {
        let l = Layout::sequential(n);
        convection_diffusion(&l).to_dense().unwrap()
    };
    let b_global: Vec<f64> = (0..n).map(|i| 1.0 + (i % 4) as f64).collect();
    let x_direct = direct_solve(&serial, &b_global);

    let out = ThreadComm::run(3, |comm: CommRef| {
        let l = Layout::split(comm.clone(), n);
        let a = Arc::new(convection_diffusion(&l));
        let mut ksp = KspContext::new(&comm, SolverKind::default()).unwrap();
        let db = OptionsDb::from_pairs([("-pc_type", "sor"), ("-pc_sor_local_symmetric", "1"), ("-ksp_rtol", "1e-12")]);
        ksp.set_from_options(&db, "").unwrap();
        ksp.set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern).unwrap();
        let b = DVector::from_global(&l, &b_global).unwrap();
        let mut x = DVector::zeros(&l);
        let stats = ksp.solve(&b, &mut x).unwrap();
        (stats.converged, x.gather_all().unwrap())
    });
    for (converged, x) in out {
        assert!(converged);
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_direct[i], epsilon = 1e-8);
        }
    }
}
