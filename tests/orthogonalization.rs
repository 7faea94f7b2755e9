//! Gram-Schmidt orthogonalization tests for kspmg
//!
//! Arnoldi runs with modified and classical Gram-Schmidt must produce the
//! same orthonormal basis and Hessenberg matrix on well-conditioned
//! problems, on one rank and spread over several in-process ranks.
//! The conditional refinement of classical Gram-Schmidt is checked on
//! vectors built to trigger or avoid it.

use approx::assert_relative_eq;
use faer::Mat;
use kspmg::core::{DVector, Layout, LinearOperator, NormType};
use kspmg::matrix::{CsrMatrix, DenseMatrix};
use kspmg::parallel::{CommRef, ThreadComm};
use kspmg::solver::{CgsRefinement, KrylovState, Orthogonalization, CGS_REFINE_THRESHOLD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Diagonally dominant nonsymmetric matrix with seeded random entries.
fn random_matrix(n: usize, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Mat::<f64>::zeros(n, n);
    for j in 0..n {
        for i in 0..n {
            a[(i, j)] = rng.gen_range(-1.0..1.0) / (n as f64).sqrt();
        }
        a[(j, j)] += 3.0;
    }
    a
}

fn random_values(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// `k` Arnoldi steps from `v0`.
fn arnoldi(a: &dyn LinearOperator<f64>, v0: &DVector<f64>, k: usize, orth: &Orthogonalization) -> KrylovState<f64> {
    let beta = v0.norm(NormType::L2).unwrap();
    let mut v = v0.duplicate();
    v.copy_from(v0);
    v.scale(1.0 / beta);
    let mut state = KrylovState::new(k);
    state.start(&v, beta);
    let mut w = v0.duplicate();
    for j in 0..k {
        a.apply(&state.basis()[j], &mut w).unwrap();
        state.extend(&mut w, orth).unwrap();
    }
    state
}

fn max_orthogonality_defect(basis: &[DVector<f64>]) -> f64 {
    let mut worst = 0.0f64;
    for (i, vi) in basis.iter().enumerate() {
        for (j, vj) in basis.iter().enumerate() {
            let expect = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((vi.dot(vj).unwrap() - expect).abs());
        }
    }
    worst
}

#[test]
fn test_mgs_and_cgs_agree_on_arnoldi() {
    let n = 40;
    let k = 12;
    let a = DenseMatrix::new(random_matrix(n, 11));
    let l = Layout::sequential(n);
    let v0 = DVector::from_local(&l, random_values(n, 12)).unwrap();

    let mgs = arnoldi(&a, &v0, k, &Orthogonalization::Modified);
    let cgs = arnoldi(&a, &v0, k, &Orthogonalization::classical(CgsRefinement::Never));
    let cgs2 = arnoldi(&a, &v0, k, &Orthogonalization::classical(CgsRefinement::Always));

    for state in [&mgs, &cgs, &cgs2] {
        assert_eq!(state.dim(), k);
        assert_eq!(state.basis().len(), k + 1);
    }
    // one pass loses orthogonality in proportion to the basis condition
    // number; the second pass restores it to working precision
    assert!(max_orthogonality_defect(mgs.basis()) < 1e-5);
    assert!(max_orthogonality_defect(cgs.basis()) < 1e-5);
    assert!(max_orthogonality_defect(cgs2.basis()) < 1e-12);
    for j in 0..k {
        for i in 0..=j + 1 {
            assert_relative_eq!(mgs.hessenberg()[(i, j)], cgs.hessenberg()[(i, j)], epsilon = 1e-10);
            assert_relative_eq!(mgs.hessenberg()[(i, j)], cgs2.hessenberg()[(i, j)], epsilon = 1e-10);
        }
        for i in j + 2..=k {
            assert_eq!(mgs.hessenberg()[(i, j)], 0.0);
        }
    }
}

/// `A V_k = V_{k+1} H_k` holds column by column.
#[test]
fn test_arnoldi_relation() {
    let n = 30;
    let k = 8;
    let a = DenseMatrix::new(random_matrix(n, 5));
    let l = Layout::sequential(n);
    let v0 = DVector::from_local(&l, random_values(n, 6)).unwrap();
    let state = arnoldi(&a, &v0, k, &Orthogonalization::classical(CgsRefinement::IfNeeded));
    let h = state.hessenberg();
    let mut av = DVector::zeros(&l);
    for j in 0..k {
        a.apply(&state.basis()[j], &mut av).unwrap();
        for i in 0..=j + 1 {
            av.axpy(-h[(i, j)], &state.basis()[i]);
        }
        assert!(av.norm(NormType::L2).unwrap() < 1e-11);
    }
}

/// Distributed Arnoldi on three ranks reproduces the single-rank
/// Hessenberg matrix for both orthogonalization schemes.
#[test]
fn test_distributed_arnoldi_matches_serial() {
    let n = 24;
    let k = 6;
    let dense = random_matrix(n, 21);
    let v0_vals = random_values(n, 22);
    let triplets: Vec<(usize, usize, f64)> =
        (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| (i, j, dense[(i, j)])).collect();

    let serial = {
        let l = Layout::sequential(n);
        let a = CsrMatrix::from_triplets(&l, &l, &triplets).unwrap();
        let v0 = DVector::from_local(&l, v0_vals.clone()).unwrap();
        arnoldi(&a, &v0, k, &Orthogonalization::Modified).hessenberg().clone()
    };

    let per_rank = ThreadComm::run(3, |comm: CommRef| {
        let l = Layout::split(comm, n);
        let a = CsrMatrix::from_triplets(&l, &l, &triplets).unwrap();
        let v0 = DVector::from_global(&l, &v0_vals).unwrap();
        let schemes = [Orthogonalization::Modified, Orthogonalization::classical(CgsRefinement::IfNeeded)];
        schemes
            .iter()
            .map(|orth| arnoldi(&a, &v0, k, orth).hessenberg().clone())
            .collect::<Vec<_>>()
    });
    for hs in &per_rank {
        for h in hs {
            for j in 0..k {
                for i in 0..=j + 1 {
                    assert_relative_eq!(h[(i, j)], serial[(i, j)], epsilon = 1e-10);
                }
            }
        }
    }
}

/// The refinement pass runs only when the projection removed most of `w`.
#[test]
fn test_cgs_if_needed_refinement_trigger() {
    let l = Layout::sequential(3);
    let e0 = DVector::from_local(&l, vec![1.0, 0.0, 0.0]).unwrap();
    let orth = Orthogonalization::classical(CgsRefinement::IfNeeded);

    // nearly parallel to the basis: ‖w'‖ ≪ ‖h‖
    let mut w = DVector::from_local(&l, vec![1.0, 1e-3, 0.0]).unwrap();
    let mut h = vec![0.0];
    let out = orth.orthogonalize(std::slice::from_ref(&e0), &mut w, &mut h).unwrap();
    assert!(out.refined);
    assert_eq!(out.passes, 2);
    assert_relative_eq!(h[0], 1.0, epsilon = 1e-15);

    // mostly orthogonal: ‖w'‖ = 1 ≥ 1.0286 · 0.5
    let mut w = DVector::from_local(&l, vec![0.5, 1.0, 0.0]).unwrap();
    let out = orth.orthogonalize(std::slice::from_ref(&e0), &mut w, &mut h).unwrap();
    assert!(!out.refined);
    assert_eq!(out.passes, 1);
    assert_relative_eq!(h[0], 0.5, epsilon = 1e-15);
    assert_eq!(w.local(), &[0.0, 1.0, 0.0]);

    // either side of ‖w'‖ / ‖h‖ = threshold
    let mut w = DVector::from_local(&l, vec![1.0, 1.001 * CGS_REFINE_THRESHOLD, 0.0]).unwrap();
    assert!(!orth.orthogonalize(std::slice::from_ref(&e0), &mut w, &mut h).unwrap().refined);
    let mut w = DVector::from_local(&l, vec![1.0, 0.999 * CGS_REFINE_THRESHOLD, 0.0]).unwrap();
    assert!(orth.orthogonalize(std::slice::from_ref(&e0), &mut w, &mut h).unwrap().refined);

    let never = Orthogonalization::classical(CgsRefinement::Never);
    let mut w = DVector::from_local(&l, vec![1.0, 1e-3, 0.0]).unwrap();
    assert!(!never.orthogonalize(std::slice::from_ref(&e0), &mut w, &mut h).unwrap().refined);

    let always = Orthogonalization::classical(CgsRefinement::Always);
    let mut w = DVector::from_local(&l, vec![0.0, 1.0, 0.0]).unwrap();
    let out = always.orthogonalize(std::slice::from_ref(&e0), &mut w, &mut h).unwrap();
    assert!(out.refined);
    assert_eq!(h[0], 0.0);
}
