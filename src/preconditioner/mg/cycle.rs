//! Multigrid cycles over a slice of levels, coarsest first.
//!
//! Every cycle reads the right-hand side from the finest level's `b` and
//! leaves the correction in its `x`. Failures of a smoother or a transfer
//! abort the cycle and propagate.

use crate::core::traits::Scalar;
use crate::core::vector::NormType;
use crate::error::KError;
use crate::preconditioner::mg::level::{interpolate, restrict, LevelWork, MgLevel};
use crate::utils::convergence::ConvergedReason;

/// Early exit of a Richardson-mode cycle, checked on the finest level
/// after pre-smoothing.
pub(crate) struct FinestStop<T> {
    pub ttol: T,
    pub atol: T,
}

fn not_set_up(l: usize) -> KError {
    KError::WrongState(format!("multigrid level {l} used before setup"))
}

fn missing(what: &str, l: usize) -> KError {
    KError::WrongState(format!("no {what} on multigrid level {l}"))
}

fn work_mut<T: Scalar>(level: &mut MgLevel<T>, l: usize) -> Result<&mut LevelWork<T>, KError> {
    level.work.as_mut().ok_or_else(|| not_set_up(l))
}

/// Run the down smoother on `b`, `x` of one level.
fn smooth<T: Scalar>(level: &mut MgLevel<T>, l: usize) -> Result<(), KError> {
    let work = level.work.as_mut().ok_or_else(|| not_set_up(l))?;
    level.smooth_down.solve(&work.b, &mut work.x)?;
    Ok(())
}

/// One V or W cycle from the last level of `levels` down to level 0.
///
/// Returns the converged reason when `stop` ended the cycle early,
/// `Iterating` otherwise.
pub(crate) fn mcycle<T: Scalar>(
    levels: &mut [MgLevel<T>],
    stop: Option<&FinestStop<T>>,
) -> Result<ConvergedReason, KError> {
    let Some((level, coarser)) = levels.split_last_mut() else {
        return Err(KError::WrongState("multigrid has no levels".into()));
    };
    let l = coarser.len();
    if l == 0 {
        smooth(level, 0)?;
        return Ok(ConvergedReason::Iterating);
    }

    let a = level.residual_operator().ok_or_else(|| missing("residual operator", l))?;
    let r_op = level.restriction().ok_or_else(|| missing("restriction", l))?;
    let p_op = level.interpolation().ok_or_else(|| missing("interpolation", l))?;
    let cycles = level.cycles();

    let work = level.work.as_mut().ok_or_else(|| not_set_up(l))?;
    level.smooth_down.solve(&work.b, &mut work.x)?;
    a.residual(&work.b, &work.x, &mut work.r)?;

    if let Some(stop) = stop {
        let rnorm = work.r.norm(NormType::L2)?;
        if rnorm <= stop.ttol {
            let reason = if rnorm < stop.atol {
                log::info!("multigrid converged: residual norm {rnorm:e} below absolute tolerance {:e}", stop.atol);
                ConvergedReason::ConvergedAtol
            } else {
                log::info!("multigrid converged: residual norm {rnorm:e} below {:e}", stop.ttol);
                ConvergedReason::ConvergedRtol
            };
            return Ok(reason);
        }
    }

    {
        let coarse = coarser.last_mut().ok_or_else(|| not_set_up(l - 1))?;
        let cw = work_mut(coarse, l - 1)?;
        restrict(r_op.as_ref(), &work.r, &mut cw.b)?;
        cw.x.set(T::zero());
    }
    for _ in 0..cycles {
        mcycle(coarser, None)?;
    }
    let coarse = coarser.last().and_then(|c| c.work.as_ref()).ok_or_else(|| not_set_up(l - 1))?;
    interpolate(p_op.as_ref(), &coarse.x, &mut work.t)?;
    work.x.axpy(T::one(), &work.t);

    match level.smooth_up.as_mut() {
        Some(up) => up.solve(&work.b, &mut work.x)?,
        None => level.smooth_down.solve(&work.b, &mut work.x)?,
    };
    log::debug!("multigrid: finished level {l}");
    Ok(ConvergedReason::Iterating)
}

/// Restrict the finest right-hand side through every level.
fn restrict_rhs<T: Scalar>(levels: &mut [MgLevel<T>]) -> Result<(), KError> {
    for l in (1..levels.len()).rev() {
        let (lo, hi) = levels.split_at_mut(l);
        let fine = &hi[0];
        let op = fine.restriction().ok_or_else(|| missing("restriction", l))?;
        let fw = fine.work.as_ref().ok_or_else(|| not_set_up(l))?;
        let cw = work_mut(&mut lo[l - 1], l - 1)?;
        restrict(op.as_ref(), &fw.b, &mut cw.b)?;
    }
    Ok(())
}

/// Carry the iterate of level `l - 1` to level `l`, added to or replacing
/// the iterate there.
fn prolong<T: Scalar>(levels: &mut [MgLevel<T>], l: usize, add: bool) -> Result<(), KError> {
    let (lo, hi) = levels.split_at_mut(l);
    let fine = &mut hi[0];
    let op = fine.interpolation().ok_or_else(|| missing("interpolation", l))?;
    let cw = lo[l - 1].work.as_ref().ok_or_else(|| not_set_up(l - 1))?;
    let fw = work_mut(fine, l)?;
    if add {
        interpolate(op.as_ref(), &cw.x, &mut fw.t)?;
        fw.x.axpy(T::one(), &fw.t);
    } else {
        interpolate(op.as_ref(), &cw.x, &mut fw.x)?;
    }
    Ok(())
}

/// Additive cycle: every level smooths its restricted right-hand side
/// from a zero guess, then the corrections are summed upward.
pub(crate) fn acycle<T: Scalar>(levels: &mut [MgLevel<T>]) -> Result<(), KError> {
    restrict_rhs(levels)?;
    for (l, level) in levels.iter_mut().enumerate() {
        work_mut(level, l)?.x.set(T::zero());
        smooth(level, l)?;
    }
    for l in 1..levels.len() {
        prolong(levels, l, true)?;
    }
    Ok(())
}

/// Full multigrid: after restricting the right-hand side, each level from
/// the coarsest up runs one M-cycle and hands its iterate to the next
/// finer level as initial guess.
pub(crate) fn fcycle<T: Scalar>(levels: &mut [MgLevel<T>]) -> Result<(), KError> {
    let n = levels.len();
    restrict_rhs(levels)?;
    if let Some(coarsest) = levels.first_mut() {
        work_mut(coarsest, 0)?.x.set(T::zero());
    }
    for l in 0..n.saturating_sub(1) {
        mcycle(&mut levels[..=l], None)?;
        prolong(levels, l + 1, false)?;
    }
    mcycle(levels, None)?;
    Ok(())
}

/// Kaskade cycle: like [`fcycle`] with a single smoother solve in place
/// of each M-cycle.
pub(crate) fn kcycle<T: Scalar>(levels: &mut [MgLevel<T>]) -> Result<(), KError> {
    let n = levels.len();
    restrict_rhs(levels)?;
    if let Some(coarsest) = levels.first_mut() {
        work_mut(coarsest, 0)?.x.set(T::zero());
    }
    for l in 0..n.saturating_sub(1) {
        smooth(&mut levels[l], l)?;
        prolong(levels, l + 1, false)?;
    }
    if let Some(finest) = levels.last_mut() {
        smooth(finest, n - 1)?;
    }
    Ok(())
}
