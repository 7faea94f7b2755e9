//! Geometric multigrid preconditioner.
//!
//! The hierarchy is a `Vec` of levels, index 0 the coarsest. Each level
//! owns a down smoother (a [`KspContext`]), an optional distinct up
//! smoother, its grid transfers from the next coarser level and its work
//! vectors. The user supplies the transfers and the operators of every
//! level but the finest; the finest level takes the preconditioner's own
//! operators unless its smoother was given some explicitly.
//!
//! Defaults: levels above 0 smooth with one Richardson/SOR sweep (no
//! convergence test, nonzero initial guess); the coarse level solves with
//! one application of LU, replicated when the level spans several ranks.
//!
//! # Cycle types
//! - Multiplicative: V cycle (`cycles = 1`) or W cycle (`cycles = 2`)
//! - Additive: independent level solves, corrections summed
//! - Full: restrict once, then nested M-cycles from the coarsest level up
//! - Kaskade: like full with a single smoother solve per level
//!
//! # References
//! - Briggs, Henson & McCormick, A Multigrid Tutorial, 2nd Edition. SIAM.
//! - Trottenberg, Oosterlee & Schüller, Multigrid. Academic Press.

use std::fmt;

use crate::config::OptionsDb;
use crate::context::KspContext;
use crate::core::traits::{OperatorRef, Scalar};
use crate::core::vector::{DVector, NormType};
use crate::error::KError;
use crate::parallel::CommRef;
use crate::preconditioner::{indent, PcOperators, Preconditioner, RichardsonOutcome};
use crate::utils::convergence::{ConvergedReason, Tolerances};

mod cycle;
mod level;

pub use level::MgLevel;

use cycle::FinestStop;
use level::{default_coarse_solver, default_smoother, LevelWork};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MgType {
    #[default]
    Multiplicative,
    Additive,
    Full,
    Kaskade,
}

impl MgType {
    pub fn name(self) -> &'static str {
        match self {
            MgType::Multiplicative => "multiplicative",
            MgType::Additive => "additive",
            MgType::Full => "full",
            MgType::Kaskade => "kaskade",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, KError> {
        match name.to_ascii_lowercase().as_str() {
            "multiplicative" => Ok(MgType::Multiplicative),
            "additive" => Ok(MgType::Additive),
            "full" => Ok(MgType::Full),
            "kaskade" | "kascade" | "cascade" => Ok(MgType::Kaskade),
            other => Err(KError::InvalidArgument(format!("unknown multigrid type '{other}'"))),
        }
    }
}

impl fmt::Display for MgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of a multigrid hierarchy; the operators and transfers are
/// attached afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MgConfig {
    pub levels: usize,
    pub mg_type: MgType,
    /// 1 for V cycles, 2 for W cycles
    pub cycles: usize,
    /// Pre-smoothing steps; `None` keeps the smoothers' defaults
    pub smooth_down: Option<usize>,
    /// Post-smoothing steps; setting it gives every level a distinct up smoother
    pub smooth_up: Option<usize>,
}

impl Default for MgConfig {
    fn default() -> Self {
        MgConfig { levels: 1, mg_type: MgType::Multiplicative, cycles: 1, smooth_down: None, smooth_up: None }
    }
}

impl MgConfig {
    pub fn validate(&self) -> Result<(), KError> {
        if self.levels == 0 {
            return Err(KError::InvalidArgument("multigrid needs at least one level".into()));
        }
        if self.cycles == 0 {
            return Err(KError::InvalidArgument("multigrid cycle count must be at least 1".into()));
        }
        if self.smooth_down == Some(0) || self.smooth_up == Some(0) {
            return Err(KError::InvalidArgument("smoothing step counts must be at least 1".into()));
        }
        Ok(())
    }
}

pub struct Multigrid<T: Scalar> {
    comm: CommRef,
    levels: Vec<MgLevel<T>>,
    mg_type: MgType,
    /// the finest smoother's operators came from `setup`
    finest_from_pc: bool,
}

impl<T: Scalar> Multigrid<T> {
    /// Empty hierarchy on `comm`; call [`set_levels`](Self::set_levels) next.
    pub fn new(comm: &CommRef) -> Self {
        Multigrid { comm: comm.clone(), levels: Vec::new(), mg_type: MgType::default(), finest_from_pc: false }
    }

    pub fn with_levels(levels: usize, comm: &CommRef) -> Result<Self, KError> {
        let mut mg = Self::new(comm);
        mg.set_levels(levels)?;
        Ok(mg)
    }

    pub fn from_config(cfg: &MgConfig, comm: &CommRef) -> Result<Self, KError> {
        cfg.validate()?;
        let mut mg = Self::with_levels(cfg.levels, comm)?;
        mg.set_type(cfg.mg_type);
        mg.set_cycles(cfg.cycles)?;
        if let Some(n) = cfg.smooth_down {
            mg.set_number_smooth_down(n)?;
        }
        if let Some(n) = cfg.smooth_up {
            mg.set_number_smooth_up(n)?;
        }
        Ok(mg)
    }

    /// Create `levels` levels with default smoothers. Only allowed once.
    pub fn set_levels(&mut self, levels: usize) -> Result<(), KError> {
        if !self.levels.is_empty() {
            return Err(KError::WrongState("number of multigrid levels already set".into()));
        }
        if levels == 0 {
            return Err(KError::InvalidArgument("multigrid needs at least one level".into()));
        }
        for l in 0..levels {
            let smoother = if l == 0 && levels > 1 {
                default_coarse_solver(&self.comm)?
            } else {
                default_smoother(&self.comm)?
            };
            self.levels.push(MgLevel::new(smoother));
        }
        log::debug!("multigrid: created {levels} levels");
        Ok(())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn set_type(&mut self, mg_type: MgType) {
        self.mg_type = mg_type;
    }

    pub fn mg_type(&self) -> MgType {
        self.mg_type
    }

    fn level_mut(&mut self, l: usize) -> Result<&mut MgLevel<T>, KError> {
        let n = self.levels.len();
        if n == 0 {
            return Err(KError::WrongState("multigrid levels must be set first".into()));
        }
        self.levels
            .get_mut(l)
            .ok_or_else(|| KError::InvalidArgument(format!("level {l} out of range for {n} levels")))
    }

    fn fine_level_mut(&mut self, l: usize, what: &str) -> Result<&mut MgLevel<T>, KError> {
        if l == 0 {
            return Err(KError::InvalidArgument(format!("no {what} into the coarsest level")));
        }
        self.level_mut(l)
    }

    /// Cycle count of every level.
    pub fn set_cycles(&mut self, cycles: usize) -> Result<(), KError> {
        if cycles == 0 {
            return Err(KError::InvalidArgument("multigrid cycle count must be at least 1".into()));
        }
        if self.levels.is_empty() {
            return Err(KError::WrongState("multigrid levels must be set first".into()));
        }
        for level in &mut self.levels {
            level.cycles = cycles;
        }
        Ok(())
    }

    /// How many times level `l` recurses into level `l - 1`.
    pub fn set_cycles_on_level(&mut self, l: usize, cycles: usize) -> Result<(), KError> {
        if cycles == 0 {
            return Err(KError::InvalidArgument("multigrid cycle count must be at least 1".into()));
        }
        self.level_mut(l)?.cycles = cycles;
        Ok(())
    }

    /// Interpolation from level `l - 1` to level `l`. Either orientation
    /// is accepted: a tall operator is applied, a wide one transposed.
    pub fn set_interpolation(&mut self, l: usize, op: OperatorRef<T>) -> Result<(), KError> {
        self.fine_level_mut(l, "interpolation")?.interpolate = Some(op);
        Ok(())
    }

    /// Restriction from level `l` to level `l - 1`; defaults to the
    /// interpolation.
    pub fn set_restriction(&mut self, l: usize, op: OperatorRef<T>) -> Result<(), KError> {
        self.fine_level_mut(l, "restriction")?.restrict = Some(op);
        Ok(())
    }

    /// Operator of the residual on level `l`; defaults to the smoother's.
    pub fn set_residual(&mut self, l: usize, op: OperatorRef<T>) -> Result<(), KError> {
        self.level_mut(l)?.residual = Some(op);
        Ok(())
    }

    fn set_work(&mut self, l: usize, v: DVector<T>, pick: fn(&mut LevelWork<T>) -> &mut DVector<T>) -> Result<(), KError> {
        let level = self.level_mut(l)?;
        let work = level.work.get_or_insert_with(|| LevelWork::like(&v));
        let slot = pick(work);
        if !slot.layout().compatible(v.layout()) {
            return Err(KError::InvalidArgument(format!("vector does not match the layout of level {l}")));
        }
        *slot = v;
        Ok(())
    }

    /// Right-hand side storage of level `l`.
    pub fn set_rhs(&mut self, l: usize, b: DVector<T>) -> Result<(), KError> {
        self.set_work(l, b, |w| &mut w.b)
    }

    pub fn set_x(&mut self, l: usize, x: DVector<T>) -> Result<(), KError> {
        self.set_work(l, x, |w| &mut w.x)
    }

    pub fn set_r(&mut self, l: usize, r: DVector<T>) -> Result<(), KError> {
        self.set_work(l, r, |w| &mut w.r)
    }

    /// Down smoother of level `l`; it also post-smooths unless
    /// [`smoother_up`](Self::smoother_up) was requested.
    pub fn smoother(&mut self, l: usize) -> Result<&mut KspContext<T>, KError> {
        self.smoother_down(l)
    }

    pub fn smoother_down(&mut self, l: usize) -> Result<&mut KspContext<T>, KError> {
        Ok(&mut self.level_mut(l)?.smooth_down)
    }

    /// Distinct post-smoother of level `l`, created on first request as a
    /// copy of the down smoother's configuration.
    pub fn smoother_up(&mut self, l: usize) -> Result<&mut KspContext<T>, KError> {
        if l == 0 {
            return Err(KError::InvalidArgument("no up smoother on the coarsest level".into()));
        }
        let level = self.level_mut(l)?;
        if level.smooth_up.is_none() {
            level.smooth_up = Some(level.smooth_down.spawn_like()?);
        }
        level
            .smooth_up
            .as_mut()
            .ok_or_else(|| KError::WrongState(format!("up smoother of level {l} missing")))
    }

    /// Solver of the coarsest level.
    pub fn coarse_solve(&mut self) -> Result<&mut KspContext<T>, KError> {
        self.smoother_down(0)
    }

    /// Pre-smoothing steps on every level above the coarsest.
    pub fn set_number_smooth_down(&mut self, n: usize) -> Result<(), KError> {
        if n == 0 {
            return Err(KError::InvalidArgument("smoothing step counts must be at least 1".into()));
        }
        let first = if self.levels.len() > 1 { 1 } else { 0 };
        for l in first..self.levels.len() {
            self.smoother_down(l)?.set_tolerances(None, None, None, Some(n))?;
        }
        Ok(())
    }

    /// Post-smoothing steps on every level above the coarsest; gives each
    /// of them a distinct up smoother.
    pub fn set_number_smooth_up(&mut self, n: usize) -> Result<(), KError> {
        if n == 0 {
            return Err(KError::InvalidArgument("smoothing step counts must be at least 1".into()));
        }
        for l in 1..self.levels.len() {
            self.smoother_up(l)?.set_tolerances(None, None, None, Some(n))?;
        }
        Ok(())
    }

    /// Count (and log) the pieces still missing before setup can succeed.
    /// The finest level's operators are not counted: setup supplies them.
    pub fn check(&self) -> Result<usize, KError> {
        let n = self.levels.len();
        if n == 0 {
            return Err(KError::WrongState("multigrid levels must be set first".into()));
        }
        let mut missing = 0;
        for (l, level) in self.levels.iter().enumerate() {
            if l > 0 && level.interpolate.is_none() {
                log::warn!("multigrid: no interpolation set on level {l}");
                missing += 1;
            }
            if l + 1 < n && level.residual_operator().is_none() {
                log::warn!("multigrid: no operator set on level {l}");
                missing += 1;
            }
        }
        Ok(missing)
    }

    /// Finest-level work, checked against the vector handed in.
    fn finest_work(&mut self, v: &DVector<T>) -> Result<&mut LevelWork<T>, KError> {
        let l = self.levels.len().checked_sub(1).ok_or_else(|| {
            KError::WrongState("multigrid levels must be set first".into())
        })?;
        let work = self.levels[l]
            .work
            .as_mut()
            .ok_or_else(|| KError::WrongState("multigrid applied before setup".into()))?;
        if !work.b.layout().compatible(v.layout()) {
            return Err(KError::InvalidArgument("vector does not match the finest multigrid level".into()));
        }
        Ok(work)
    }

    fn finest_x(&self) -> Result<&DVector<T>, KError> {
        self.levels
            .last()
            .and_then(|l| l.work.as_ref())
            .map(|w| &w.x)
            .ok_or_else(|| KError::WrongState("multigrid applied before setup".into()))
    }
}

impl<T: Scalar> Preconditioner<T> for Multigrid<T> {
    fn name(&self) -> &'static str {
        "mg"
    }

    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError> {
        let n = self.levels.len();
        if n == 0 {
            return Err(KError::WrongState("multigrid levels must be set before setup".into()));
        }
        let finest = &mut self.levels[n - 1];
        if self.finest_from_pc || finest.smooth_down.operators().is_none() {
            finest.smooth_down.set_operators(ops.amat.clone(), ops.pmat.clone(), ops.structure)?;
            self.finest_from_pc = true;
        }
        let finest_from_pc = self.finest_from_pc;

        for (l, level) in self.levels.iter_mut().enumerate() {
            if l > 0 && level.interpolate.is_none() {
                return Err(KError::WrongState(format!("no interpolation set on multigrid level {l}")));
            }
            let down = level
                .smooth_down
                .operators()
                .cloned()
                .ok_or_else(|| KError::WrongState(format!("no operators set on the level {l} smoother")))?;
            if let Some(up) = level.smooth_up.as_mut() {
                if up.operators().is_none() || (l + 1 == n && finest_from_pc) {
                    up.set_operators(down.amat.clone(), down.pmat.clone(), down.structure)?;
                }
            }
            let a = level
                .residual_operator()
                .ok_or_else(|| KError::WrongState(format!("no operator set on multigrid level {l}")))?;
            match level.work.as_ref().map(|w| w.matches(a.as_ref())) {
                Some(true) => {}
                Some(false) => {
                    return Err(KError::InvalidArgument(format!(
                        "work vectors of multigrid level {l} do not match its operator"
                    )));
                }
                None => level.work = Some(LevelWork::for_operator(a.as_ref())),
            }
            level.smooth_down.set_up()?;
            if let Some(up) = level.smooth_up.as_mut() {
                up.set_up()?;
            }
        }
        log::debug!("multigrid: set up {n} levels, {} cycles", self.mg_type);
        Ok(())
    }

    fn apply(&mut self, b: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        let work = self.finest_work(b)?;
        work.b.copy_from(b);
        work.x.set(T::zero());
        match self.mg_type {
            MgType::Multiplicative => {
                cycle::mcycle(&mut self.levels, None)?;
            }
            MgType::Additive => cycle::acycle(&mut self.levels)?,
            MgType::Full => cycle::fcycle(&mut self.levels)?,
            MgType::Kaskade => cycle::kcycle(&mut self.levels)?,
        }
        y.copy_from(self.finest_x()?);
        Ok(())
    }

    fn has_richardson(&self) -> bool {
        true
    }

    /// Repeated multiplicative cycles with `x` as the initial guess. With a
    /// positive `rtol` (or `atol`) the finest level stops as soon as its
    /// residual after pre-smoothing reaches `max(rtol·‖r₀‖, atol)`.
    fn apply_richardson(
        &mut self,
        b: &DVector<T>,
        x: &mut DVector<T>,
        tol: &Tolerances<T>,
    ) -> Result<RichardsonOutcome, KError> {
        let n = self.levels.len();
        let work = self.finest_work(b)?;
        work.b.copy_from(b);
        work.x.copy_from(x);
        let ttol = if tol.rtol > T::zero() {
            let a = self.levels[n - 1]
                .residual_operator()
                .ok_or_else(|| KError::WrongState("multigrid applied before setup".into()))?;
            let work = self.finest_work(b)?;
            a.residual(&work.b, &work.x, &mut work.r)?;
            let r0 = work.r.norm(NormType::L2)?;
            (tol.rtol * r0).max(tol.atol)
        } else {
            tol.atol
        };
        let stop = (ttol > T::zero()).then_some(FinestStop { ttol, atol: tol.atol });

        let mut its = 0;
        let mut reason = ConvergedReason::Iterating;
        while its < tol.max_its {
            its += 1;
            reason = cycle::mcycle(&mut self.levels, stop.as_ref())?;
            if !reason.is_iterating() {
                break;
            }
        }
        x.copy_from(self.finest_x()?);
        if reason.is_iterating() {
            reason = ConvergedReason::ConvergedIts;
        }
        Ok(RichardsonOutcome { its, reason })
    }

    /// `pc_mg_type`, `pc_mg_cycles`, `pc_mg_smoothup`, `pc_mg_smoothdown`,
    /// then the smoother keys under `mg_coarse_`, `mg_levels_` and
    /// `mg_levels_<l>_`.
    fn set_from_options(&mut self, db: &OptionsDb, prefix: &str) -> Result<(), KError> {
        let key = |k: &str| format!("{prefix}{k}");
        if self.levels.is_empty() {
            self.set_levels(db.get_int(&key("pc_mg_levels"), 1)?)?;
        }
        if let Some(name) = db.get_str(&key("pc_mg_type")) {
            self.mg_type = MgType::from_name(name)?;
        }
        if db.has(&key("pc_mg_cycles")) {
            self.set_cycles(db.get_int(&key("pc_mg_cycles"), 1)?)?;
        }
        if db.has(&key("pc_mg_smoothup")) {
            self.set_number_smooth_up(db.get_int(&key("pc_mg_smoothup"), 1)?)?;
        }
        if db.has(&key("pc_mg_smoothdown")) {
            self.set_number_smooth_down(db.get_int(&key("pc_mg_smoothdown"), 1)?)?;
        }
        let n = self.levels.len();
        for (l, level) in self.levels.iter_mut().enumerate() {
            let prefixes = if l == 0 && n > 1 {
                vec![key("mg_coarse_")]
            } else {
                vec![key("mg_levels_"), key(&format!("mg_levels_{l}_"))]
            };
            for p in &prefixes {
                level.smooth_down.set_from_options(db, p)?;
                if let Some(up) = level.smooth_up.as_mut() {
                    up.set_from_options(db, p)?;
                }
            }
        }
        Ok(())
    }

    fn view(&self) -> String {
        let cycles = self.levels.last().map_or(1, |l| l.cycles());
        let mut out = format!(
            "PC type: mg\n  MG: type is {}, levels={} cycles={}",
            self.mg_type,
            self.levels.len(),
            cycles
        );
        for (l, level) in self.levels.iter().enumerate() {
            out.push_str(&format!("\n  Down solver (pre-smoother) on level {l}\n"));
            out.push_str(&indent(&indent(&level.smooth_down.view())));
            match &level.smooth_up {
                Some(up) => {
                    out.push_str(&format!("\n  Up solver (post-smoother) on level {l}\n"));
                    out.push_str(&indent(&indent(&up.view())));
                }
                None => out.push_str("\n  Up solver same as down solver"),
            }
        }
        out
    }
}
