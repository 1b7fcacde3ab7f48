//! The MCMC parameter state set: a double-buffered registry of every
//! model parameter with atomic accept/reject.
//!
//! Every parameter kind exists in exactly two value slots; a single
//! active index names the buffer all readers see. A proposal mutates the
//! active buffer through [`ParameterStateSet::active_mut`], which marks
//! the slot dirty. [`ParameterStateSet::accept`] copies dirty slots
//! active→inactive and [`ParameterStateSet::reject`] copies them
//! inactive→active, so after either resolution both buffers of every
//! kind are identical again. Several parameters derive cached state from
//! shared structures (the tree above all); resolving at the level of the
//! whole registry rather than the proposed kind is what keeps
//! cross-parameter state consistent.

use crate::calibration::{Calibration, CalibrationKind};
use crate::fossil_graph::FossilOccurrenceGraph;
use crate::speciation::{SpeciationProcess, TreeTimePrior};
use crate::tree::TimeTree;
use divtime_core::prob::safe_exponentiation;
use divtime_core::{DivtimeError, Result};
use rand::Rng;

/// A 4x4 nucleotide transition probability matrix, as produced by the
/// external transition-probability collaborator.
pub type TransitionMatrix = [[f64; 4]; 4];

/// Number of discrete gamma rate categories.
pub const NUM_GAMMA_CATS: usize = 4;

/// Alignment collaborator: only the dimensions are needed here, to size
/// per-node and per-site buffers.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentInfo {
    pub num_taxa: usize,
    pub num_chars: usize,
}

/// Move classes that can be permanently disabled by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveClass {
    Basefreq,
    Exchangeability,
    Shape,
    NodeTimes,
    NodeRates,
    Concentration,
    Speciation,
}

/// Structural configuration of the analysis; the explicit context object
/// every component receives instead of ambient globals.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub tree_time_prior: TreeTimePrior,
    /// A move class disabled for the whole run, if any.
    pub turned_off_move: Option<MoveClass>,
    /// Clock rate pinned to a fixed value instead of being estimated.
    pub fixed_clock_rate: Option<f64>,
    pub fix_root_height: bool,
    /// Hyperpriors on exponential calibration rates are being sampled.
    pub exponential_calib_hyperprior: bool,
    /// Base frequencies and shape held fixed.
    pub fix_substitution_params: bool,
    /// Initial speciation process rates (lambda, mu, psi, rho).
    pub birth_rate: f64,
    pub death_rate: f64,
    pub fossil_rate: f64,
    pub extant_sample_rate: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            tree_time_prior: TreeTimePrior::ConditionedBirthDeath,
            turned_off_move: None,
            fixed_clock_rate: None,
            fix_root_height: false,
            exponential_calib_hyperprior: false,
            fix_substitution_params: false,
            birth_rate: 1.0,
            death_rate: 0.5,
            fossil_rate: 0.1,
            extant_sample_rate: 1.0,
        }
    }
}

/// Discriminant of the parameter registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Basefreq,
    Exchangeability,
    Shape,
    Tree,
    NodeRate,
    ConcentrationHyperprior,
    TreeScale,
    Speciation,
    ExpCalibHyperprior,
    FossilGraph,
}

impl ParameterKind {
    /// All kinds, in registry order.
    pub const ALL: [ParameterKind; 10] = [
        ParameterKind::Basefreq,
        ParameterKind::Exchangeability,
        ParameterKind::Shape,
        ParameterKind::Tree,
        ParameterKind::NodeRate,
        ParameterKind::ConcentrationHyperprior,
        ParameterKind::TreeScale,
        ParameterKind::Speciation,
        ParameterKind::ExpCalibHyperprior,
        ParameterKind::FossilGraph,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|&k| k == self).unwrap()
    }
}

/// Per-branch substitution rates under the Dirichlet-process clustering,
/// plus the rate-group assignment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRates {
    pub rates: Vec<f64>,
    pub rate_group: Vec<usize>,
}

impl NodeRates {
    fn new(num_nodes: usize, init_rate: f64) -> Self {
        Self {
            rates: vec![init_rate; num_nodes],
            rate_group: vec![0; num_nodes],
        }
    }
}

/// One MCMC parameter value; the tagged-variant registry entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Basefreq([f64; 4]),
    Exchangeability([f64; 6]),
    Shape {
        alpha: f64,
        category_rates: [f64; NUM_GAMMA_CATS],
    },
    Tree(TimeTree),
    NodeRate(NodeRates),
    ConcentrationHyperprior(f64),
    TreeScale(f64),
    Speciation(SpeciationProcess),
    ExpCalibHyperprior(f64),
    FossilGraph(FossilOccurrenceGraph),
}

impl Parameter {
    /// The registry discriminant of this value.
    pub fn kind(&self) -> ParameterKind {
        match self {
            Parameter::Basefreq(_) => ParameterKind::Basefreq,
            Parameter::Exchangeability(_) => ParameterKind::Exchangeability,
            Parameter::Shape { .. } => ParameterKind::Shape,
            Parameter::Tree(_) => ParameterKind::Tree,
            Parameter::NodeRate(_) => ParameterKind::NodeRate,
            Parameter::ConcentrationHyperprior(_) => ParameterKind::ConcentrationHyperprior,
            Parameter::TreeScale(_) => ParameterKind::TreeScale,
            Parameter::Speciation(_) => ParameterKind::Speciation,
            Parameter::ExpCalibHyperprior(_) => ParameterKind::ExpCalibHyperprior,
            Parameter::FossilGraph(_) => ParameterKind::FossilGraph,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    buffers: [Parameter; 2],
    dirty: bool,
}

/// The double-buffered parameter registry.
pub struct ParameterStateSet {
    slots: Vec<Slot>,
    active: usize,
    weights: Vec<f64>,
    config: ModelConfig,
    all_node_times_fixed: bool,
}

impl ParameterStateSet {
    /// Assemble the registry: one slot per parameter kind, both buffers
    /// initialized identically, update weights computed from the
    /// structural configuration.
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        config: ModelConfig,
        alignment: &AlignmentInfo,
        mut tree: TimeTree,
        calibrations: &[Calibration],
        tip_dates: &[Calibration],
    ) -> Result<Self> {
        if alignment.num_taxa < 2 {
            return Err(DivtimeError::InvalidInput(
                "alignment must contain at least two taxa".into(),
            ));
        }
        tree.check_calibration_compatibility(calibrations)?;
        tree.apply_calibration_fixes(calibrations)?;

        let num_nodes = 2 * alignment.num_taxa - 1;
        let speciation = SpeciationProcess::new(
            config.birth_rate,
            config.death_rate,
            config.fossil_rate,
            config.extant_sample_rate,
        )?;
        let root_height = tree.root_age();
        let clock_rate = config.fixed_clock_rate.unwrap_or(1.0);

        let fossil_graph = if config.tree_time_prior.is_fossilized() {
            // Initial origin: 10% above the root height.
            let origin = root_height * 1.1;
            FossilOccurrenceGraph::from_calibrations(rng, tip_dates, origin)?
        } else {
            FossilOccurrenceGraph::empty(root_height)
        };

        let all_node_times_fixed = node_times_all_fixed(alignment.num_taxa, calibrations);

        let values = vec![
            Parameter::Basefreq([0.25; 4]),
            Parameter::Exchangeability([1.0 / 6.0; 6]),
            Parameter::Shape {
                alpha: 2.0,
                category_rates: [1.0; NUM_GAMMA_CATS],
            },
            Parameter::Tree(tree),
            Parameter::NodeRate(NodeRates::new(num_nodes, clock_rate)),
            Parameter::ConcentrationHyperprior(1.0),
            Parameter::TreeScale(root_height),
            Parameter::Speciation(speciation),
            Parameter::ExpCalibHyperprior(1.0),
            Parameter::FossilGraph(fossil_graph),
        ];

        let slots = values
            .into_iter()
            .map(|v| Slot {
                buffers: [v.clone(), v],
                dirty: false,
            })
            .collect();

        let mut set = Self {
            slots,
            active: 0,
            weights: Vec::new(),
            config,
            all_node_times_fixed,
        };
        set.rebuild_update_weights(true)?;
        Ok(set)
    }

    /// The structural configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Index of the buffer all readers currently see.
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Read the active value of a parameter kind. O(1).
    pub fn active(&self, kind: ParameterKind) -> &Parameter {
        &self.slots[kind.index()].buffers[self.active]
    }

    /// Mutable access to the active value of a parameter kind; marks the
    /// slot dirty so the next accept/reject knows to copy it. The only
    /// mutation path into a buffer.
    pub fn active_mut(&mut self, kind: ParameterKind) -> &mut Parameter {
        let slot = &mut self.slots[kind.index()];
        slot.dirty = true;
        &mut slot.buffers[self.active]
    }

    /// Typed view of the active tree.
    pub fn active_tree(&self) -> &TimeTree {
        match self.active(ParameterKind::Tree) {
            Parameter::Tree(t) => t,
            _ => unreachable!("tree slot holds a non-tree parameter"),
        }
    }

    /// Typed view of the active speciation process.
    pub fn active_speciation(&self) -> &SpeciationProcess {
        match self.active(ParameterKind::Speciation) {
            Parameter::Speciation(sp) => sp,
            _ => unreachable!("speciation slot holds a non-speciation parameter"),
        }
    }

    /// Typed mutable view of the active speciation process.
    pub fn active_speciation_mut(&mut self) -> &mut SpeciationProcess {
        match self.active_mut(ParameterKind::Speciation) {
            Parameter::Speciation(sp) => sp,
            _ => unreachable!("speciation slot holds a non-speciation parameter"),
        }
    }

    /// Typed view of the active fossil occurrence graph.
    pub fn active_fossil_graph(&self) -> &FossilOccurrenceGraph {
        match self.active(ParameterKind::FossilGraph) {
            Parameter::FossilGraph(fg) => fg,
            _ => unreachable!("fossil graph slot holds a non-graph parameter"),
        }
    }

    /// Typed view of the active per-branch rates.
    pub fn active_node_rates(&self) -> &NodeRates {
        match self.active(ParameterKind::NodeRate) {
            Parameter::NodeRate(nr) => nr,
            _ => unreachable!("node rate slot holds a non-rate parameter"),
        }
    }

    /// SELECT: draw `u ~ Uniform(0,1)` and walk the normalized weight
    /// vector; the first kind whose cumulative weight exceeds `u` is
    /// updated this iteration. Falling off the end of a normalized
    /// vector is a defect and is reported, not ignored.
    pub fn select_update<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParameterKind> {
        let u: f64 = rng.gen();
        let mut sum = 0.0;
        for (kind, &w) in ParameterKind::ALL.iter().zip(&self.weights) {
            sum += w;
            if u < sum {
                return Ok(*kind);
            }
        }
        Err(DivtimeError::Internal(format!(
            "update selection exhausted the weight vector (u = {}, sum = {})",
            u, sum
        )))
    }

    /// ACCEPT: the proposal in the active buffer becomes the state; copy
    /// every mutated slot into the inactive buffer so the two are
    /// identical again.
    pub fn accept(&mut self) {
        let from = self.active;
        let to = 1 - from;
        for slot in &mut self.slots {
            if slot.dirty {
                slot.buffers[to] = slot.buffers[from].clone();
                slot.dirty = false;
            }
        }
    }

    /// REJECT: discard the proposal by restoring every mutated slot of
    /// the active buffer from the inactive one.
    pub fn reject(&mut self) {
        let to = self.active;
        let from = 1 - to;
        for slot in &mut self.slots {
            if slot.dirty {
                slot.buffers[to] = slot.buffers[from].clone();
                slot.dirty = false;
            }
        }
    }

    /// True when both buffers of every parameter kind are identical —
    /// the registry invariant after construction and after every
    /// accept/reject resolution.
    pub fn buffers_in_sync(&self) -> bool {
        self.slots.iter().all(|s| s.buffers[0] == s.buffers[1])
    }

    /// The normalized per-kind update weights, in registry order.
    pub fn update_weights(&self) -> &[f64] {
        &self.weights
    }

    /// Recompute and renormalize the update weights from the structural
    /// configuration. Called at construction and again when a move class
    /// is disabled, the tree-time prior changes, the clock rate is
    /// fixed, or calibration hyperparameters are toggled — not per
    /// iteration.
    pub fn rebuild_update_weights(&mut self, initial: bool) -> Result<()> {
        let cfg = &self.config;
        // Raw weights in registry order:
        // basefreq, exchangeability, shape, node times, node rates,
        // concentration, tree scale, speciation, exp-calib hyperprior,
        // fossil graph.
        let (mut bfp, mut srp, mut shp, mut ntp, mut dpp, mut cpa, mut tsp, mut spp) =
            if initial {
                (0.3, 0.3, 0.3, 0.6, 0.5, 0.3, 0.5, 0.4)
            } else {
                (0.2, 0.2, 0.2, 0.4, 0.5, 0.3, 0.4, 0.4)
            };
        let mut ehp = 0.0;
        let mut fcp = 0.0;

        match cfg.turned_off_move {
            Some(MoveClass::Basefreq) => bfp = 0.0,
            Some(MoveClass::Exchangeability) => srp = 0.0,
            Some(MoveClass::Shape) => shp = 0.0,
            Some(MoveClass::NodeTimes) => {
                ntp = 0.0;
                tsp = 0.0;
                spp = 0.0;
            }
            Some(MoveClass::NodeRates) => {
                dpp = 0.0;
                cpa = 0.0;
            }
            Some(MoveClass::Concentration) => cpa = 0.0,
            Some(MoveClass::Speciation) => spp = 0.0,
            None => {}
        }
        if cfg.fix_root_height {
            tsp = 0.0;
        }
        if cfg.tree_time_prior == TreeTimePrior::Uniform {
            spp = 0.0;
        }
        if self.all_node_times_fixed {
            ntp = 0.0;
            log::info!("all internal node times are fixed");
        }
        if cfg.exponential_calib_hyperprior {
            ehp = if initial { 0.3 } else { 0.4 };
        }
        if cfg.fix_substitution_params {
            bfp = 0.0;
            shp = 0.0;
        }
        if matches!(
            cfg.tree_time_prior,
            TreeTimePrior::BirthDeathSampling | TreeTimePrior::FossilizedBirthDeath
        ) {
            spp = 0.5;
        }
        if cfg.tree_time_prior.is_fossilized() {
            ntp = 0.8;
            fcp = 0.4;
        }
        if cfg.fixed_clock_rate.is_some() {
            cpa = 0.0;
            dpp = 0.0;
        }

        let raw = [bfp, srp, shp, ntp, dpp, cpa, tsp, spp, ehp, fcp];
        let sum: f64 = raw.iter().sum();
        if sum <= 0.0 {
            return Err(DivtimeError::Internal(
                "every update move is disabled; nothing to sample".into(),
            ));
        }
        self.weights = raw.iter().map(|w| w / sum).collect();
        Ok(())
    }

    /// Transition probability matrices for every branch and gamma
    /// category, via the opaque collaborator `tp` (branch-length scalar
    /// in, 4x4 matrix out). Root entries are identity.
    ///
    /// A zero branch rate means a node was never assigned to a rate
    /// group; that is a violated invariant, not a degenerate matrix to
    /// propagate.
    pub fn branch_transition_matrices(
        &self,
        tp: &dyn Fn(f64) -> TransitionMatrix,
    ) -> Result<Vec<[TransitionMatrix; NUM_GAMMA_CATS]>> {
        let tree = self.active_tree();
        let rates = self.active_node_rates();
        let category_rates = match self.active(ParameterKind::Shape) {
            Parameter::Shape { category_rates, .. } => *category_rates,
            _ => unreachable!("shape slot holds a non-shape parameter"),
        };

        let identity: TransitionMatrix = {
            let mut m = [[0.0; 4]; 4];
            for (i, row) in m.iter_mut().enumerate() {
                row[i] = 1.0;
            }
            m
        };

        let mut out = vec![[identity; NUM_GAMMA_CATS]; tree.node_count()];
        for id in tree.iter_down_pass() {
            let node = match tree.get_node(id) {
                Some(n) => n,
                None => continue,
            };
            let parent = match node.parent {
                Some(p) => p,
                None => continue,
            };
            let rate = rates.rates.get(id).copied().unwrap_or(0.0);
            if rate == 0.0 {
                return Err(DivtimeError::Internal(format!(
                    "node {} has a zero branch rate (unassigned rate group)",
                    id
                )));
            }
            let branch_time = tree.node_age(parent)? - node.age;
            let v = branch_time * rate;
            for (k, cat) in category_rates.iter().enumerate() {
                out[id][k] = tp(v * cat);
            }
        }
        Ok(out)
    }
}

/// Metropolis-Hastings acceptance decision on a combined log ratio
/// (posterior difference plus log-Hastings), with the guarded
/// exponentiation protecting the linear-scale coin flip.
pub fn metropolis_accept<R: Rng + ?Sized>(rng: &mut R, ln_ratio: f64) -> bool {
    if ln_ratio >= 0.0 {
        true
    } else {
        rng.gen::<f64>() < safe_exponentiation(ln_ratio)
    }
}

/// Draw the initial root height implied by the calibrations. Returns the
/// height and whether it is fixed for the whole run.
///
/// A uniform root calibration draws inside its bounds (degenerate bounds
/// fix the height); an unbounded root calibration adds an exponential
/// excess with mean `0.2 · young` above its offset; with no root
/// calibration the bounds are extrapolated from the oldest constraint.
pub fn initial_root_height<R: Rng + ?Sized>(
    rng: &mut R,
    calibrations: &[Calibration],
) -> Result<(f64, bool)> {
    if let Some(root_cal) = calibrations.iter().find(|c| c.is_root()) {
        match root_cal.kind() {
            CalibrationKind::Uniform | CalibrationKind::FixedTip => {
                let (yb, ob) = (root_cal.young(), root_cal.old());
                if yb == ob {
                    return Ok((yb, true));
                }
                Ok((yb + rng.gen::<f64>() * (ob - yb), false))
            }
            CalibrationKind::OffsetExponential { .. } | CalibrationKind::BirthDeathTail => {
                let yb = root_cal.young();
                let mean = yb * 0.2;
                let excess = -rng.gen::<f64>().ln() * mean;
                Ok((yb + excess, false))
            }
        }
    } else {
        let mut yb = 0.0f64;
        for cal in calibrations {
            let implied = match cal.kind() {
                CalibrationKind::Uniform | CalibrationKind::FixedTip => cal.old(),
                _ => cal.young() * 1.1,
            };
            if implied > yb {
                yb = implied;
            }
        }
        if yb <= 0.0 {
            return Err(DivtimeError::InvalidInput(
                "cannot derive an initial root height without calibrations".into(),
            ));
        }
        let ob = yb * 3.0;
        Ok((yb + rng.gen::<f64>() * (ob - yb), false))
    }
}

/// True when there is one calibration per internal node (the root's may
/// be omitted) and every one of them fixes its age — in which case the
/// node-time move has nothing to do.
fn node_times_all_fixed(num_taxa: usize, calibrations: &[Calibration]) -> bool {
    let internal = num_taxa - 1;
    let has_root = calibrations.iter().any(|c| c.is_root());
    let n = calibrations.len();
    let covers_all = n == internal || (n == internal - 1 && !has_root);
    covers_all && !calibrations.is_empty() && calibrations.iter().all(|c| c.is_fixed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::parse_calibration_file;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_tree() -> TimeTree {
        let mut tree = TimeTree::new(10.0);
        let ab = tree.add_child(0, None, 6.0).unwrap();
        let cd = tree.add_child(0, None, 4.0).unwrap();
        tree.add_child(ab, Some("A".into()), 0.0).unwrap();
        tree.add_child(ab, Some("B".into()), 0.0).unwrap();
        tree.add_child(cd, Some("C".into()), 0.0).unwrap();
        tree.add_child(cd, Some("D".into()), 0.0).unwrap();
        tree
    }

    fn sample_alignment() -> AlignmentInfo {
        AlignmentInfo {
            num_taxa: 4,
            num_chars: 100,
        }
    }

    fn sample_set(config: ModelConfig) -> ParameterStateSet {
        let mut rng = StdRng::seed_from_u64(1);
        ParameterStateSet::new(
            &mut rng,
            config,
            &sample_alignment(),
            sample_tree(),
            &[],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn buffers_identical_after_construction() {
        let set = sample_set(ModelConfig::default());
        assert!(set.buffers_in_sync());
    }

    #[test]
    fn accept_propagates_proposal_to_inactive_buffer() {
        let mut set = sample_set(ModelConfig::default());
        let mut rng = StdRng::seed_from_u64(2);
        set.active_speciation_mut().update_psi_rate(&mut rng);
        let proposed = set.active_speciation().clone();
        assert!(!set.buffers_in_sync());

        set.accept();
        assert!(set.buffers_in_sync());
        assert_eq!(*set.active_speciation(), proposed);
    }

    #[test]
    fn reject_restores_active_buffer() {
        let mut set = sample_set(ModelConfig::default());
        let original = set.active_speciation().clone();
        let mut rng = StdRng::seed_from_u64(3);
        set.active_speciation_mut().update_psi_rate(&mut rng);
        assert_ne!(*set.active_speciation(), original);

        set.reject();
        assert!(set.buffers_in_sync());
        assert_eq!(*set.active_speciation(), original);
    }

    #[test]
    fn accept_then_reject_without_proposal_is_noop() {
        let mut set = sample_set(ModelConfig::default());
        let mut rng = StdRng::seed_from_u64(4);
        set.active_speciation_mut().update_psi_rate(&mut rng);
        set.accept();
        let state = set.active_speciation().clone();

        set.reject();
        assert!(set.buffers_in_sync());
        assert_eq!(*set.active_speciation(), state);
    }

    #[test]
    fn mutating_one_kind_leaves_others_in_sync() {
        let mut set = sample_set(ModelConfig::default());
        if let Parameter::Shape { alpha, .. } = set.active_mut(ParameterKind::Shape) {
            *alpha = 3.5;
        }
        set.accept();
        assert!(set.buffers_in_sync());
        match set.active(ParameterKind::Shape) {
            Parameter::Shape { alpha, .. } => assert_eq!(*alpha, 3.5),
            other => panic!("unexpected parameter {:?}", other),
        }
    }

    #[test]
    fn weights_are_normalized() {
        for config in [
            ModelConfig::default(),
            ModelConfig {
                tree_time_prior: TreeTimePrior::Uniform,
                ..ModelConfig::default()
            },
            ModelConfig {
                tree_time_prior: TreeTimePrior::FossilizedBirthDeath,
                ..ModelConfig::default()
            },
            ModelConfig {
                fix_root_height: true,
                exponential_calib_hyperprior: true,
                ..ModelConfig::default()
            },
            ModelConfig {
                fixed_clock_rate: Some(0.05),
                ..ModelConfig::default()
            },
        ] {
            let set = sample_set(config);
            let sum: f64 = set.update_weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "weights sum to {}", sum);
        }
    }

    #[test]
    fn select_always_returns_a_kind() {
        let set = sample_set(ModelConfig::default());
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..5000 {
            let kind = set.select_update(&mut rng).unwrap();
            let w = set.update_weights()[ParameterKind::ALL
                .iter()
                .position(|&k| k == kind)
                .unwrap()];
            assert!(w > 0.0, "selected {:?} with zero weight", kind);
        }
    }

    #[test]
    fn uniform_prior_disables_speciation_moves() {
        let set = sample_set(ModelConfig {
            tree_time_prior: TreeTimePrior::Uniform,
            ..ModelConfig::default()
        });
        let spp = set.update_weights()[ParameterKind::Speciation.index()];
        assert_eq!(spp, 0.0);
    }

    #[test]
    fn fixed_root_height_disables_tree_scale_moves() {
        let set = sample_set(ModelConfig {
            fix_root_height: true,
            ..ModelConfig::default()
        });
        assert_eq!(set.update_weights()[ParameterKind::TreeScale.index()], 0.0);
    }

    #[test]
    fn fossilized_prior_enables_fossil_graph_moves() {
        let set = sample_set(ModelConfig {
            tree_time_prior: TreeTimePrior::FossilizedBirthDeath,
            ..ModelConfig::default()
        });
        assert!(set.update_weights()[ParameterKind::FossilGraph.index()] > 0.0);
    }

    #[test]
    fn fixed_clock_rate_disables_rate_clustering_moves() {
        let set = sample_set(ModelConfig {
            fixed_clock_rate: Some(0.05),
            ..ModelConfig::default()
        });
        assert_eq!(set.update_weights()[ParameterKind::NodeRate.index()], 0.0);
        assert_eq!(
            set.update_weights()[ParameterKind::ConcentrationHyperprior.index()],
            0.0
        );
    }

    #[test]
    fn zero_branch_rate_is_fatal() {
        let mut set = sample_set(ModelConfig::default());
        if let Parameter::NodeRate(nr) = set.active_mut(ParameterKind::NodeRate) {
            nr.rates[1] = 0.0;
        }
        let jc = |_v: f64| [[0.25; 4]; 4];
        let err = set.branch_transition_matrices(&jc).unwrap_err();
        assert!(err.to_string().contains("rate"));
    }

    #[test]
    fn transition_matrices_cover_every_branch() {
        let set = sample_set(ModelConfig::default());
        let jc = |v: f64| {
            let p = 0.25 + 0.75 * (-v).exp();
            let q = 0.25 - 0.25 * (-v).exp();
            let mut m = [[q; 4]; 4];
            for (i, row) in m.iter_mut().enumerate() {
                row[i] = p;
            }
            m
        };
        let tis = set.branch_transition_matrices(&jc).unwrap();
        assert_eq!(tis.len(), set.active_tree().node_count());
        for per_node in &tis {
            for m in per_node {
                for row in m {
                    let s: f64 = row.iter().sum();
                    assert!((s - 1.0).abs() < 1e-9, "row sums to {}", s);
                }
            }
        }
    }

    #[test]
    fn metropolis_accepts_improvements_and_clamps_underflow() {
        let mut rng = StdRng::seed_from_u64(6);
        assert!(metropolis_accept(&mut rng, 0.0));
        assert!(metropolis_accept(&mut rng, 2.5));
        for _ in 0..100 {
            assert!(!metropolis_accept(&mut rng, -400.0));
        }
    }

    #[test]
    fn root_height_drawn_within_uniform_bounds() {
        let cals = parse_calibration_file("1\nroot\t70\t80").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let (h, fixed) = initial_root_height(&mut rng, &cals).unwrap();
            assert!((70.0..=80.0).contains(&h), "height {} out of bounds", h);
            assert!(!fixed);
        }
    }

    #[test]
    fn degenerate_root_bounds_fix_the_height() {
        let cals = parse_calibration_file("1\nroot\t75\t75").unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        let (h, fixed) = initial_root_height(&mut rng, &cals).unwrap();
        assert_eq!(h, 75.0);
        assert!(fixed);
    }

    #[test]
    fn exponential_root_calibration_exceeds_offset() {
        let cals = vec![Calibration::parse_node("-E root 50").unwrap()];
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let (h, fixed) = initial_root_height(&mut rng, &cals).unwrap();
            assert!(h >= 50.0);
            assert!(!fixed);
        }
    }

    #[test]
    fn root_height_extrapolated_without_root_calibration() {
        let cals = parse_calibration_file("1\nA\tB\t5\t7").unwrap();
        let mut rng = StdRng::seed_from_u64(10);
        let (h, fixed) = initial_root_height(&mut rng, &cals).unwrap();
        assert!((7.0..=21.0).contains(&h), "height {} out of range", h);
        assert!(!fixed);
    }

    #[test]
    fn mixed_calibrations_pin_only_fixed_nodes() {
        // One fixed constraint, one bounded; only the fixed node refuses
        // an age change.
        let cals = parse_calibration_file("2\nA\tB\t6\t6\nC\tD\t2\t5").unwrap();
        let mut rng = StdRng::seed_from_u64(12);
        let mut set = ParameterStateSet::new(
            &mut rng,
            ModelConfig::default(),
            &sample_alignment(),
            sample_tree(),
            &cals,
            &[],
        )
        .unwrap();
        if let Parameter::Tree(tree) = set.active_mut(ParameterKind::Tree) {
            assert!(tree.set_node_age(1, 5.5).is_err());
            assert_eq!(tree.node_age(1).unwrap(), 6.0);
            tree.set_node_age(2, 3.0).unwrap();
        } else {
            panic!("tree slot holds a non-tree parameter");
        }
    }

    #[test]
    fn all_fixed_node_times_disable_node_time_moves() {
        // Three internal nodes for four taxa; three fixed calibrations.
        let cals =
            parse_calibration_file("3\nroot\t10\t10\nA\tB\t6\t6\nC\tD\t4\t4").unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let set = ParameterStateSet::new(
            &mut rng,
            ModelConfig::default(),
            &sample_alignment(),
            sample_tree(),
            &cals,
            &[],
        )
        .unwrap();
        assert_eq!(set.update_weights()[ParameterKind::Tree.index()], 0.0);
    }
}
