//! Birth-death-sampling tree-time priors on dated node ages.
//!
//! [`SpeciationProcess`] owns the process rates (speciation λ, extinction
//! μ, fossil recovery ψ, extant sampling ρ, plus the derived relative
//! death rate and net diversification) and evaluates the log prior of a
//! dated tree under one of the supported [`TreeTimePrior`] kinds. The
//! analytic building blocks (c1, c2, Q, P0, QHat) are shared with the
//! fossilized-birth-death occurrence machinery.
//!
//! All composition across nodes happens in log-space; linear-scale values
//! go through the guarded exponentiation in `divtime_core::prob`.

use crate::tree::TimeTree;
use divtime_core::moves::{scale_move, window_move};
use divtime_core::{DivtimeError, Result};
use rand::Rng;

/// Which prior is placed on the dated node ages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TreeTimePrior {
    /// Flat over feasible age configurations.
    Uniform,
    /// Pure-birth (Yule) process.
    Yule,
    /// Conditioned birth-death process (Gernhard 2008 form).
    ConditionedBirthDeath,
    /// Birth-death with extant-tip sampling (Stadler BDSS family).
    BirthDeathSampling,
    /// Fossilized birth-death: BDSS plus fossil occurrence terms.
    FossilizedBirthDeath,
}

impl TreeTimePrior {
    /// True for the priors that carry speciation-process parameters.
    pub fn has_process_rates(&self) -> bool {
        !matches!(self, TreeTimePrior::Uniform)
    }

    /// True for the fossil-aware prior.
    pub fn is_fossilized(&self) -> bool {
        matches!(self, TreeTimePrior::FossilizedBirthDeath)
    }
}

const RATE_MIN: f64 = 1e-4;
const RATE_MAX: f64 = 1e4;
const SCALE_TUNING: f64 = 2.0 * std::f64::consts::LN_2;
const WINDOW_TUNING: f64 = 0.2;

/// Parameters of the birth-death-sampling speciation process.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpeciationProcess {
    birth_rate: f64,              // lambda
    death_rate: f64,              // mu
    fossil_rate: f64,             // psi
    extant_sample_rate: f64,      // rho
    fossil_strat_sample_prob: f64, // omega
    prob_speciation_s: f64,       // psi / (mu + psi)
    relative_death: f64,          // mu / lambda
    net_diversification: f64,     // lambda - mu
}

impl SpeciationProcess {
    /// Create a process from (λ, μ, ψ, ρ).
    ///
    /// All rates must be non-negative, λ positive, and ρ in `[0, 1]`.
    pub fn new(birth_rate: f64, death_rate: f64, fossil_rate: f64, rho: f64) -> Result<Self> {
        if birth_rate <= 0.0 || death_rate < 0.0 || fossil_rate < 0.0 {
            return Err(DivtimeError::InvalidInput(format!(
                "speciation rates must be non-negative with lambda > 0 (got {}, {}, {})",
                birth_rate, death_rate, fossil_rate
            )));
        }
        if !(0.0..=1.0).contains(&rho) {
            return Err(DivtimeError::InvalidInput(format!(
                "extant sampling probability {} outside [0, 1]",
                rho
            )));
        }
        let mut sp = Self {
            birth_rate,
            death_rate,
            fossil_rate,
            extant_sample_rate: rho,
            fossil_strat_sample_prob: 0.0,
            prob_speciation_s: 0.0,
            relative_death: 0.0,
            net_diversification: 0.0,
        };
        sp.refresh_derived();
        Ok(sp)
    }

    /// Speciation rate λ.
    pub fn birth_rate(&self) -> f64 {
        self.birth_rate
    }

    /// Extinction rate μ.
    pub fn death_rate(&self) -> f64 {
        self.death_rate
    }

    /// Fossil recovery rate ψ.
    pub fn fossil_rate(&self) -> f64 {
        self.fossil_rate
    }

    /// Extant-tip sampling probability ρ.
    pub fn extant_sample_rate(&self) -> f64 {
        self.extant_sample_rate
    }

    /// Stratigraphic fossil sampling probability ω.
    pub fn fossil_strat_sample_prob(&self) -> f64 {
        self.fossil_strat_sample_prob
    }

    /// ψ / (μ + ψ), the probability a lineage end is a fossil sample.
    pub fn prob_speciation_s(&self) -> f64 {
        self.prob_speciation_s
    }

    /// μ / λ.
    pub fn relative_death(&self) -> f64 {
        self.relative_death
    }

    /// λ − μ.
    pub fn net_diversification(&self) -> f64 {
        self.net_diversification
    }

    /// Recompute every derived quantity from (λ, μ, ψ). Every mutation
    /// path must end here so the derived values never go stale.
    fn refresh_derived(&mut self) {
        self.relative_death = self.death_rate / self.birth_rate;
        self.net_diversification = self.birth_rate - self.death_rate;
        self.prob_speciation_s = if self.death_rate + self.fossil_rate > 0.0 {
            self.fossil_rate / (self.death_rate + self.fossil_rate)
        } else {
            0.0
        };
    }

    // ── BDSS analytic building blocks ───────────────────────────────────

    /// `c1 = sqrt((λ-μ-ψ)² + 4λψ)`.
    pub fn bdss_c1(&self) -> f64 {
        let d = self.birth_rate - self.death_rate - self.fossil_rate;
        (d * d + 4.0 * self.birth_rate * self.fossil_rate).sqrt()
    }

    /// `c2 = -(λ-μ-2λρ-ψ) / c1`.
    pub fn bdss_c2(&self) -> f64 {
        let c1 = self.bdss_c1();
        if c1 == 0.0 {
            return 0.0;
        }
        -(self.birth_rate
            - self.death_rate
            - 2.0 * self.birth_rate * self.extant_sample_rate
            - self.fossil_rate)
            / c1
    }

    /// Probability that a lineage alive at time `t` before present leaves
    /// no sampled descendant.
    pub fn bdss_p0(&self, t: f64) -> f64 {
        let c1 = self.bdss_c1();
        let c2 = self.bdss_c2();
        let e = (-c1 * t).exp();
        // The denominator reaches 0 only when c2 == -1 (no sampling at
        // all) and the exponential has underflowed; the ratio limit
        // there is 1.
        let den = e * (1.0 - c2) + (1.0 + c2);
        let frac = if den == 0.0 {
            1.0
        } else {
            (e * (1.0 - c2) - (1.0 + c2)) / den
        };
        (self.birth_rate + self.death_rate + self.fossil_rate + c1 * frac)
            / (2.0 * self.birth_rate)
    }

    /// `ln Q(t)`, the per-interval auxiliary density factor, on the log
    /// scale to survive large `c1·t`.
    pub fn bdss_ln_q(&self, t: f64) -> f64 {
        let c1 = self.bdss_c1();
        let c2 = self.bdss_c2();
        let e = (-c1 * t).exp();
        (4.0f64).ln() - c1 * t - 2.0 * (e * (1.0 - c2) + (1.0 + c2)).ln()
    }

    /// `ln QHat(t)`, the boundary variant used at the process origin:
    /// `QHat(t) = sqrt(Q(t) · exp(-(λ+μ+ψ)·t))`.
    pub fn fbd_ln_q_hat(&self, t: f64) -> f64 {
        0.5 * (self.bdss_ln_q(t)
            - (self.birth_rate + self.death_rate + self.fossil_rate) * t)
    }

    // ── Tree-time prior evaluation ──────────────────────────────────────

    /// Log prior of the tree's dated node ages under the selected prior.
    ///
    /// The fossilized prior additionally needs the occurrence graph; use
    /// [`crate::fossil_graph::FossilOccurrenceGraph::ln_probability`] for
    /// the occurrence terms and add them to the
    /// [`TreeTimePrior::BirthDeathSampling`] value this returns.
    pub fn ln_tree_prob(&self, tree: &TimeTree, prior: TreeTimePrior) -> f64 {
        match prior {
            TreeTimePrior::Uniform => 0.0,
            TreeTimePrior::Yule => self.ln_yule_prob(tree),
            TreeTimePrior::ConditionedBirthDeath => self.ln_cbd_prob(tree),
            TreeTimePrior::BirthDeathSampling | TreeTimePrior::FossilizedBirthDeath => {
                self.ln_bdss_prob(tree)
            }
        }
    }

    /// Pure-birth density over internal node ages, conditioned on the root.
    fn ln_yule_prob(&self, tree: &TimeTree) -> f64 {
        let root_age = tree.root_age();
        let lam = self.birth_rate;
        tree.internal_node_ages()
            .iter()
            .filter(|&&t| t < root_age)
            .map(|&t| lam.ln() - lam * t)
            .sum()
    }

    /// Conditioned birth-death node-age density (Gernhard 2008): per
    /// non-root internal node, `λ·p1(t)` normalized by the probability of
    /// root survival.
    fn ln_cbd_prob(&self, tree: &TimeTree) -> f64 {
        let a = self.relative_death;
        let r = self.net_diversification;
        if r <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let root_age = tree.root_age();
        let ln_p1 = |t: f64| {
            let e = (-r * t).exp();
            2.0 * (1.0 - a).ln() - r * t - 2.0 * (1.0 - a * e).ln()
        };
        let p0_root = {
            let e = (-r * root_age).exp();
            a * (1.0 - e) / (1.0 - a * e)
        };
        let mut ln_prob = 0.0;
        let mut n_nodes = 0usize;
        for t in tree.internal_node_ages() {
            if t < root_age {
                ln_prob += self.birth_rate.ln() + ln_p1(t);
                n_nodes += 1;
            }
        }
        ln_prob - n_nodes as f64 * (1.0 - p0_root).ln()
    }

    /// Birth-death-sampling density over node ages, conditioned on
    /// survival of the root's two descendant lineages.
    fn ln_bdss_prob(&self, tree: &TimeTree) -> f64 {
        let root_age = tree.root_age();
        let n_extant = tree
            .leaves()
            .iter()
            .filter(|&&id| tree.node_age(id).unwrap_or(0.0) == 0.0)
            .count();
        let mut ln_prob = n_extant as f64 * self.extant_sample_rate.ln();
        for t in tree.internal_node_ages() {
            ln_prob += self.birth_rate.ln() + self.bdss_ln_q(t);
        }
        ln_prob - 2.0 * (1.0 - self.bdss_p0(root_age)).ln()
    }

    // ── Rate-update moves ───────────────────────────────────────────────

    /// Propose a new net diversification via a bounded scale move,
    /// holding the relative death rate fixed. Returns the log-Hastings
    /// ratio.
    pub fn update_net_diversification<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let (nv, ln_hr) = scale_move(
            rng,
            self.net_diversification.max(RATE_MIN),
            RATE_MIN,
            RATE_MAX,
            SCALE_TUNING,
        );
        // The held ratio must stay below 1 or the derived rates change sign.
        let a = self.relative_death.clamp(0.0, 0.9999);
        self.birth_rate = nv / (1.0 - a);
        self.death_rate = a * self.birth_rate;
        self.refresh_derived();
        ln_hr
    }

    /// Propose a new relative death rate μ/λ via a sliding window on
    /// `[0, 1)`, holding net diversification fixed.
    pub fn update_relative_death<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        // The held net diversification must stay positive for the same reason.
        let r = self.net_diversification.max(RATE_MIN);
        let (nv, ln_hr) = window_move(rng, self.relative_death, 0.0, 0.9999, WINDOW_TUNING);
        self.birth_rate = r / (1.0 - nv);
        self.death_rate = nv * self.birth_rate;
        self.refresh_derived();
        ln_hr
    }

    /// Propose a new fossil recovery rate ψ via a bounded scale move.
    pub fn update_psi_rate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let (nv, ln_hr) = scale_move(
            rng,
            self.fossil_rate.max(RATE_MIN),
            RATE_MIN,
            RATE_MAX,
            SCALE_TUNING,
        );
        self.fossil_rate = nv;
        self.refresh_derived();
        ln_hr
    }

    /// Propose a new birth rate λ via a bounded scale move (FBD
    /// parameterization over raw rates).
    pub fn update_birth_rate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let (nv, ln_hr) = scale_move(rng, self.birth_rate, RATE_MIN, RATE_MAX, SCALE_TUNING);
        self.birth_rate = nv;
        self.refresh_derived();
        ln_hr
    }

    /// Propose a new death rate μ via a bounded scale move.
    pub fn update_death_rate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let (nv, ln_hr) = scale_move(
            rng,
            self.death_rate.max(RATE_MIN),
            RATE_MIN,
            RATE_MAX,
            SCALE_TUNING,
        );
        self.death_rate = nv;
        self.refresh_derived();
        ln_hr
    }

    /// Propose a new `s = ψ/(μ+ψ)` via a sliding window on `[0, 1)`;
    /// ψ is rederived from the current μ.
    pub fn update_prob_speciation_s<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let (nv, ln_hr) = window_move(rng, self.prob_speciation_s, 0.0, 0.9999, WINDOW_TUNING);
        self.fossil_rate = nv / (1.0 - nv) * self.death_rate;
        self.refresh_derived();
        ln_hr
    }

    /// Propose a new extant sampling probability ρ via a sliding window
    /// on `[0, 1]`.
    pub fn update_extant_sample_rate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        let (nv, ln_hr) = window_move(rng, self.extant_sample_rate, 0.0, 1.0, WINDOW_TUNING);
        self.extant_sample_rate = nv;
        ln_hr
    }

    /// Propose one rate update appropriate to the active prior, chosen
    /// uniformly among the moves that prior exposes. Returns the
    /// log-Hastings ratio for the caller's Metropolis-Hastings decision.
    pub fn update<R: Rng + ?Sized>(&mut self, rng: &mut R, prior: TreeTimePrior) -> f64 {
        match prior {
            TreeTimePrior::Uniform | TreeTimePrior::Yule => {
                self.update_net_diversification(rng)
            }
            TreeTimePrior::ConditionedBirthDeath => {
                if rng.gen::<bool>() {
                    self.update_net_diversification(rng)
                } else {
                    self.update_relative_death(rng)
                }
            }
            TreeTimePrior::BirthDeathSampling | TreeTimePrior::FossilizedBirthDeath => {
                match rng.gen_range(0..4) {
                    0 => self.update_net_diversification(rng),
                    1 => self.update_relative_death(rng),
                    2 => self.update_psi_rate(rng),
                    _ => self.update_prob_speciation_s(rng),
                }
            }
        }
    }
}

impl std::fmt::Display for SpeciationProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "speciation process: lambda={:.6} mu={:.6} psi={:.6} rho={:.4} (r={:.6}, a={:.6})",
            self.birth_rate,
            self.death_rate,
            self.fossil_rate,
            self.extant_sample_rate,
            self.net_diversification,
            self.relative_death
        )
    }
}
