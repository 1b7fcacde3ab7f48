//! Fossil occurrence bookkeeping for the fossilized-birth-death prior.
//!
//! Each fossil observation becomes one [`Occurrence`]: its age, the
//! inferred time its lineage attaches to the tree (phi), whether it lies
//! on an ancestral lineage or is a terminal sample, and a cached count of
//! lineages available at its attachment time (gamma). The gamma cache is
//! a sufficient statistic for the FBD density and is *not* kept in sync
//! automatically: any caller that changes topology or attachment must
//! call [`FossilOccurrenceGraph::recount_attachments`] before asking for
//! a probability.

use crate::calibration::Calibration;
use crate::speciation::SpeciationProcess;
use crate::tree::{NodeId, TimeTree};
use divtime_core::moves::window_move;
use divtime_core::{DivtimeError, Result};
use rand::Rng;

/// One fossil observation used by the FBD prior.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Occurrence {
    index: usize,
    age: f64,
    /// Attachment time phi: when the fossil's lineage diverged from the
    /// rest of the tree. Always in `[age, origin]`.
    attach_time: f64,
    /// Branch the fossil currently attaches to, when known.
    attach_branch: Option<NodeId>,
    /// True when the fossil lies on an ancestral lineage (indicator 0 in
    /// the classical parameterization); false for a terminal sampled
    /// lineage (indicator 1).
    ancestral: bool,
    /// True when the fossil is itself a terminal sampled tip.
    is_terminal_tip: bool,
    /// Cached number of lineages the fossil could attach to at phi.
    branch_gamma: u32,
}

impl Occurrence {
    /// Index of this occurrence in its graph.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fossil age (time before present).
    pub fn age(&self) -> f64 {
        self.age
    }

    /// Attachment time phi.
    pub fn attach_time(&self) -> f64 {
        self.attach_time
    }

    /// Attachment branch, when assigned.
    pub fn attach_branch(&self) -> Option<NodeId> {
        self.attach_branch
    }

    /// True when the fossil lies on an ancestral lineage.
    pub fn is_ancestral(&self) -> bool {
        self.ancestral
    }

    /// True when the fossil is a terminal sampled tip.
    pub fn is_terminal_tip(&self) -> bool {
        self.is_terminal_tip
    }

    /// Cached attachment multiplicity gamma.
    pub fn branch_gamma(&self) -> u32 {
        self.branch_gamma
    }
}

/// The fixed-size collection of fossil occurrences and their FBD
/// probability contribution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FossilOccurrenceGraph {
    occurrences: Vec<Occurrence>,
    origin_time: f64,
    needs_recount: bool,
}

impl FossilOccurrenceGraph {
    /// Build the occurrence collection from the fossil-category
    /// calibration records (fixed-age tips). Initial attachment times are
    /// drawn uniformly between each fossil's age and the process origin.
    pub fn from_calibrations<R: Rng + ?Sized>(
        rng: &mut R,
        cals: &[Calibration],
        origin_time: f64,
    ) -> Result<Self> {
        let mut occurrences = Vec::new();
        for cal in cals.iter().filter(|c| c.is_fossil()) {
            let age = cal.young();
            if age >= origin_time {
                return Err(DivtimeError::InvalidInput(format!(
                    "fossil '{}' at age {} is older than the process origin {}",
                    cal.taxon_a(),
                    age,
                    origin_time
                )));
            }
            let attach_time = age + rng.gen::<f64>() * (origin_time - age);
            occurrences.push(Occurrence {
                index: occurrences.len(),
                age,
                attach_time,
                attach_branch: None,
                ancestral: false,
                is_terminal_tip: false,
                branch_gamma: 1,
            });
        }
        log::info!(
            "fossil occurrence graph: {} occurrences, origin time {}",
            occurrences.len(),
            origin_time
        );
        Ok(Self {
            occurrences,
            origin_time,
            needs_recount: true,
        })
    }

    /// An empty graph (non-FBD analyses).
    pub fn empty(origin_time: f64) -> Self {
        Self {
            occurrences: Vec::new(),
            origin_time,
            needs_recount: false,
        }
    }

    /// Number of fossil occurrences; fixed for the whole run.
    pub fn num_fossils(&self) -> usize {
        self.occurrences.len()
    }

    /// Time of the process origin.
    pub fn origin_time(&self) -> f64 {
        self.origin_time
    }

    /// The occurrence records.
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    /// True when a topology or attachment change has not yet been
    /// followed by a recount.
    pub fn needs_recount(&self) -> bool {
        self.needs_recount
    }

    /// Move one occurrence's attachment time with a sliding window
    /// bounded to `[age, origin]`. Marks the gamma cache stale; returns
    /// the log-Hastings ratio.
    pub fn update_attach_time<R: Rng + ?Sized>(&mut self, rng: &mut R, index: usize) -> Result<f64> {
        let origin = self.origin_time;
        let occ = self.occurrences.get_mut(index).ok_or_else(|| {
            DivtimeError::InvalidInput(format!("occurrence index {} out of range", index))
        })?;
        let tuning = (origin - occ.age) * 0.1;
        let (nv, ln_hr) = window_move(rng, occ.attach_time, occ.age, origin, tuning);
        occ.attach_time = nv;
        self.needs_recount = true;
        Ok(ln_hr)
    }

    /// Move the attachment time of a uniformly chosen occurrence.
    pub fn update<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<f64> {
        if self.occurrences.is_empty() {
            return Err(DivtimeError::Internal(
                "attachment move proposed on an empty fossil graph".into(),
            ));
        }
        let index = rng.gen_range(0..self.occurrences.len());
        self.update_attach_time(rng, index)
    }

    /// Reassign one occurrence's attachment branch and ancestral
    /// indicator. Marks the gamma cache stale.
    pub fn set_attachment(
        &mut self,
        index: usize,
        branch: Option<NodeId>,
        ancestral: bool,
    ) -> Result<()> {
        let occ = self.occurrences.get_mut(index).ok_or_else(|| {
            DivtimeError::InvalidInput(format!("occurrence index {} out of range", index))
        })?;
        occ.attach_branch = branch;
        occ.ancestral = ancestral;
        self.needs_recount = true;
        Ok(())
    }

    /// Recompute each occurrence's attachment multiplicity gamma: the
    /// number of lineages alive at its attachment time — tree branches
    /// spanning phi, the origin-to-root stem, and the other occurrences'
    /// fossil lineages. Idempotent; must be called after any topology or
    /// attachment change before the next probability evaluation.
    pub fn recount_attachments(&mut self, tree: &TimeTree) {
        let root_age = tree.root_age();
        let gammas: Vec<u32> = self
            .occurrences
            .iter()
            .map(|occ| {
                let phi = occ.attach_time;
                let mut gamma = 0u32;
                for id in tree.iter_down_pass() {
                    let node = tree.get_node(id).unwrap();
                    if let Some(p) = node.parent {
                        let parent_age = tree.get_node(p).unwrap().age;
                        if parent_age > phi && phi >= node.age {
                            gamma += 1;
                        }
                    }
                }
                // Origin-to-root stem lineage.
                if self.origin_time >= phi && phi >= root_age {
                    gamma += 1;
                }
                // Other fossils' attachment lineages.
                for other in &self.occurrences {
                    if other.index != occ.index
                        && other.attach_time > phi
                        && phi >= other.age
                    {
                        gamma += 1;
                    }
                }
                gamma.max(1)
            })
            .collect();
        for (occ, gamma) in self.occurrences.iter_mut().zip(gammas) {
            occ.branch_gamma = gamma;
        }
        self.needs_recount = false;
    }

    /// FBD log-probability of the occurrence graph: the
    /// birth-death-sampling density over the origin-to-root interval
    /// conditioned on survival, plus one term per occurrence combining
    /// its age, attachment time, and attachment multiplicity.
    pub fn ln_probability(&self, sp: &SpeciationProcess) -> f64 {
        if self.needs_recount {
            log::warn!("fossil graph evaluated with a stale attachment count cache");
        }
        let origin = self.origin_time;
        let mut ln_prob =
            sp.fbd_ln_q_hat(origin) - (1.0 - sp.bdss_p0(origin)).ln();
        for occ in &self.occurrences {
            ln_prob += sp.fossil_rate().ln();
            if !occ.ancestral {
                ln_prob += (2.0 * sp.birth_rate() * occ.branch_gamma as f64).ln()
                    + sp.fbd_ln_q_hat(occ.attach_time);
            }
            if !occ.is_terminal_tip {
                ln_prob += sp.bdss_p0(occ.age).ln();
            }
        }
        ln_prob
    }
}
