//! Verdict rules: reducing criterion results to PASS / WARNING / FAIL.
//!
//! - a required criterion that failed or has no result -> FAIL;
//! - otherwise an optional criterion that failed or has no result -> WARNING;
//! - otherwise PASS.
//!
//! Results naming a criterion the contract does not declare are ignored and
//! reported in [`VerdictSummary::unknown`]. When a criterion has several
//! results it counts as passed only if all of them passed.

use std::collections::BTreeMap;

use accord_core::{AcceptanceCriterion, CriterionId, CriterionResult, Verdict};
use serde::{Deserialize, Serialize};

/// The verdict plus the criteria that produced it, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub verdict: Verdict,
    pub failed_required: Vec<CriterionId>,
    pub failed_optional: Vec<CriterionId>,
    pub missing_required: Vec<CriterionId>,
    pub missing_optional: Vec<CriterionId>,
    /// Failing or missing criteria flagged `blocking`.
    pub blocking_failures: Vec<CriterionId>,
    pub unknown: Vec<CriterionId>,
}

impl VerdictSummary {
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

pub fn evaluate(criteria: &[AcceptanceCriterion], results: &[CriterionResult]) -> VerdictSummary {
    let mut outcomes: BTreeMap<&CriterionId, bool> = BTreeMap::new();
    for result in results {
        outcomes
            .entry(&result.criterion_id)
            .and_modify(|passed| *passed &= result.passed)
            .or_insert(result.passed);
    }

    let mut summary = VerdictSummary {
        verdict: Verdict::Pass,
        failed_required: Vec::new(),
        failed_optional: Vec::new(),
        missing_required: Vec::new(),
        missing_optional: Vec::new(),
        blocking_failures: Vec::new(),
        unknown: Vec::new(),
    };

    for criterion in criteria {
        let id = criterion.criterion_id.clone();
        let bucket = match (outcomes.remove(&criterion.criterion_id), criterion.required) {
            (Some(true), _) => continue,
            (Some(false), true) => &mut summary.failed_required,
            (Some(false), false) => &mut summary.failed_optional,
            (None, true) => &mut summary.missing_required,
            (None, false) => &mut summary.missing_optional,
        };
        bucket.push(id.clone());
        if criterion.blocking {
            summary.blocking_failures.push(id);
        }
    }
    summary.unknown = outcomes.into_keys().cloned().collect();

    summary.verdict = if !summary.failed_required.is_empty() || !summary.missing_required.is_empty()
    {
        Verdict::Fail
    } else if !summary.failed_optional.is_empty() || !summary.missing_optional.is_empty() {
        Verdict::Warning
    } else {
        Verdict::Pass
    };
    summary
}
