//! CRS policy resolution
//!
//! Turns the declarative CRS subtree of a CorazaWaf into a concrete plan:
//! which rule families load and in what order, which exception directives
//! apply where, and the thresholds and levels the CRS setup needs.

use std::collections::BTreeSet;

use crate::crd::{
    CorazaWafCrs, Mode, RequestRuleException, RequestRuleSet, ResponseRuleException, RuleFamily,
    MANDATORY_REQUEST_FAMILIES, MANDATORY_RESPONSE_FAMILIES,
};

/// An exception compiled into a Coraza `ctl` action list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledException {
    /// Comma-joined `ctl:` actions (e.g. `ctl:ruleRemoveById=920350`)
    pub directive: String,
    /// Path prefix the exception is scoped to, global when `None`
    pub path: Option<String>,
}

impl CompiledException {
    /// Compile a request rule exception
    ///
    /// Without a part type each id is removed entirely; with one only the
    /// named target is removed from each rule. A part name without a type is
    /// ignored.
    pub fn request(exception: &RequestRuleException) -> Self {
        let directive = exception
            .rule_ids
            .iter()
            .map(|id| match &exception.request_part_type {
                None => format!("ctl:ruleRemoveById={id}"),
                Some(part_type) => match &exception.request_part_name {
                    Some(name) => format!("ctl:ruleRemoveTargetById={id};{part_type}:{name}"),
                    None => format!("ctl:ruleRemoveTargetById={id};{part_type}"),
                },
            })
            .collect::<Vec<_>>()
            .join(",");

        Self {
            directive,
            path: scope(exception.path.as_deref()),
        }
    }

    /// Compile a response rule exception
    pub fn response(exception: &ResponseRuleException) -> Self {
        let directive = exception
            .rule_ids
            .iter()
            .map(|id| format!("ctl:ruleRemoveById={id}"))
            .collect::<Vec<_>>()
            .join(",");

        Self {
            directive,
            path: scope(exception.path.as_deref()),
        }
    }
}

fn scope(path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty()).map(str::to_string)
}

/// Concrete CRS plan derived from a CorazaWaf's CRS policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCrsPolicy {
    /// Rule engine mode
    pub mode: Mode,
    /// Request families to include, ascending by code
    pub request_families: Vec<RuleFamily>,
    /// Response families to include, ascending by code
    pub response_families: Vec<RuleFamily>,
    /// Request exceptions in declaration order
    pub request_exceptions: Vec<CompiledException>,
    /// Response exceptions in declaration order
    pub response_exceptions: Vec<CompiledException>,
    /// Inbound anomaly score threshold
    pub inbound_anomaly_threshold: i32,
    /// Outbound anomaly score threshold
    pub outbound_anomaly_threshold: i32,
    /// Blocking paranoia level
    pub blocking_paranoia_level: i32,
    /// Detection paranoia level
    pub detection_paranoia_level: i32,
}

impl ResolvedCrsPolicy {
    /// Resolve the plan for a CRS policy
    ///
    /// An absent request family set selects every known family; mandatory
    /// families are always merged in.
    pub fn resolve(crs: &CorazaWafCrs) -> Self {
        let configured: Vec<RuleFamily> = match &crs.enabled_request_rules {
            Some(set) => set.iter().map(|rs| rs.family()).collect(),
            None => RequestRuleSet::ALL.iter().map(|rs| rs.family()).collect(),
        };
        let request_families = merge_families(configured, &MANDATORY_REQUEST_FAMILIES);

        let configured = crs
            .enabled_response_rules
            .iter()
            .map(|rs| rs.family())
            .collect();
        let response_families = merge_families(configured, &MANDATORY_RESPONSE_FAMILIES);

        Self {
            mode: crs.mode,
            request_families,
            response_families,
            request_exceptions: crs
                .request_rule_exceptions
                .iter()
                .map(CompiledException::request)
                .collect(),
            response_exceptions: crs
                .response_rule_exceptions
                .iter()
                .map(CompiledException::response)
                .collect(),
            inbound_anomaly_threshold: crs.request_anomaly_score,
            outbound_anomaly_threshold: crs.response_anomaly_score,
            blocking_paranoia_level: crs.paranoia_level.enforcing,
            detection_paranoia_level: crs.paranoia_level.detecting,
        }
    }

    /// Every family to include, request families first
    pub fn families(&self) -> impl Iterator<Item = &RuleFamily> {
        self.request_families
            .iter()
            .chain(self.response_families.iter())
    }
}

fn merge_families(configured: Vec<RuleFamily>, mandatory: &[RuleFamily]) -> Vec<RuleFamily> {
    configured
        .into_iter()
        .chain(mandatory.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
