//! Custom Resource Definitions for the Coraza WAF operator
//!
//! This module contains the CorazaWaf CRD, its CRS policy subtree and the
//! catalog of OWASP CRS rule families.

mod crs;
mod rule_set;
mod waf;

pub use crs::{
    ContentTypeParser, CorazaWafCrs, HttpMethod, Mode, ParanoiaLevel, PathSettings,
    RequestRuleException, ResponseRuleException,
};
pub use rule_set::{
    RequestRuleSet, ResponseRuleSet, RuleFamily, CRS_VERSION, MANDATORY_REQUEST_FAMILIES,
    MANDATORY_RESPONSE_FAMILIES,
};
pub use waf::{
    BodyLimitAction, CorazaWaf, CorazaWafBackend, CorazaWafSpec, CorazaWafStatus,
    MAX_BODY_LIMIT_BYTES, MAX_BODY_LIMIT_KB,
};
