//! CRS policy subtree of the CorazaWaf spec

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::rule_set::{RequestRuleSet, ResponseRuleSet};
use crate::Error;

/// Rule engine mode for the CRS
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Block requests whose anomaly score exceeds the threshold
    #[default]
    Block,
    /// Only log matches, never interrupt traffic
    Detect,
}

impl Mode {
    /// Value for the `SecRuleEngine` directive
    pub fn rule_engine(&self) -> &'static str {
        match self {
            Self::Block => "On",
            Self::Detect => "DetectionOnly",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "BLOCK"),
            Self::Detect => write!(f, "DETECT"),
        }
    }
}

/// CRS paranoia levels
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParanoiaLevel {
    /// Paranoia level whose rules contribute to blocking (1-4)
    #[serde(default = "default_paranoia")]
    #[schemars(range(min = 1, max = 4))]
    pub enforcing: i32,

    /// Paranoia level whose rules are evaluated and logged (1-4)
    #[serde(default = "default_paranoia")]
    #[schemars(range(min = 1, max = 4))]
    pub detecting: i32,
}

fn default_paranoia() -> i32 {
    1
}

impl Default for ParanoiaLevel {
    fn default() -> Self {
        Self {
            enforcing: default_paranoia(),
            detecting: default_paranoia(),
        }
    }
}

/// Removes request rules globally or for a single path
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestRuleException {
    /// Rule ids to remove (at least one)
    #[serde(default)]
    pub rule_ids: Vec<u32>,

    /// Request part to exempt (e.g. "REQUEST_HEADERS", "ARGS")
    ///
    /// When absent the rules are removed entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_part_type: Option<String>,

    /// Request part name (e.g. "User-Agent"); only used with a part type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_part_name: Option<String>,

    /// Path prefix the exception is scoped to; global when absent or empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Removes response rules globally or for a single path
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRuleException {
    /// Rule ids to remove (at least one)
    #[serde(default)]
    pub rule_ids: Vec<u32>,

    /// Path prefix the exception is scoped to; global when absent or empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// HTTP methods from the IANA method registry
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum HttpMethod {
    Acl,
    BaselineControl,
    Bind,
    Checkin,
    Checkout,
    Connect,
    Copy,
    Delete,
    Get,
    Head,
    Label,
    Link,
    Lock,
    Merge,
    Mkactivity,
    Mkcalendar,
    Mkcol,
    Mkredirectref,
    Mkworkspace,
    Move,
    Options,
    Orderpatch,
    Patch,
    Post,
    Pri,
    Propfind,
    Proppatch,
    Put,
    Rebind,
    Report,
    Search,
    Trace,
    Unbind,
    Uncheckout,
    Unlink,
    Unlock,
    Update,
    Updateredirectref,
    VersionControl,
}

impl HttpMethod {
    /// Method token as sent on the wire (e.g. "BASELINE-CONTROL")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acl => "ACL",
            Self::BaselineControl => "BASELINE-CONTROL",
            Self::Bind => "BIND",
            Self::Checkin => "CHECKIN",
            Self::Checkout => "CHECKOUT",
            Self::Connect => "CONNECT",
            Self::Copy => "COPY",
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Label => "LABEL",
            Self::Link => "LINK",
            Self::Lock => "LOCK",
            Self::Merge => "MERGE",
            Self::Mkactivity => "MKACTIVITY",
            Self::Mkcalendar => "MKCALENDAR",
            Self::Mkcol => "MKCOL",
            Self::Mkredirectref => "MKREDIRECTREF",
            Self::Mkworkspace => "MKWORKSPACE",
            Self::Move => "MOVE",
            Self::Options => "OPTIONS",
            Self::Orderpatch => "ORDERPATCH",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Pri => "PRI",
            Self::Propfind => "PROPFIND",
            Self::Proppatch => "PROPPATCH",
            Self::Put => "PUT",
            Self::Rebind => "REBIND",
            Self::Report => "REPORT",
            Self::Search => "SEARCH",
            Self::Trace => "TRACE",
            Self::Unbind => "UNBIND",
            Self::Uncheckout => "UNCHECKOUT",
            Self::Unlink => "UNLINK",
            Self::Unlock => "UNLOCK",
            Self::Update => "UPDATE",
            Self::Updateredirectref => "UPDATEREDIRECTREF",
            Self::VersionControl => "VERSION-CONTROL",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body processor selectable per path
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentTypeParser {
    /// application/x-www-form-urlencoded
    Urlencoded,
    /// multipart/form-data
    Multipart,
    /// XML documents
    Xml,
    /// JSON documents
    Json,
}

impl std::fmt::Display for ContentTypeParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Urlencoded => write!(f, "URLENCODED"),
            Self::Multipart => write!(f, "MULTIPART"),
            Self::Xml => write!(f, "XML"),
            Self::Json => write!(f, "JSON"),
        }
    }
}

/// Per-path overrides for methods, content types and body processing
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathSettings {
    /// Path prefix these settings apply to
    pub path: String,

    /// Additionally allowed Content-Type for this path (rule 920420)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_content_type: Option<String>,

    /// Request body parser to use for this path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type_parser: Option<ContentTypeParser>,

    /// Allowed HTTP methods for this path (rule 911100)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allowed_methods: BTreeSet<HttpMethod>,
}

impl PathSettings {
    /// Allowed methods as a space separated list, sorted
    pub fn allowed_methods_string(&self) -> String {
        self.allowed_methods
            .iter()
            .map(HttpMethod::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// OWASP Core Rule Set policy
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorazaWafCrs {
    /// Rule engine mode
    #[serde(default)]
    pub mode: Mode,

    /// Inbound anomaly score threshold
    #[serde(default = "default_request_anomaly_score")]
    #[schemars(range(min = 1))]
    pub request_anomaly_score: i32,

    /// Outbound anomaly score threshold
    #[serde(default = "default_response_anomaly_score")]
    #[schemars(range(min = 1))]
    pub response_anomaly_score: i32,

    /// Blocking and detection paranoia levels
    #[serde(default)]
    pub paranoia_level: ParanoiaLevel,

    /// Request rule families to load
    ///
    /// Absent loads every known family; an empty list loads only the
    /// mandatory ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_request_rules: Option<BTreeSet<RequestRuleSet>>,

    /// Request rule exceptions, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_rule_exceptions: Vec<RequestRuleException>,

    /// Response rule families to load in addition to the mandatory ones
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub enabled_response_rules: BTreeSet<ResponseRuleSet>,

    /// Response rule exceptions, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_rule_exceptions: Vec<ResponseRuleException>,

    /// Per-path overrides, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_settings: Vec<PathSettings>,
}

fn default_request_anomaly_score() -> i32 {
    5
}

fn default_response_anomaly_score() -> i32 {
    4
}

impl Default for CorazaWafCrs {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            request_anomaly_score: default_request_anomaly_score(),
            response_anomaly_score: default_response_anomaly_score(),
            paranoia_level: ParanoiaLevel::default(),
            enabled_request_rules: None,
            request_rule_exceptions: Vec::new(),
            enabled_response_rules: BTreeSet::new(),
            response_rule_exceptions: Vec::new(),
            path_settings: Vec::new(),
        }
    }
}

impl CorazaWafCrs {
    /// Validate the CRS policy
    ///
    /// Field paths in errors are relative to the spec root.
    pub fn validate(&self) -> Result<(), Error> {
        if self.request_anomaly_score < 1 {
            return Err(Error::validation(
                "crs.requestAnomalyScore",
                format!("must be at least 1, got {}", self.request_anomaly_score),
            ));
        }
        if self.response_anomaly_score < 1 {
            return Err(Error::validation(
                "crs.responseAnomalyScore",
                format!("must be at least 1, got {}", self.response_anomaly_score),
            ));
        }
        validate_paranoia("crs.paranoiaLevel.enforcing", self.paranoia_level.enforcing)?;
        validate_paranoia("crs.paranoiaLevel.detecting", self.paranoia_level.detecting)?;

        for (i, exception) in self.request_rule_exceptions.iter().enumerate() {
            let field = format!("crs.requestRuleExceptions[{i}]");
            validate_rule_ids(&field, &exception.rule_ids)?;
            validate_target(
                &format!("{field}.requestPartType"),
                exception.request_part_type.as_deref(),
            )?;
            validate_target(
                &format!("{field}.requestPartName"),
                exception.request_part_name.as_deref(),
            )?;
        }
        for (i, exception) in self.response_rule_exceptions.iter().enumerate() {
            let field = format!("crs.responseRuleExceptions[{i}]");
            validate_rule_ids(&field, &exception.rule_ids)?;
        }
        for (i, settings) in self.path_settings.iter().enumerate() {
            if settings.path.trim().is_empty() {
                return Err(Error::validation(
                    format!("crs.pathSettings[{i}].path"),
                    "path cannot be empty",
                ));
            }
        }
        Ok(())
    }
}

fn validate_paranoia(field: &str, level: i32) -> Result<(), Error> {
    if !(1..=4).contains(&level) {
        return Err(Error::validation(
            field,
            format!("must be between 1 and 4, got {level}"),
        ));
    }
    Ok(())
}

fn validate_rule_ids(field: &str, ids: &[u32]) -> Result<(), Error> {
    if ids.is_empty() {
        return Err(Error::validation(
            format!("{field}.ruleIds"),
            "at least one rule id is required",
        ));
    }
    Ok(())
}

/// Exception targets end up unquoted inside a `ctl:` action list
fn validate_target(field: &str, value: Option<&str>) -> Result<(), Error> {
    match value {
        Some(value) if value.contains([',', '\'', '"']) || value.contains(char::is_whitespace) => {
            Err(Error::validation(
                field,
                format!("must not contain quotes, commas or whitespace, got '{value}'"),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: Error) -> String {
        match err {
            Error::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_match_recommended_crs_setup() {
        let crs = CorazaWafCrs::default();
        assert_eq!(crs.mode, Mode::Block);
        assert_eq!(crs.request_anomaly_score, 5);
        assert_eq!(crs.response_anomaly_score, 4);
        assert_eq!(crs.paranoia_level, ParanoiaLevel { enforcing: 1, detecting: 1 });
        assert!(crs.enabled_request_rules.is_none());
        assert!(crs.enabled_response_rules.is_empty());
        assert!(crs.validate().is_ok());
    }

    #[test]
    fn mode_maps_to_rule_engine() {
        assert_eq!(Mode::Block.rule_engine(), "On");
        assert_eq!(Mode::Detect.rule_engine(), "DetectionOnly");
        let mode: Mode = serde_json::from_str("\"DETECT\"").unwrap();
        assert_eq!(mode, Mode::Detect);
    }

    #[test]
    fn paranoia_outside_range_names_the_level() {
        let mut crs = CorazaWafCrs::default();
        crs.paranoia_level.enforcing = 5;
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.paranoiaLevel.enforcing"
        );

        let mut crs = CorazaWafCrs::default();
        crs.paranoia_level.detecting = 0;
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.paranoiaLevel.detecting"
        );
    }

    /// Detecting below enforcing is unusual but accepted
    #[test]
    fn detecting_below_enforcing_is_accepted() {
        let mut crs = CorazaWafCrs::default();
        crs.paranoia_level = ParanoiaLevel { enforcing: 3, detecting: 1 };
        assert!(crs.validate().is_ok());
    }

    #[test]
    fn anomaly_scores_must_be_positive() {
        let mut crs = CorazaWafCrs::default();
        crs.request_anomaly_score = 0;
        assert_eq!(field_of(crs.validate().unwrap_err()), "crs.requestAnomalyScore");

        let mut crs = CorazaWafCrs::default();
        crs.response_anomaly_score = -1;
        assert_eq!(field_of(crs.validate().unwrap_err()), "crs.responseAnomalyScore");
    }

    #[test]
    fn exception_without_rule_ids_is_rejected() {
        let mut crs = CorazaWafCrs::default();
        crs.request_rule_exceptions.push(RequestRuleException {
            rule_ids: vec![920350],
            ..Default::default()
        });
        crs.request_rule_exceptions.push(RequestRuleException::default());
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.requestRuleExceptions[1].ruleIds"
        );

        let mut crs = CorazaWafCrs::default();
        crs.response_rule_exceptions.push(ResponseRuleException::default());
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.responseRuleExceptions[0].ruleIds"
        );
    }

    /// Exception paths are free-form prefixes; an empty one means global
    #[test]
    fn exception_paths_are_not_constrained() {
        let mut crs = CorazaWafCrs::default();
        crs.request_rule_exceptions.push(RequestRuleException {
            rule_ids: vec![942100],
            path: Some("api".to_string()),
            ..Default::default()
        });
        crs.response_rule_exceptions.push(ResponseRuleException {
            rule_ids: vec![950100],
            path: Some(String::new()),
        });
        assert!(crs.validate().is_ok());
    }

    #[test]
    fn path_settings_need_a_path() {
        let mut crs = CorazaWafCrs::default();
        crs.path_settings.push(PathSettings {
            path: "  ".to_string(),
            allowed_content_type: None,
            content_type_parser: None,
            allowed_methods: BTreeSet::new(),
        });
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.pathSettings[0].path"
        );
    }

    #[test]
    fn exception_targets_cannot_break_the_action_list() {
        let mut crs = CorazaWafCrs::default();
        crs.request_rule_exceptions.push(RequestRuleException {
            rule_ids: vec![942100],
            request_part_type: Some("ARGS".to_string()),
            request_part_name: Some("q,ctl:ruleEngine=Off".to_string()),
            path: None,
        });
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.requestRuleExceptions[0].requestPartName"
        );

        let mut crs = CorazaWafCrs::default();
        crs.request_rule_exceptions.push(RequestRuleException {
            rule_ids: vec![942100],
            request_part_type: Some("REQUEST_HEADERS'".to_string()),
            request_part_name: None,
            path: None,
        });
        assert_eq!(
            field_of(crs.validate().unwrap_err()),
            "crs.requestRuleExceptions[0].requestPartType"
        );
    }

    /// A part name without a part type is accepted and simply has no effect
    #[test]
    fn part_name_without_type_is_accepted() {
        let mut crs = CorazaWafCrs::default();
        crs.request_rule_exceptions.push(RequestRuleException {
            rule_ids: vec![913100],
            request_part_name: Some("User-Agent".to_string()),
            ..Default::default()
        });
        assert!(crs.validate().is_ok());
    }

    #[test]
    fn http_methods_render_with_dashes_and_sort() {
        let methods: BTreeSet<HttpMethod> = serde_json::from_str(
            r#"["POST", "VERSION_CONTROL", "GET", "BASELINE_CONTROL"]"#,
        )
        .unwrap();
        let settings = PathSettings {
            path: "/api".to_string(),
            allowed_content_type: None,
            content_type_parser: None,
            allowed_methods: methods,
        };
        assert_eq!(
            settings.allowed_methods_string(),
            "BASELINE-CONTROL GET POST VERSION-CONTROL"
        );
    }

    #[test]
    fn enabled_request_rules_keep_absent_and_empty_apart() {
        let absent = CorazaWafCrs::default();
        let json = serde_json::to_value(&absent).unwrap();
        assert!(json.get("enabledRequestRules").is_none());

        let empty = CorazaWafCrs {
            enabled_request_rules: Some(BTreeSet::new()),
            ..Default::default()
        };
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["enabledRequestRules"], serde_json::json!([]));

        let back: CorazaWafCrs = serde_json::from_value(json).unwrap();
        assert_eq!(back.enabled_request_rules, Some(BTreeSet::new()));
    }
}
