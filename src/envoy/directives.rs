//! Coraza SecLang directive generation
//!
//! Renders the directive list handed to the Coraza Go filter. The order is
//! significant: engine and body settings first, then the CRS setup and its
//! overrides, then exceptions and per-path settings, and finally the rule
//! family includes so every override runs before the rules it affects.

use crate::crd::{CorazaWafSpec, PathSettings, CRS_VERSION};
use crate::crs::{CompiledException, ResolvedCrsPolicy};

/// Rule id of the JSON body processor rule
pub const JSON_PROCESSOR_RULE_ID: u32 = 1000;
/// Rule id of the strict JSON validation rule
pub const JSON_VALIDATION_RULE_ID: u32 = 1001;
/// First rule id for request exceptions
pub const REQUEST_EXCEPTION_BASE_ID: u32 = 10_000;
/// First rule id for response exceptions
pub const RESPONSE_EXCEPTION_BASE_ID: u32 = 20_000;
/// First rule id for per-path settings
pub const PATH_SETTINGS_BASE_ID: u32 = 30_000;

/// Content types CRS allows out of the box (`tx.allowed_request_content_type`)
const DEFAULT_ALLOWED_CONTENT_TYPES: &str = "|application/x-www-form-urlencoded| \
|multipart/form-data| |multipart/related| |text/xml| |application/xml| \
|application/soap+xml| |application/json| |application/cloudevents+json| \
|application/cloudevents-batch+json|";

/// Coraza's recommended base settings that do not depend on the spec
const BASE_DIRECTIVES: &[&str] = &[
    "SecTmpDir /tmp",
    "SecDataDir /tmp",
    "SecResponseBodyMimeType text/plain text/html text/xml application/json",
    "SecAuditEngine RelevantOnly",
    "SecAuditLogRelevantStatus \"^(?:(5|4)(0|1)[0-9])$\"",
    "SecAuditLogParts ABIJDEFHZ",
    "SecAuditLogType Serial",
    "SecAuditLogFormat JSON",
    "SecAuditLog /dev/stdout",
];

/// Build the full directive list for a spec and its resolved CRS plan
pub fn coraza_directives(spec: &CorazaWafSpec, plan: &ResolvedCrsPolicy) -> Vec<String> {
    let mut directives: Vec<String> = BASE_DIRECTIVES.iter().map(|d| d.to_string()).collect();

    directives.push(format!("SecRuleEngine {}", plan.mode.rule_engine()));
    directives.extend(body_directives(spec));

    if spec.parse_json {
        directives.push(format!(
            "SecRule REQUEST_HEADERS:Content-Type \"^application/json\" \
             \"id:{JSON_PROCESSOR_RULE_ID},phase:1,t:none,t:lowercase,pass,nolog,ctl:requestBodyProcessor=JSON\""
        ));
    }
    if spec.validate_json {
        directives.push(format!(
            "SecRule REQBODY_PROCESSOR \"@streq JSON\" \
             \"id:{JSON_VALIDATION_RULE_ID},phase:2,t:none,log,deny,status:400,\
             msg:'Invalid JSON request body',logdata:'%{{reqbody_error_msg}}',severity:2,chain\""
        ));
        directives.push("SecRule REQBODY_ERROR \"!@eq 0\" \"t:none\"".to_string());
    }

    directives.extend(crs_setup_directives(plan));

    for (i, exception) in plan.request_exceptions.iter().enumerate() {
        directives.push(exception_rule(REQUEST_EXCEPTION_BASE_ID + i as u32, exception));
    }
    for (i, exception) in plan.response_exceptions.iter().enumerate() {
        directives.push(exception_rule(RESPONSE_EXCEPTION_BASE_ID + i as u32, exception));
    }
    for (i, settings) in spec.crs.path_settings.iter().enumerate() {
        if let Some(rule) = path_settings_rule(PATH_SETTINGS_BASE_ID + i as u32, settings) {
            directives.push(rule);
        }
    }

    directives.extend(
        plan.families()
            .map(|family| format!("Include @owasp_crs/{}", family.file_name())),
    );

    directives
}

/// Body inspection settings; limit actions are rendered even when access is off
fn body_directives(spec: &CorazaWafSpec) -> Vec<String> {
    vec![
        format!("SecRequestBodyAccess {}", on_off(spec.request_body_access)),
        format!("SecRequestBodyLimit {}", spec.request_body_limit_bytes()),
        format!("SecRequestBodyLimitAction {}", spec.request_body_limit_action),
        format!("SecResponseBodyAccess {}", on_off(spec.response_body_access)),
        format!("SecResponseBodyLimit {}", spec.response_body_limit_bytes()),
        format!("SecResponseBodyLimitAction {}", spec.response_body_limit_action),
    ]
}

fn crs_setup_directives(plan: &ResolvedCrsPolicy) -> Vec<String> {
    vec![
        "Include @crs-setup.conf.example".to_string(),
        format!(
            "SecAction \"id:900000,phase:1,pass,t:none,nolog,tag:'OWASP_CRS',ver:'OWASP_CRS/{CRS_VERSION}',\
             setvar:tx.blocking_paranoia_level={}\"",
            plan.blocking_paranoia_level
        ),
        format!(
            "SecAction \"id:900001,phase:1,pass,t:none,nolog,tag:'OWASP_CRS',ver:'OWASP_CRS/{CRS_VERSION}',\
             setvar:tx.detection_paranoia_level={}\"",
            plan.detection_paranoia_level
        ),
        format!(
            "SecAction \"id:900110,phase:1,pass,t:none,nolog,tag:'OWASP_CRS',ver:'OWASP_CRS/{CRS_VERSION}',\
             setvar:tx.inbound_anomaly_score_threshold={},\
             setvar:tx.outbound_anomaly_score_threshold={}\"",
            plan.inbound_anomaly_threshold, plan.outbound_anomaly_threshold
        ),
    ]
}

/// Global exceptions become a `SecAction`, scoped ones a path-prefix `SecRule`
fn exception_rule(id: u32, exception: &CompiledException) -> String {
    let actions = format!("id:{id},phase:1,pass,t:none,nolog,{}", exception.directive);
    match &exception.path {
        Some(path) => path_rule(path, &actions),
        None => format!("SecAction \"{actions}\""),
    }
}

/// Per-path overrides, or `None` when the settings override nothing
fn path_settings_rule(id: u32, settings: &PathSettings) -> Option<String> {
    let mut overrides = Vec::new();
    if !settings.allowed_methods.is_empty() {
        overrides.push(format!(
            "setvar:'tx.allowed_methods={}'",
            settings.allowed_methods_string()
        ));
    }
    if let Some(content_type) = &settings.allowed_content_type {
        overrides.push(format!(
            "setvar:'tx.allowed_request_content_type={DEFAULT_ALLOWED_CONTENT_TYPES} |{}|'",
            escape_single_quoted(&content_type.to_lowercase())
        ));
    }
    if let Some(parser) = settings.content_type_parser {
        overrides.push(format!("ctl:requestBodyProcessor={parser}"));
    }
    if overrides.is_empty() {
        return None;
    }

    let actions = format!("id:{id},phase:1,pass,t:none,nolog,{}", overrides.join(","));
    Some(path_rule(&settings.path, &actions))
}

fn path_rule(path: &str, actions: &str) -> String {
    format!(
        "SecRule REQUEST_FILENAME \"@beginsWith {}\" \"{actions}\"",
        escape_quotes(path)
    )
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Escape a value placed inside `'...'` within a double-quoted action list
fn escape_single_quoted(value: &str) -> String {
    escape_quotes(value).replace('\'', "\\'")
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "On"
    } else {
        "Off"
    }
}
