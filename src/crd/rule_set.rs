//! OWASP CRS rule set catalog
//!
//! Every selectable rule family carries its numeric code and the canonical
//! file name used by the CRS distribution as explicit companion values, so
//! the rendered `Include` directives never depend on identifier mangling.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CRS version shipped in the Envoy proxy image
///
/// Must match the rule files bundled with the image referenced by
/// `CORAZAWAF_ENVOYIMAGE_VERSION`.
pub const CRS_VERSION: &str = "4.18.0";

/// A numbered CRS rule family as it appears in the resolved policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleFamily {
    /// Numeric family code (e.g. 942)
    pub code: u16,
    /// Canonical CRS file stem (e.g. "REQUEST-942-APPLICATION-ATTACK-SQLI")
    pub name: &'static str,
}

impl RuleFamily {
    const fn new(code: u16, name: &'static str) -> Self {
        Self { code, name }
    }

    /// Rule file name inside the CRS distribution
    pub fn file_name(&self) -> String {
        format!("{}.conf", self.name)
    }
}

impl std::fmt::Display for RuleFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Request families that are always applied and cannot be configured
pub const MANDATORY_REQUEST_FAMILIES: [RuleFamily; 2] = [
    RuleFamily::new(901, "REQUEST-901-INITIALIZATION"),
    RuleFamily::new(949, "REQUEST-949-BLOCKING-EVALUATION"),
];

/// Response families that are always applied and cannot be configured
pub const MANDATORY_RESPONSE_FAMILIES: [RuleFamily; 2] = [
    RuleFamily::new(959, "RESPONSE-959-BLOCKING-EVALUATION"),
    RuleFamily::new(980, "RESPONSE-980-CORRELATION"),
];

/// User-selectable request rule families
///
/// Variants are declared in ascending code order, so the derived `Ord`
/// sorts by code.
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum RequestRuleSet {
    /// 911 - HTTP method enforcement
    #[serde(rename = "REQUEST_911_METHOD_ENFORCEMENT")]
    MethodEnforcement,
    /// 913 - Security scanner detection
    #[serde(rename = "REQUEST_913_SCANNER_DETECTION")]
    ScannerDetection,
    /// 920 - Protocol enforcement
    #[serde(rename = "REQUEST_920_PROTOCOL_ENFORCEMENT")]
    ProtocolEnforcement,
    /// 921 - Protocol attacks (request smuggling, header injection)
    #[serde(rename = "REQUEST_921_PROTOCOL_ATTACK")]
    ProtocolAttack,
    /// 922 - Multipart attacks
    #[serde(rename = "REQUEST_922_MULTIPART_ATTACK")]
    MultipartAttack,
    /// 930 - Local file inclusion
    #[serde(rename = "REQUEST_930_APPLICATION_ATTACK_LFI")]
    ApplicationAttackLfi,
    /// 931 - Remote file inclusion
    #[serde(rename = "REQUEST_931_APPLICATION_ATTACK_RFI")]
    ApplicationAttackRfi,
    /// 932 - Remote command execution
    #[serde(rename = "REQUEST_932_APPLICATION_ATTACK_RCE")]
    ApplicationAttackRce,
    /// 933 - PHP injection
    #[serde(rename = "REQUEST_933_APPLICATION_ATTACK_PHP")]
    ApplicationAttackPhp,
    /// 934 - Generic application attacks (Node.js, Perl, Ruby)
    #[serde(rename = "REQUEST_934_APPLICATION_ATTACK_GENERIC")]
    ApplicationAttackGeneric,
    /// 941 - Cross-site scripting
    #[serde(rename = "REQUEST_941_APPLICATION_ATTACK_XSS")]
    ApplicationAttackXss,
    /// 942 - SQL injection
    #[serde(rename = "REQUEST_942_APPLICATION_ATTACK_SQLI")]
    ApplicationAttackSqli,
    /// 943 - Session fixation
    #[serde(rename = "REQUEST_943_APPLICATION_ATTACK_SESSION_FIXATION")]
    ApplicationAttackSessionFixation,
    /// 944 - Java attacks
    #[serde(rename = "REQUEST_944_APPLICATION_ATTACK_JAVA")]
    ApplicationAttackJava,
}

impl RequestRuleSet {
    /// Every known request family, ascending by code
    pub const ALL: [RequestRuleSet; 14] = [
        Self::MethodEnforcement,
        Self::ScannerDetection,
        Self::ProtocolEnforcement,
        Self::ProtocolAttack,
        Self::MultipartAttack,
        Self::ApplicationAttackLfi,
        Self::ApplicationAttackRfi,
        Self::ApplicationAttackRce,
        Self::ApplicationAttackPhp,
        Self::ApplicationAttackGeneric,
        Self::ApplicationAttackXss,
        Self::ApplicationAttackSqli,
        Self::ApplicationAttackSessionFixation,
        Self::ApplicationAttackJava,
    ];

    /// The resolved family for this rule set
    pub const fn family(self) -> RuleFamily {
        match self {
            Self::MethodEnforcement => RuleFamily::new(911, "REQUEST-911-METHOD-ENFORCEMENT"),
            Self::ScannerDetection => RuleFamily::new(913, "REQUEST-913-SCANNER-DETECTION"),
            Self::ProtocolEnforcement => {
                RuleFamily::new(920, "REQUEST-920-PROTOCOL-ENFORCEMENT")
            }
            Self::ProtocolAttack => RuleFamily::new(921, "REQUEST-921-PROTOCOL-ATTACK"),
            Self::MultipartAttack => RuleFamily::new(922, "REQUEST-922-MULTIPART-ATTACK"),
            Self::ApplicationAttackLfi => {
                RuleFamily::new(930, "REQUEST-930-APPLICATION-ATTACK-LFI")
            }
            Self::ApplicationAttackRfi => {
                RuleFamily::new(931, "REQUEST-931-APPLICATION-ATTACK-RFI")
            }
            Self::ApplicationAttackRce => {
                RuleFamily::new(932, "REQUEST-932-APPLICATION-ATTACK-RCE")
            }
            Self::ApplicationAttackPhp => {
                RuleFamily::new(933, "REQUEST-933-APPLICATION-ATTACK-PHP")
            }
            Self::ApplicationAttackGeneric => {
                RuleFamily::new(934, "REQUEST-934-APPLICATION-ATTACK-GENERIC")
            }
            Self::ApplicationAttackXss => {
                RuleFamily::new(941, "REQUEST-941-APPLICATION-ATTACK-XSS")
            }
            Self::ApplicationAttackSqli => {
                RuleFamily::new(942, "REQUEST-942-APPLICATION-ATTACK-SQLI")
            }
            Self::ApplicationAttackSessionFixation => {
                RuleFamily::new(943, "REQUEST-943-APPLICATION-ATTACK-SESSION-FIXATION")
            }
            Self::ApplicationAttackJava => {
                RuleFamily::new(944, "REQUEST-944-APPLICATION-ATTACK-JAVA")
            }
        }
    }

    /// Numeric family code
    pub const fn code(self) -> u16 {
        self.family().code
    }

    /// Look up a request rule set by numeric code
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|rs| rs.code() == code)
    }
}

/// User-selectable response rule families
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum ResponseRuleSet {
    /// 950 - Generic data leakage
    #[serde(rename = "RESPONSE_950_DATA_LEAKAGES")]
    DataLeakages,
    /// 951 - SQL error leakage
    #[serde(rename = "RESPONSE_951_DATA_LEAKAGES_SQL")]
    DataLeakagesSql,
    /// 952 - Java error leakage
    #[serde(rename = "RESPONSE_952_DATA_LEAKAGES_JAVA")]
    DataLeakagesJava,
    /// 953 - PHP error leakage
    #[serde(rename = "RESPONSE_953_DATA_LEAKAGES_PHP")]
    DataLeakagesPhp,
    /// 954 - IIS error leakage
    #[serde(rename = "RESPONSE_954_DATA_LEAKAGES_IIS")]
    DataLeakagesIis,
    /// 955 - Web shell detection
    #[serde(rename = "RESPONSE_955_WEB_SHELLS")]
    WebShells,
    /// 956 - Ruby error leakage
    #[serde(rename = "RESPONSE_956_DATA_LEAKAGES_RUBY")]
    DataLeakagesRuby,
}

impl ResponseRuleSet {
    /// Every known response family, ascending by code
    pub const ALL: [ResponseRuleSet; 7] = [
        Self::DataLeakages,
        Self::DataLeakagesSql,
        Self::DataLeakagesJava,
        Self::DataLeakagesPhp,
        Self::DataLeakagesIis,
        Self::WebShells,
        Self::DataLeakagesRuby,
    ];

    /// The resolved family for this rule set
    pub const fn family(self) -> RuleFamily {
        match self {
            Self::DataLeakages => RuleFamily::new(950, "RESPONSE-950-DATA-LEAKAGES"),
            Self::DataLeakagesSql => RuleFamily::new(951, "RESPONSE-951-DATA-LEAKAGES-SQL"),
            Self::DataLeakagesJava => RuleFamily::new(952, "RESPONSE-952-DATA-LEAKAGES-JAVA"),
            Self::DataLeakagesPhp => RuleFamily::new(953, "RESPONSE-953-DATA-LEAKAGES-PHP"),
            Self::DataLeakagesIis => RuleFamily::new(954, "RESPONSE-954-DATA-LEAKAGES-IIS"),
            Self::WebShells => RuleFamily::new(955, "RESPONSE-955-WEB-SHELLS"),
            Self::DataLeakagesRuby => RuleFamily::new(956, "RESPONSE-956-DATA-LEAKAGES-RUBY"),
        }
    }

    /// Numeric family code
    pub const fn code(self) -> u16 {
        self.family().code
    }

    /// Look up a response rule set by numeric code
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|rs| rs.code() == code)
    }
}
