//! Process-wide operator configuration
//!
//! Read once at startup from flags with environment fallbacks and shared
//! immutably with every reconciliation.

use clap::Args;

use crate::Error;

/// Default Envoy image bundling the Coraza Go filter
pub const DEFAULT_ENVOY_IMAGE_NAME: &str = "ghcr.io/united-security-providers/coraza-envoy-go-filter";

/// Default Envoy image tag
pub const DEFAULT_ENVOY_IMAGE_VERSION: &str = "latest";

/// Default location of the Coraza Go filter inside the image
pub const DEFAULT_GOFILTER_PATH: &str = "/usr/local/lib/coraza-waf.so";

/// Settings that apply to every CorazaWaf the operator manages
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Envoy proxy image name (without tag)
    #[arg(long, env = "CORAZAWAF_ENVOYIMAGE_NAME", default_value = DEFAULT_ENVOY_IMAGE_NAME)]
    pub envoy_image_name: String,

    /// Envoy proxy image tag
    #[arg(long, env = "CORAZAWAF_ENVOYIMAGE_VERSION", default_value = DEFAULT_ENVOY_IMAGE_VERSION)]
    pub envoy_image_version: String,

    /// Path of the Coraza Go filter shared object inside the proxy image
    #[arg(long, env = "CORAZAWAF_GOFILTER_PATH", default_value = DEFAULT_GOFILTER_PATH)]
    pub gofilter_path: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            envoy_image_name: DEFAULT_ENVOY_IMAGE_NAME.to_string(),
            envoy_image_version: DEFAULT_ENVOY_IMAGE_VERSION.to_string(),
            gofilter_path: DEFAULT_GOFILTER_PATH.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Full proxy image reference
    pub fn image(&self) -> String {
        format!("{}:{}", self.envoy_image_name, self.envoy_image_version)
    }

    /// Reject empty settings before the controller starts
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [
            ("CORAZAWAF_ENVOYIMAGE_NAME", &self.envoy_image_name),
            ("CORAZAWAF_ENVOYIMAGE_VERSION", &self.envoy_image_version),
            ("CORAZAWAF_GOFILTER_PATH", &self.gofilter_path),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(field, "cannot be empty"));
            }
        }
        Ok(())
    }
}
