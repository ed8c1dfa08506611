//! Integration tests for the Coraza WAF operator
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! application teams put a WAF in front of their backends.
//!
//! # Test Organization
//!
//! - `waf_lifecycle`: Stories about creating CorazaWaf resources and
//!   reconciling them into a ConfigMap, Deployment and Service
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod helpers;
mod waf_lifecycle;
