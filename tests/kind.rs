//! End-to-end integration tests for the Coraza WAF operator
//!
//! These tests require a Kubernetes cluster to run. They are ignored by default
//! and can be run with:
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```
//!
//! The current kubeconfig context is used; the CorazaWaf CRD is installed if
//! it is missing.

mod kind_tests;
