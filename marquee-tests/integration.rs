//! Integration tests for Marquee
//!
//! These tests exercise the components together: repository manifests served
//! over real HTTP, installation into a providers root, registry persistence
//! across restarts, and resolution across several providers.

#[path = "integration/install_flow.rs"]
mod install_flow;
#[path = "integration/registry_persistence.rs"]
mod registry_persistence;
#[path = "integration/resolution_flow.rs"]
mod resolution_flow;
