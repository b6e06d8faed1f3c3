//! Autocam integrations: external tracker connectors.

pub mod connectors;

#[cfg(feature = "jira")]
pub use connectors::jira::JiraSourceClient;
