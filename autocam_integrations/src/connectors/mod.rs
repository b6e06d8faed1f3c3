//! Tracker connectors implementing `autocam_core`'s `SourceClient` trait.

#[cfg(feature = "jira")]
pub mod jira;
