// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Server Aggregate
//!
//! A `Server` is one registered MCP tool-server and the root of the
//! governance lifecycle: *register → scan → approve → enforce → audit*.
//! Status moves only along the transitions encoded in
//! [`ServerStatus::may_transition`]; services must consult it before
//! persisting a new status.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::domain::scan::ScanId;

/// canonicalId format: lowercase alphanumeric ends, `-`/`_`/`/` allowed
/// inside. Matched case-insensitively; stored as given.
static CANONICAL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[a-z0-9][a-z0-9\-_/]*[a-z0-9]$").expect("canonical id pattern is valid")
});

/// Longest canonicalId accepted; keeps it usable as a single path segment.
pub const CANONICAL_ID_MAX_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the server's code or artifact comes from. Persisted by ordinal;
/// append new variants at the end, never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    ExternalRepo,
    InternalRepo,
    LocalDeclared,
    ContainerImage,
    PackageArtifact,
}

impl SourceType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::ExternalRepo),
            1 => Some(Self::InternalRepo),
            2 => Some(Self::LocalDeclared),
            3 => Some(Self::ContainerImage),
            4 => Some(Self::PackageArtifact),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExternalRepo => "external-repo",
            Self::InternalRepo => "internal-repo",
            Self::LocalDeclared => "local-declared",
            Self::ContainerImage => "container-image",
            Self::PackageArtifact => "package-artifact",
        }
    }
}

/// Lifecycle status. Persisted by ordinal; append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerStatus {
    Draft,
    PendingScan,
    Scanning,
    ScannedPass,
    ScannedFail,
    PendingApproval,
    Approved,
    Denied,
    Deprecated,
    Suspended,
}

impl ServerStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Draft),
            1 => Some(Self::PendingScan),
            2 => Some(Self::Scanning),
            3 => Some(Self::ScannedPass),
            4 => Some(Self::ScannedFail),
            5 => Some(Self::PendingApproval),
            6 => Some(Self::Approved),
            7 => Some(Self::Denied),
            8 => Some(Self::Deprecated),
            9 => Some(Self::Suspended),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::PendingScan => "PendingScan",
            Self::Scanning => "Scanning",
            Self::ScannedPass => "ScannedPass",
            Self::ScannedFail => "ScannedFail",
            Self::PendingApproval => "PendingApproval",
            Self::Approved => "Approved",
            Self::Denied => "Denied",
            Self::Deprecated => "Deprecated",
            Self::Suspended => "Suspended",
        }
    }

    /// Statuses from which a new scan may be submitted.
    pub fn accepts_scan_submission(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::ScannedPass | Self::ScannedFail | Self::Denied
        )
    }

    /// Denied and Deprecated are terminal; everything else may still be denied.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Deprecated)
    }

    /// Whether the (self, to) pair is in the permitted transition set.
    pub fn may_transition(self, to: ServerStatus) -> bool {
        use ServerStatus::*;
        match (self, to) {
            // submit-scan
            (Draft | ScannedPass | ScannedFail | Denied, PendingScan) => true,
            // orchestrator picked the scan up
            (PendingScan, Scanning) => true,
            // scan verdicts; a failed submission also lands in ScannedFail
            (Scanning, ScannedPass) | (Scanning, ScannedFail) => true,
            (PendingScan, ScannedFail) => true,
            // approval decisions
            (ScannedPass | PendingApproval | ScannedFail, Approved) => true,
            (from, Denied) => !from.is_terminal(),
            (Approved, Suspended) => true,
            (Suspended, Approved) => true,
            (Approved, Deprecated) => true,
            // material update while approved
            (Approved, Draft) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: ServerId,
    /// Immutable after creation; unique case-insensitively.
    pub canonical_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_team: String,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub version: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub declared_tools: Vec<String>,
    /// Opaque transport descriptor handed to the proxy; never interpreted here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_endpoint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_scan_id: Option<ScanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_risk_score: Option<f64>,
}

impl Server {
    /// Fields whose change on an Approved server forces it back to Draft.
    pub fn material_change(&self, other: &Server) -> bool {
        self.version != other.version
            || self.source_url != other.source_url
            || self.declared_tools != other.declared_tools
            || self.mcp_config != other.mcp_config
    }
}

/// Validates a canonicalId against the registry format.
pub fn validate_canonical_id(candidate: &str) -> Result<(), String> {
    if candidate.is_empty() {
        return Err("canonicalId must not be empty".to_string());
    }
    if candidate.len() > CANONICAL_ID_MAX_LEN {
        return Err(format!(
            "canonicalId exceeds {} characters",
            CANONICAL_ID_MAX_LEN
        ));
    }
    if !CANONICAL_ID_RE.is_match(candidate) {
        return Err(format!(
            "canonicalId '{}' must start and end with a letter or digit and contain only letters, digits, '-', '_' or '/'",
            candidate
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_validation() {
        assert!(validate_canonical_id("team-a/weather").is_ok());
        assert!(validate_canonical_id("a0").is_ok());
        assert!(validate_canonical_id("Team-A/Weather").is_ok()); // case-insensitive match
        assert!(validate_canonical_id("x").is_err()); // needs two anchor chars
        assert!(validate_canonical_id("").is_err());
        assert!(validate_canonical_id("-team").is_err());
        assert!(validate_canonical_id("team-").is_err());
        assert!(validate_canonical_id("team a").is_err());
    }

    #[test]
    fn test_canonical_id_length_limit() {
        let exactly = format!("a{}b", "x".repeat(CANONICAL_ID_MAX_LEN - 2));
        assert_eq!(exactly.len(), CANONICAL_ID_MAX_LEN);
        assert!(validate_canonical_id(&exactly).is_ok());
        let over = format!("a{}b", "x".repeat(CANONICAL_ID_MAX_LEN - 1));
        assert!(validate_canonical_id(&over).is_err());
    }

    #[test]
    fn test_status_transitions() {
        use ServerStatus::*;
        assert!(Draft.may_transition(PendingScan));
        assert!(ScannedFail.may_transition(PendingScan));
        assert!(Denied.may_transition(PendingScan));
        assert!(PendingScan.may_transition(Scanning));
        assert!(Scanning.may_transition(ScannedPass));
        assert!(Scanning.may_transition(ScannedFail));
        assert!(ScannedPass.may_transition(Approved));
        assert!(ScannedFail.may_transition(Approved)); // override path, gated upstream
        assert!(Approved.may_transition(Suspended));
        assert!(Suspended.may_transition(Approved));
        assert!(Approved.may_transition(Draft));

        assert!(!Draft.may_transition(Approved));
        assert!(!Approved.may_transition(PendingScan));
        assert!(!Denied.may_transition(Approved));
        assert!(!Deprecated.may_transition(Denied));
        assert!(!Denied.may_transition(Denied));
    }

    #[test]
    fn test_scan_submission_preconditions() {
        use ServerStatus::*;
        for status in [Draft, ScannedPass, ScannedFail, Denied] {
            assert!(status.accepts_scan_submission(), "{:?}", status);
        }
        for status in [PendingScan, Scanning, PendingApproval, Approved, Deprecated, Suspended] {
            assert!(!status.accepts_scan_submission(), "{:?}", status);
        }
    }

    #[test]
    fn test_status_ordinals_stable() {
        for v in 0..10 {
            let status = ServerStatus::from_i16(v).unwrap();
            assert_eq!(status.as_i16(), v);
        }
        assert!(ServerStatus::from_i16(10).is_none());
        assert_eq!(ServerStatus::Draft.as_i16(), 0);
        assert_eq!(ServerStatus::Suspended.as_i16(), 9);
    }

    #[test]
    fn test_material_change_detection() {
        let base = Server {
            id: ServerId::new(),
            canonical_id: "team-a/weather".to_string(),
            name: "weather".to_string(),
            description: None,
            owner_team: "team-a".to_string(),
            source_type: SourceType::ContainerImage,
            source_url: Some("registry.local/weather:1".to_string()),
            version: "1".to_string(),
            status: ServerStatus::Approved,
            declared_tools: vec!["get_weather".to_string()],
            mcp_config: None,
            test_endpoint: None,
            tags: vec![],
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            latest_scan_id: None,
            latest_risk_score: None,
        };

        let mut renamed = base.clone();
        renamed.name = "weather-v2".to_string();
        assert!(!base.material_change(&renamed));

        let mut bumped = base.clone();
        bumped.version = "2".to_string();
        assert!(base.material_change(&bumped));

        let mut retooled = base.clone();
        retooled.declared_tools.push("get_forecast".to_string());
        assert!(base.material_change(&retooled));
    }
}
