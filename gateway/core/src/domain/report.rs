// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Scanner Report Parsing
//!
//! The scanner is an opaque external process whose output schema drifts
//! between releases. The parser extracts the documented fields, ignores
//! everything it does not recognize, and clamps numeric ranges. Some
//! scanner builds emit risk on a 0–100 scale; when any observed score
//! exceeds 1.0 the whole report is rescaled by 1/100 once, then clamped
//! to the unit interval.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::scan::{DiscoveredTool, IssueSeverity, ScanIssue, ToolLabels};

/// Everything the gateway extracts from one scanner run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub risk_score: f64,
    pub summary: Option<String>,
    pub issues: Vec<ScanIssue>,
    pub tools: Vec<DiscoveredTool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportParseError {
    #[error("scanner output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scanner output is not a JSON object")]
    NotAnObject,
}

pub fn parse_scan_output(raw: &str) -> Result<ParsedReport, ReportParseError> {
    let value: Value = serde_json::from_str(raw)?;
    let obj = value.as_object().ok_or(ReportParseError::NotAnObject)?;

    let raw_risk = obj
        .get("risk_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string);

    let issues: Vec<ScanIssue> = obj
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_issue).collect())
        .unwrap_or_default();

    let mut tools: Vec<DiscoveredTool> = obj
        .get("tools")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_tool).collect())
        .unwrap_or_default();

    // Detect the 0–100 scale across every score in the report, so a
    // report with risk_score 0.9 but a label of 73.0 rescales uniformly.
    let mut max_observed = raw_risk;
    for tool in &tools {
        for v in [
            tool.labels.is_public_sink,
            tool.labels.destructive,
            tool.labels.untrusted_content,
            tool.labels.private_data,
        ] {
            if v > max_observed {
                max_observed = v;
            }
        }
    }
    let scale = if max_observed > 1.0 { 0.01 } else { 1.0 };

    let risk_score = clamp_unit(raw_risk * scale);
    for tool in &mut tools {
        tool.labels = ToolLabels {
            is_public_sink: clamp_unit(tool.labels.is_public_sink * scale),
            destructive: clamp_unit(tool.labels.destructive * scale),
            untrusted_content: clamp_unit(tool.labels.untrusted_content * scale),
            private_data: clamp_unit(tool.labels.private_data * scale),
        };
    }

    Ok(ParsedReport {
        risk_score,
        summary,
        issues,
        tools,
    })
}

impl ParsedReport {
    /// Canonical scanner-schema rendering; parsing it back yields an
    /// identical report.
    pub fn to_report_json(&self) -> Value {
        serde_json::json!({
            "risk_score": self.risk_score,
            "summary": self.summary,
            "issues": self.issues.iter().map(|i| serde_json::json!({
                "code": i.code,
                "severity": match i.severity {
                    IssueSeverity::Info => "info",
                    IssueSeverity::Warning => "warning",
                    IssueSeverity::Error => "error",
                    IssueSeverity::Critical => "critical",
                },
                "message": i.message,
                "affected_entity": i.affected_entity,
                "remediation": i.remediation,
            })).collect::<Vec<_>>(),
            "tools": self.tools.iter().map(|t| serde_json::json!({
                "name": t.name,
                "description": t.description,
                "description_hash": t.description_hash,
                "labels": {
                    "isPublicSink": t.labels.is_public_sink,
                    "destructive": t.labels.destructive,
                    "untrustedContent": t.labels.untrusted_content,
                    "privateData": t.labels.private_data,
                },
            })).collect::<Vec<_>>(),
        })
    }
}

fn parse_issue(item: &Value) -> Option<ScanIssue> {
    let obj = item.as_object()?;
    let message = obj.get("message").and_then(Value::as_str)?.to_string();
    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .map(IssueSeverity::parse_lenient)
        .unwrap_or(IssueSeverity::Info);
    Some(ScanIssue {
        code: obj
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("UNSPECIFIED")
            .to_string(),
        severity,
        message,
        affected_entity: obj
            .get("affected_entity")
            .and_then(Value::as_str)
            .map(str::to_string),
        remediation: obj
            .get("remediation")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_tool(item: &Value) -> Option<DiscoveredTool> {
    let obj = item.as_object()?;
    let name = obj.get("name").and_then(Value::as_str)?.to_string();
    let labels = obj
        .get("labels")
        .and_then(Value::as_object)
        .map(|l| ToolLabels {
            is_public_sink: label(l, "isPublicSink"),
            destructive: label(l, "destructive"),
            untrusted_content: label(l, "untrustedContent"),
            private_data: label(l, "privateData"),
        })
        .unwrap_or_default();
    Some(DiscoveredTool {
        name,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        description_hash: obj
            .get("description_hash")
            .and_then(Value::as_str)
            .map(str::to_string),
        labels,
    })
}

fn label(obj: &serde_json::Map<String, Value>, key: &str) -> f64 {
    obj.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}
