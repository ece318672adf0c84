// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Prometheus Metrics
//!
//! Metric names and recording helpers. The exporter recorder is
//! installed once by the binary; everything here is a no-op until then.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::domain::audit::Decision;
use crate::domain::scan::ScanStatus;
use crate::domain::server::{ServerStatus, SourceType};

pub const TOOL_CALLS_ALLOWED: &str = "aegis_gateway_tool_calls_allowed_total";
pub const TOOL_CALLS_DENIED: &str = "aegis_gateway_tool_calls_denied_total";
pub const SCAN_RUNS: &str = "aegis_gateway_scan_runs_total";
pub const SERVER_REGISTRATIONS: &str = "aegis_gateway_server_registrations_total";
pub const APPROVED_SERVERS: &str = "aegis_gateway_approved_servers";
pub const PENDING_SCANS: &str = "aegis_gateway_pending_scans";
pub const SCAN_RISK_SCORE: &str = "aegis_gateway_scan_risk_score";
pub const TOOL_CALL_LATENCY: &str = "aegis_gateway_tool_call_latency_seconds";
pub const POLICY_CHECK_LATENCY: &str = "aegis_gateway_policy_check_latency_seconds";

/// Register help text for every metric family this crate emits.
pub fn describe() {
    describe_counter!(TOOL_CALLS_ALLOWED, "Tool calls admitted by policy");
    describe_counter!(TOOL_CALLS_DENIED, "Tool calls denied by policy");
    describe_counter!(SCAN_RUNS, "Security scan runs by terminal status");
    describe_counter!(SERVER_REGISTRATIONS, "Server registrations");
    describe_gauge!(APPROVED_SERVERS, "Servers currently in Approved status");
    describe_gauge!(PENDING_SCANS, "Scans currently pending or running");
    describe_histogram!(SCAN_RISK_SCORE, "Distribution of ingested risk scores");
    describe_histogram!(TOOL_CALL_LATENCY, "End-to-end proxied tool call latency");
    describe_histogram!(POLICY_CHECK_LATENCY, "Policy decision latency");
}

pub fn record_tool_call(server: &str, tool: &str, team: Option<&str>, decision: Decision) {
    let team = team.unwrap_or("none").to_string();
    if decision.is_allowed() {
        counter!(
            TOOL_CALLS_ALLOWED,
            "server" => server.to_string(),
            "tool" => tool.to_string(),
            "team" => team
        )
        .increment(1);
    } else {
        counter!(
            TOOL_CALLS_DENIED,
            "server" => server.to_string(),
            "tool" => tool.to_string(),
            "team" => team,
            "reason" => decision.as_str()
        )
        .increment(1);
    }
}

pub fn record_tool_call_latency(server: &str, tool: &str, seconds: f64) {
    histogram!(
        TOOL_CALL_LATENCY,
        "server" => server.to_string(),
        "tool" => tool.to_string()
    )
    .record(seconds);
}

pub fn record_policy_check_latency(seconds: f64) {
    histogram!(POLICY_CHECK_LATENCY).record(seconds);
}

pub fn record_scan_run(status: ScanStatus) {
    counter!(SCAN_RUNS, "status" => status.as_str()).increment(1);
}

pub fn record_risk_score(score: f64) {
    histogram!(SCAN_RISK_SCORE).record(score);
}

pub fn record_registration(source_type: SourceType, status: ServerStatus) {
    counter!(
        SERVER_REGISTRATIONS,
        "source_type" => source_type.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

pub fn set_approved_servers(count: i64) {
    gauge!(APPROVED_SERVERS).set(count as f64);
}

pub fn set_pending_scans(count: i64) {
    gauge!(PENDING_SCANS).set(count as f64);
}
