// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS MCP Gateway — Core
//!
//! Governance core for Model Context Protocol tool-servers: a registry
//! state machine, an asynchronous scan orchestrator, a synchronous
//! policy decision engine on the proxied tool-call path, and an
//! append-only audit pipeline.
//!
//! Layering follows the usual split:
//! - `domain` — aggregates, the status state machine, repository traits
//! - `application` — registry, orchestrator, policy engine, audit
//! - `infrastructure` — PostgreSQL and in-memory repositories, the
//!   cluster scheduler, metrics
//! - `presentation` — HTTP routes, principal extraction, enforcement
//!   middleware

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
