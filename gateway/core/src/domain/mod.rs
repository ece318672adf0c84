// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod approval;
pub mod audit;
pub mod principal;
pub mod report;
pub mod repository;
pub mod scan;
pub mod server;
