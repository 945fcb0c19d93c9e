// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod ingester;

pub use config::IngesterConfig;
pub use ingester::DepositEventIngester;
