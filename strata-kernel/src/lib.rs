// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Strata kernel: builds the knowledge archive once and hands out the parts.
//!
//! ```rust,ignore
//! let config = StrataConfig::load("strata.toml")?;
//! strata_kernel::init_logging(&config.logging)?;
//!
//! let kernel = Kernel::open(config, "session-1", Arc::new(RuleBasedSummarizer::default()))?;
//! kernel.archive().record(Record::new("hi", Role::Recorder, KnowledgeState::Active));
//! let fossils = kernel.recent_fossils(5).await?;
//! kernel.shutdown().await;
//! ```

pub mod kernel;
pub mod telemetry;
pub mod worker;

pub use kernel::{Kernel, KernelStats};
pub use telemetry::init_logging;
pub use worker::CompactionWorker;
