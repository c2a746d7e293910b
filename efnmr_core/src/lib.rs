//! Hardware-independent half of an Earth's-field NMR pulse-sequence controller.
//!
//! Everything that can be checked without silicon lives here and builds on the host:
//!
//! - [`timing`]: microseconds and the Larmor frequency to pulse engine cycles and ADC dividers.
//! - [`sequencer`]: the PIO pulse program and the four words that parameterize it.
//! - [`request`]: wire requests and range clamping.
//! - [`buffer`]: the DMA-owned sample pool.
//! - [`acquisition`]: the orchestrator, generic over the hardware traits the firmware implements.
//! - [`protocol`]: the line-oriented command handler, generic over an [`embedded_io`] channel.
//!
//! The firmware crate at the workspace root binds these traits to RP2040 peripherals.
//!
//! ## Crate features
//!
//! - `defmt`: derives [`defmt::Format`](https://docs.rs/defmt) on public types so the firmware can
//!   log them over RTT, and routes this crate's own log output through defmt instead of [`log`].

// Copyright 2024 Cameron Rodriguez
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod request;
pub mod sequencer;
pub mod timing;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod sim;

pub use acquisition::{Hardware, Orchestrator};
pub use config::Config;
pub use protocol::CommandHandler;
