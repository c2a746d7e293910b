//! This [RP2040](rp2040_hal) project drives an Earth's-field NMR spectrometer: it polarizes the
//! sample, plays an FID or CPMG pulse train from PIO, digitizes the coil signal with the ADC and
//! streams the samples to the host over USB serial. The hardware-independent logic lives in
//! [`efnmr_core`]; this crate binds it to the board.
//!
//! ## Pins
//!
//! | GPIO | Use                                   |
//! |------|---------------------------------------|
//! | 16   | RF gate, PIO0 side-set                |
//! | 22   | Rx/Tx isolation relay                 |
//! | 25   | Status LED                            |
//! | 26   | Pre-polarization coil driver          |
//! | 28   | Amplified coil signal (ADC input 2)   |
//!
//! ## Crate features
//!
//! - `report_effective`: Prefix every sample stream with a `# TYPE sleep size tau echoes` line
//!   holding the parameters actually used after clamping.
//! - `fid_echo_train`: Run the full refocusing train for FID requests instead of stopping after
//!   the 90° pulse.
//! - `trace_samples`: Log the min/max/mean of every capture. See
//!   [`CaptureSummary`](efnmr_core::buffer::CaptureSummary).

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

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

use efnmr_core::Config;

pub mod board;
pub mod capture;
pub mod components;
pub mod interrupt;
pub mod sequencer;
pub mod serial;

/// Default configuration for a system clock of `system_clock_hz`, with the crate features applied
pub fn config(system_clock_hz: u32) -> Config {
    let mut config = Config::default().with_system_clock_hz(system_clock_hz);
    config.report_effective = cfg!(feature = "report_effective");
    config.fid_echo_train = cfg!(feature = "fid_echo_train");
    config
}
