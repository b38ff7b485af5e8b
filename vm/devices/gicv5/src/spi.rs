// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-SPI state.
//!
//! SPIs are the IRS-owned, wire-driven interrupts. Each SPI in the IRS's
//! managed range `[spi_base, spi_base + spi_irs_range)` has one record here;
//! the wire level is latched so trigger-mode changes and resampling can
//! reevaluate the pending state.

use gicv5defs::Domain;
use gicv5defs::HandlingMode;
use gicv5defs::RoutingMode;
use gicv5defs::TriggerMode;

#[derive(Debug)]
pub(crate) struct SpiState {
    /// The domain this SPI is assigned to, writable through the EL3 frame's
    /// `IRS_SPI_DOMAINR`.
    pub domain: Domain,
    pub iaffid: u16,
    pub priority: u8,
    /// Current wire state.
    pub level: bool,
    pub pending: bool,
    pub active: bool,
    pub enabled: bool,
    pub tm: TriggerMode,
    pub hm: HandlingMode,
    pub irm: RoutingMode,
}

impl SpiState {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            iaffid: 0,
            priority: 0,
            level: false,
            pending: false,
            active: false,
            enabled: false,
            tm: TriggerMode::Edge,
            hm: HandlingMode::Edge,
            irm: RoutingMode::Targeted,
        }
    }

    /// Reevaluates the pending state from the latched wire level.
    ///
    /// A high wire sets pending and refreshes the handling mode from the
    /// trigger mode; a low wire clears pending only for level-triggered
    /// SPIs.
    pub fn sample(&mut self) {
        if self.level {
            self.pending = true;
            self.hm = match self.tm {
                TriggerMode::Edge => HandlingMode::Edge,
                TriggerMode::Level => HandlingMode::Level,
            };
        } else if self.tm == TriggerMode::Level {
            self.pending = false;
        }
    }

    /// Applies an `IRS_SPI_CFGR.TM` change, reevaluating pending state
    /// against the latched wire level.
    pub fn set_trigger_mode(&mut self, tm: TriggerMode) {
        if self.tm == tm {
            return;
        }
        self.tm = tm;
        match tm {
            TriggerMode::Level => {
                if self.level {
                    self.pending = true;
                    self.hm = HandlingMode::Level;
                } else {
                    self.pending = false;
                }
            }
            TriggerMode::Edge => {
                if self.level {
                    self.pending = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_spi() -> SpiState {
        let mut spi = SpiState::new(Domain::NonSecure);
        spi.tm = TriggerMode::Level;
        spi
    }

    #[test]
    fn level_triggered_follows_wire() {
        let mut spi = level_spi();
        spi.level = true;
        spi.sample();
        assert!(spi.pending);
        assert_eq!(spi.hm, HandlingMode::Level);

        spi.level = false;
        spi.sample();
        assert!(!spi.pending);
    }

    #[test]
    fn edge_triggered_latches() {
        let mut spi = SpiState::new(Domain::NonSecure);
        spi.level = true;
        spi.sample();
        assert!(spi.pending);
        assert_eq!(spi.hm, HandlingMode::Edge);

        // Falling edge does not clear an edge-triggered pend.
        spi.level = false;
        spi.sample();
        assert!(spi.pending);
    }

    #[test]
    fn trigger_mode_round_trip_with_high_wire() {
        let mut spi = level_spi();
        spi.level = true;
        spi.sample();

        // Level -> Edge with the wire high drops the pend.
        spi.set_trigger_mode(TriggerMode::Edge);
        assert!(!spi.pending);

        // Edge -> Level with the wire high re-pends as level-handled.
        spi.set_trigger_mode(TriggerMode::Level);
        assert!(spi.pending);
        assert_eq!(spi.hm, HandlingMode::Level);
    }

    #[test]
    fn trigger_mode_to_level_with_low_wire_clears() {
        let mut spi = SpiState::new(Domain::NonSecure);
        spi.pending = true;
        spi.set_trigger_mode(TriggerMode::Level);
        assert!(!spi.pending);
    }

    #[test]
    fn unchanged_trigger_mode_is_a_no_op() {
        let mut spi = level_spi();
        spi.level = true;
        spi.pending = true;
        spi.hm = HandlingMode::Level;
        spi.set_trigger_mode(TriggerMode::Level);
        assert!(spi.pending);
    }
}
