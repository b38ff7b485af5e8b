// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The stream protocol: the command interface from a CPU interface into the
//! IRS.
//!
//! On real hardware these commands travel over an asynchronous bus with
//! explicit acknowledgement. The emulator serializes all device state under
//! one lock, so each command is a synchronous call whose return implies full
//! acknowledgement; the command set is kept intact behind [`StreamProtocol`]
//! so an asynchronous backend remains possible.
//!
//! Commands address LPIs (in the domain's IST) and SPIs (in the IRS table).
//! PPI state never leaves the CPU interface, so a PPI-typed command reaching
//! the IRS is a guest error.

use crate::ist;
use crate::GicState;
use crate::GicV5;
use gicv5defs::cpuif::IccIcsr;
use gicv5defs::Domain;
use gicv5defs::HandlingMode;
use gicv5defs::IntType;
use gicv5defs::RoutingMode;
use gicv5defs::PRIORITY_MASK;

/// The stream protocol command set, as issued by a CPU interface (or a test
/// harness) into the IRS.
///
/// Every command carries the issuing domain and the interrupt type decoded
/// from the INTID. The `virt` flag exists on the wire but virtual interrupts
/// are unimplemented: commands with `virt` set log a guest error and do
/// nothing. Commands that mutate state finish by recomputing the target
/// CPU's highest-priority pending interrupt and wake lines.
pub trait StreamProtocol {
    fn set_priority(&self, id: u32, priority: u8, domain: Domain, ty: IntType, virt: bool);
    fn set_enabled(&self, id: u32, enabled: bool, domain: Domain, ty: IntType, virt: bool);
    fn set_pending(&self, id: u32, pending: bool, domain: Domain, ty: IntType, virt: bool);
    fn set_handling(&self, id: u32, hm: HandlingMode, domain: Domain, ty: IntType, virt: bool);
    fn set_target(
        &self,
        id: u32,
        iaffid: u16,
        irm: RoutingMode,
        domain: Domain,
        ty: IntType,
        virt: bool,
    );
    /// Reads the interrupt's configuration, packed in `ICC_ICSR_EL1` layout.
    /// On failure only the `F` bit is set.
    fn request_config(&self, id: u32, domain: Domain, ty: IntType, virt: bool) -> u64;
    /// Marks the interrupt active; edge-handled interrupts also drop their
    /// pending state.
    fn activate(&self, id: u32, domain: Domain, ty: IntType, virt: bool);
    fn deactivate(&self, id: u32, domain: Domain, ty: IntType, virt: bool);
}

/// Checks the unsupported-flag and unsupported-type errors common to every
/// command. Returns false if the command must be dropped.
fn check_command(command: &str, ty: IntType, virt: bool) -> bool {
    if virt {
        tracing::warn!(command, "virtual interrupts not supported");
        return false;
    }
    if ty == IntType::Ppi {
        tracing::warn!(command, "PPIs are not IRS interrupts");
        return false;
    }
    true
}

impl GicState {
    /// Runs `update` against the L2 ISTE of LPI `id`, committing the change
    /// and resignaling the target CPU. Walk failures were already logged and
    /// drop the command.
    fn update_lpi(&mut self, domain: Domain, id: u32, update: impl FnOnce(&mut ist::IsteHandle)) {
        let cfg = self.irs.ist_cfg[domain.index()];
        let Some(mut handle) =
            ist::get_l2_iste(self.mem.as_ref(), &cfg, &self.irs.lpi_cache, domain, id)
        else {
            return;
        };
        update(&mut handle);
        let iaffid = handle.iaffid();
        ist::put_l2_iste(self.mem.as_ref(), &cfg, &mut self.irs.lpi_cache, handle);
        self.resignal_iaffid(iaffid);
    }

    /// Runs `update` against the SPI record for `id`, resignaling the target
    /// CPU. Unreachable SPIs (unmanaged, or assigned to another domain) are
    /// a logged no-op.
    fn update_spi(
        &mut self,
        command: &str,
        domain: Domain,
        id: u32,
        update: impl FnOnce(&mut crate::spi::SpiState),
    ) {
        let Some(index) = self.spi_in_domain(domain, id) else {
            tracing::warn!(command, domain = domain.name(), id, "unreachable SPI");
            return;
        };
        let spi = &mut self.irs.spis[index];
        update(spi);
        let iaffid = spi.iaffid;
        self.resignal_iaffid(iaffid);
    }

    pub(crate) fn stream_set_priority(
        &mut self,
        id: u32,
        priority: u8,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) {
        tracing::trace!(
            domain = domain.name(),
            ty = ty.name(),
            id,
            priority,
            "set_priority"
        );
        if !check_command("set_priority", ty, virt) {
            return;
        }
        // Unimplemented low-order priority bits are ignored.
        let priority = priority & PRIORITY_MASK;
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| h.word.set_priority(priority)),
            IntType::Spi => self.update_spi("set_priority", domain, id, |s| s.priority = priority),
            IntType::Ppi => unreachable!(),
        }
    }

    pub(crate) fn stream_set_enabled(
        &mut self,
        id: u32,
        enabled: bool,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) {
        tracing::trace!(
            domain = domain.name(),
            ty = ty.name(),
            id,
            enabled,
            "set_enabled"
        );
        if !check_command("set_enabled", ty, virt) {
            return;
        }
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| h.word.set_enable(enabled)),
            IntType::Spi => self.update_spi("set_enabled", domain, id, |s| s.enabled = enabled),
            IntType::Ppi => unreachable!(),
        }
    }

    pub(crate) fn stream_set_pending(
        &mut self,
        id: u32,
        pending: bool,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) {
        tracing::trace!(
            domain = domain.name(),
            ty = ty.name(),
            id,
            pending,
            "set_pending"
        );
        if !check_command("set_pending", ty, virt) {
            return;
        }
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| h.word.set_pending(pending)),
            IntType::Spi => self.update_spi("set_pending", domain, id, |s| s.pending = pending),
            IntType::Ppi => unreachable!(),
        }
    }

    pub(crate) fn stream_set_handling(
        &mut self,
        id: u32,
        hm: HandlingMode,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) {
        tracing::trace!(
            domain = domain.name(),
            ty = ty.name(),
            id,
            hm = hm.bit(),
            "set_handling"
        );
        if !check_command("set_handling", ty, virt) {
            return;
        }
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| h.word.set_hm(hm.bit())),
            IntType::Spi => self.update_spi("set_handling", domain, id, |s| s.hm = hm),
            IntType::Ppi => unreachable!(),
        }
    }

    pub(crate) fn stream_set_target(
        &mut self,
        id: u32,
        iaffid: u16,
        irm: RoutingMode,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) {
        tracing::trace!(
            domain = domain.name(),
            ty = ty.name(),
            id,
            iaffid,
            "set_target"
        );
        if !check_command("set_target", ty, virt) {
            return;
        }
        if irm == RoutingMode::OneOfN {
            tracing::warn!(id, "1-of-N routing not supported, treating as targeted");
        }
        // The CPU that used to own the interrupt may lose its HPPI.
        let old_target = match ty {
            IntType::Lpi => {
                let cfg = self.irs.ist_cfg[domain.index()];
                ist::get_l2_iste(self.mem.as_ref(), &cfg, &self.irs.lpi_cache, domain, id)
                    .map(|handle| handle.iaffid())
            }
            IntType::Spi => self
                .spi_in_domain(domain, id)
                .map(|index| self.irs.spis[index].iaffid),
            IntType::Ppi => unreachable!(),
        };
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| {
                h.word.set_irm(false);
                h.word.set_iaffid(iaffid);
            }),
            IntType::Spi => self.update_spi("set_target", domain, id, |s| {
                s.irm = RoutingMode::Targeted;
                s.iaffid = iaffid;
            }),
            IntType::Ppi => unreachable!(),
        }
        if let Some(old) = old_target {
            if old != iaffid {
                self.resignal_iaffid(old);
            }
        }
    }

    pub(crate) fn stream_request_config(
        &mut self,
        id: u32,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) -> u64 {
        tracing::trace!(domain = domain.name(), ty = ty.name(), id, "request_config");
        let failed = IccIcsr::new().with_f(true).into();
        if !check_command("request_config", ty, virt) {
            return failed;
        }
        match ty {
            IntType::Lpi => {
                let cfg = self.irs.ist_cfg[domain.index()];
                let Some(handle) =
                    ist::get_l2_iste(self.mem.as_ref(), &cfg, &self.irs.lpi_cache, domain, id)
                else {
                    return failed;
                };
                let word = handle.word;
                IccIcsr::new()
                    .with_pending(word.pending())
                    .with_active(word.active())
                    .with_hm(word.hm())
                    .with_enabled(word.enable())
                    .with_irm(word.irm())
                    .with_priority(word.priority())
                    .with_iaffid(word.iaffid())
                    .into()
            }
            IntType::Spi => {
                let Some(index) = self.spi_in_domain(domain, id) else {
                    tracing::warn!(domain = domain.name(), id, "request_config: unreachable SPI");
                    return failed;
                };
                let spi = &self.irs.spis[index];
                IccIcsr::new()
                    .with_pending(spi.pending)
                    .with_active(spi.active)
                    .with_hm(spi.hm.bit())
                    .with_enabled(spi.enabled)
                    .with_irm(spi.irm.bit())
                    .with_priority(spi.priority)
                    .with_iaffid(spi.iaffid)
                    .into()
            }
            IntType::Ppi => unreachable!(),
        }
    }

    pub(crate) fn stream_activate(&mut self, id: u32, domain: Domain, ty: IntType, virt: bool) {
        tracing::trace!(domain = domain.name(), ty = ty.name(), id, "activate");
        if !check_command("activate", ty, virt) {
            return;
        }
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| {
                h.word.set_active(true);
                if HandlingMode::from_bit(h.word.hm()) == HandlingMode::Edge {
                    h.word.set_pending(false);
                }
            }),
            IntType::Spi => self.update_spi("activate", domain, id, |s| {
                s.active = true;
                if s.hm == HandlingMode::Edge {
                    s.pending = false;
                }
            }),
            IntType::Ppi => unreachable!(),
        }
    }

    pub(crate) fn stream_deactivate(&mut self, id: u32, domain: Domain, ty: IntType, virt: bool) {
        tracing::trace!(domain = domain.name(), ty = ty.name(), id, "deactivate");
        if !check_command("deactivate", ty, virt) {
            return;
        }
        match ty {
            IntType::Lpi => self.update_lpi(domain, id, |h| h.word.set_active(false)),
            IntType::Spi => self.update_spi("deactivate", domain, id, |s| s.active = false),
            IntType::Ppi => unreachable!(),
        }
    }
}

impl StreamProtocol for GicV5 {
    fn set_priority(&self, id: u32, priority: u8, domain: Domain, ty: IntType, virt: bool) {
        self.state
            .lock()
            .stream_set_priority(id, priority, domain, ty, virt);
    }

    fn set_enabled(&self, id: u32, enabled: bool, domain: Domain, ty: IntType, virt: bool) {
        self.state
            .lock()
            .stream_set_enabled(id, enabled, domain, ty, virt);
    }

    fn set_pending(&self, id: u32, pending: bool, domain: Domain, ty: IntType, virt: bool) {
        self.state
            .lock()
            .stream_set_pending(id, pending, domain, ty, virt);
    }

    fn set_handling(&self, id: u32, hm: HandlingMode, domain: Domain, ty: IntType, virt: bool) {
        self.state
            .lock()
            .stream_set_handling(id, hm, domain, ty, virt);
    }

    fn set_target(
        &self,
        id: u32,
        iaffid: u16,
        irm: RoutingMode,
        domain: Domain,
        ty: IntType,
        virt: bool,
    ) {
        self.state
            .lock()
            .stream_set_target(id, iaffid, irm, domain, ty, virt);
    }

    fn request_config(&self, id: u32, domain: Domain, ty: IntType, virt: bool) -> u64 {
        self.state.lock().stream_request_config(id, domain, ty, virt)
    }

    fn activate(&self, id: u32, domain: Domain, ty: IntType, virt: bool) {
        self.state.lock().stream_activate(id, domain, ty, virt);
    }

    fn deactivate(&self, id: u32, domain: Domain, ty: IntType, virt: bool) {
        self.state.lock().stream_deactivate(id, domain, ty, virt);
    }
}
