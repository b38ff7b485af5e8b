// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-CPU interface: banked `ICC_*` registers, PPI state, the
//! acknowledge/priority-drop/deactivate flow, and the wake lines.
//!
//! PPIs are CPU-local: their state lives entirely here, in two 64-bit banks.
//! Everything else (SPIs, LPIs) is reached through the stream protocol into
//! the IRS. Each state change that can affect the highest-priority pending
//! interrupt ends with a wake-line recompute.

use crate::GicState;
use crate::PendingIrq;
use gicv5defs::cpuif::Cdaff;
use gicv5defs::cpuif::CdIntid;
use gicv5defs::cpuif::Cdhm;
use gicv5defs::cpuif::Cdpend;
use gicv5defs::cpuif::Cdpri;
use gicv5defs::cpuif::IccCr0;
use gicv5defs::cpuif::IccIcsr;
use gicv5defs::cpuif::IccIdr0;
use gicv5defs::cpuif::IccPcr;
use gicv5defs::cpuif::HPPIV;
use gicv5defs::ppi;
use gicv5defs::Domain;
use gicv5defs::HandlingMode;
use gicv5defs::IntType;
use gicv5defs::Intid;
use gicv5defs::RoutingMode;
use gicv5defs::IAFFID_BITS;
use gicv5defs::NUM_DOMAINS;
use gicv5defs::NUM_PPIS;
use gicv5defs::PRIO_IDLE;
use gicv5defs::PRI_BITS;
use parking_lot::Mutex;
use std::sync::Arc;

/// The link from the GIC to one emulated CPU: the wake lines the GIC drives,
/// and the few bits of architectural CPU state interrupt delivery depends
/// on.
///
/// All methods are invoked with the GIC device lock held and must not
/// reenter the GIC. Line drives are level-triggered: the GIC only calls on
/// transitions.
pub trait PeLink: Send + Sync {
    fn set_irq(&self, high: bool);
    fn set_fiq(&self, high: bool);
    fn set_nmi(&self, high: bool);

    /// Whether the CPU is currently executing at EL3.
    fn at_el3(&self) -> bool;

    /// The interrupt domain matching the CPU's current security state below
    /// EL3. This is the logical domain used to bank `ICC_*` registers.
    fn security_domain(&self) -> Domain;

    /// Whether NMI delivery is enabled at the CPU's current exception level
    /// (`SCTLR_ELx.NMI`). NMI mode is a property of the CPU, not the GIC.
    fn nmi_delivery_enabled(&self) -> bool;
}

/// Mask of the implemented bits in each priority byte of
/// `ICC_PPI_PRIORITYR<n>`.
const PRIO_BYTES_MASK: u64 = 0x1f1f_1f1f_1f1f_1f1f;

/// Reset handling modes: every architected PPI is level-handled except the
/// software PPI.
const PPI_HM_RESET: [u64; 2] = [!(1 << ppi::SW_PPI), !0];

#[derive(Debug)]
pub(crate) struct CpuIf {
    pub iaffid: u16,
    pub link: Arc<dyn PeLink>,
    pub icc_cr0: [u64; NUM_DOMAINS],
    pub icc_pcr: [u8; NUM_DOMAINS],
    pub icc_apr: [u32; NUM_DOMAINS],
    pub icc_icsr: u64,
    pub ppi_enable: [u64; 2],
    pub ppi_pend: [u64; 2],
    pub ppi_active: [u64; 2],
    pub ppi_level: [u64; 2],
    pub ppi_hm: [u64; 2],
    pub ppi_priority: [u64; 16],
    /// Cached best enabled-pending-inactive PPI per domain.
    pub ppi_hppi: [PendingIrq; NUM_DOMAINS],
    irq_line: bool,
    nmi_line: bool,
    fiq_line: bool,
}

impl std::fmt::Debug for dyn PeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("PeLink")
    }
}

impl CpuIf {
    pub fn new(iaffid: u16, link: Arc<dyn PeLink>) -> Self {
        let mut cif = Self {
            iaffid,
            link,
            icc_cr0: [0; NUM_DOMAINS],
            icc_pcr: [0; NUM_DOMAINS],
            icc_apr: [0; NUM_DOMAINS],
            icc_icsr: 0,
            ppi_enable: [0; 2],
            ppi_pend: [0; 2],
            ppi_active: [0; 2],
            ppi_level: [0; 2],
            ppi_hm: PPI_HM_RESET,
            ppi_priority: [0; 16],
            ppi_hppi: [PendingIrq::IDLE; NUM_DOMAINS],
            irq_line: false,
            nmi_line: false,
            fiq_line: false,
        };
        cif.reset();
        cif
    }

    /// Resets the architectural state. Wake line bookkeeping survives so the
    /// following recompute deasserts anything left high.
    pub fn reset(&mut self) {
        // Out of reset the interface is enabled and the priority mask is
        // fully open.
        self.icc_cr0 = [IccCr0::new()
            .with_en(true)
            .with_link(true)
            .with_link_idle(true)
            .into(); NUM_DOMAINS];
        self.icc_pcr = [0x1f; NUM_DOMAINS];
        self.icc_apr = [0; NUM_DOMAINS];
        self.icc_icsr = 0;
        self.ppi_enable = [0; 2];
        self.ppi_pend = [0; 2];
        self.ppi_active = [0; 2];
        self.ppi_level = [0; 2];
        self.ppi_hm = PPI_HM_RESET;
        self.ppi_priority = [0; 16];
        self.ppi_hppi = [PendingIrq::IDLE; NUM_DOMAINS];
    }

    /// EL3 if executing at EL3, otherwise the domain of the current
    /// security state. This is the domain acknowledge and the stream
    /// commands act in.
    pub fn physical_domain(&self) -> Domain {
        if self.link.at_el3() {
            Domain::El3
        } else {
            self.link.security_domain()
        }
    }

    /// The domain whose banked `ICC_*` register instances are visible.
    pub fn logical_domain(&self) -> Domain {
        self.link.security_domain()
    }

    /// The running priority: the lowest set bit of the active-priorities
    /// bitmap, or idle.
    pub fn running_prio(&self, domain: Domain) -> u8 {
        let apr = self.icc_apr[domain.index()];
        if apr == 0 {
            PRIO_IDLE
        } else {
            apr.trailing_zeros() as u8
        }
    }

    fn ppi_priority_of(&self, ppi: u32) -> u8 {
        (self.ppi_priority[ppi as usize / 8] >> ((ppi % 8) * 8)) as u8
    }

    /// Recomputes the per-domain best pending PPI.
    ///
    /// Until EL3 support is added all PPIs belong to the NonSecure domain.
    pub fn recompute_ppi_hppi(&mut self) {
        let mut best = PendingIrq::IDLE;
        for bank in 0..2 {
            let mut candidates =
                self.ppi_enable[bank] & self.ppi_pend[bank] & !self.ppi_active[bank];
            while candidates != 0 {
                let bit = candidates.trailing_zeros();
                candidates &= candidates - 1;
                let ppi = bank as u32 * 64 + bit;
                let prio = self.ppi_priority_of(ppi);
                if prio < best.prio {
                    best = PendingIrq {
                        intid: Intid::pack(IntType::Ppi, ppi),
                        prio,
                    };
                }
            }
        }
        self.ppi_hppi[Domain::NonSecure.index()] = best;
    }
}

/// Splits a PPI number into its bank index and bit mask.
fn ppi_bit(ppi_id: u32) -> (usize, u64) {
    ((ppi_id / 64) as usize, 1 << (ppi_id % 64))
}

/// Decodes the INTID common to every `GIC_CD*` payload, rejecting the cases
/// the core does not implement.
fn decode_cd(command: &str, intid: u32, virt: bool) -> Option<(IntType, u32)> {
    if virt {
        tracing::warn!(command, "virtual interrupts not supported");
        return None;
    }
    let intid = Intid::from(intid);
    let Some(ty) = intid.int_type() else {
        tracing::warn!(command, ty = intid.ty(), "reserved interrupt type");
        return None;
    };
    Some((ty, intid.id()))
}

impl GicState {
    pub(crate) fn cpu_by_iaffid(&self, iaffid: u16) -> Option<usize> {
        self.cpus.iter().position(|cif| cif.iaffid == iaffid)
    }

    /// Recomputes the wake lines of the CPU targeted by `iaffid`, if it is
    /// one of ours.
    pub(crate) fn resignal_iaffid(&mut self, iaffid: u16) {
        if let Some(cpu) = self.cpu_by_iaffid(iaffid) {
            self.update_wake(cpu);
        }
    }

    pub(crate) fn update_all_wake(&mut self) {
        for cpu in 0..self.cpus.len() {
            self.update_wake(cpu);
        }
    }

    /// The highest-priority pending interrupt for `(cpu, domain)`: the best
    /// of the CPU's PPIs and the IRS's SPIs/LPIs, gated by the interface
    /// enable, the running priority and the priority mask. Ties between a
    /// PPI and an IRS interrupt go to the PPI.
    pub(crate) fn gic_hppi(&self, cpu: usize, domain: Domain) -> PendingIrq {
        let cif = &self.cpus[cpu];
        if !IccCr0::from(cif.icc_cr0[domain.index()]).en() {
            return PendingIrq::IDLE;
        }
        let irs_best = self.irs_hppi(domain, cif.iaffid);
        let ppi_best = cif.ppi_hppi[domain.index()];
        let best = if ppi_best.prio <= irs_best.prio {
            ppi_best
        } else {
            irs_best
        };
        if best.is_idle() {
            return PendingIrq::IDLE;
        }
        if best.prio >= cif.running_prio(domain) || best.prio > cif.icc_pcr[domain.index()] {
            return PendingIrq::IDLE;
        }
        best
    }

    /// Rederives the wake lines from the HPPI of the CPU's current physical
    /// domain. Priority 0 is superpriority and signals NMI instead of IRQ;
    /// FIQ is only used for preemptive cross-domain interrupts, which are
    /// not supported, so it stays deasserted.
    pub(crate) fn update_wake(&mut self, cpu: usize) {
        let domain = self.cpus[cpu].physical_domain();
        let best = self.gic_hppi(cpu, domain);
        let superpriority = !best.is_idle() && best.prio == 0;
        let irq = !best.is_idle() && !superpriority;

        let cif = &mut self.cpus[cpu];
        if cif.nmi_line != superpriority {
            cif.nmi_line = superpriority;
            cif.link.set_nmi(superpriority);
        }
        if cif.irq_line != irq {
            cif.irq_line = irq;
            cif.link.set_irq(irq);
        }
        if cif.fiq_line {
            cif.fiq_line = false;
            cif.link.set_fiq(false);
        }
    }

    /// A PPI wire changed level. Level-handled PPIs track the wire in their
    /// pending state; edge-handled PPIs latch pending on the rising edge.
    pub(crate) fn cpu_set_ppi(&mut self, cpu: usize, ppi_id: u32, high: bool) {
        if ppi_id >= NUM_PPIS {
            tracing::warn!(ppi = ppi_id, "PPI out of range");
            return;
        }
        let (bank, bit) = ppi_bit(ppi_id);
        let cif = &mut self.cpus[cpu];
        let was = cif.ppi_level[bank] & bit != 0;
        if was == high {
            return;
        }
        tracing::trace!(cpu, ppi = ppi_id, level = high, "ppi wire");
        if high {
            cif.ppi_level[bank] |= bit;
        } else {
            cif.ppi_level[bank] &= !bit;
        }
        if cif.ppi_hm[bank] & bit != 0 {
            // Level-handled: pending follows the wire.
            if high {
                cif.ppi_pend[bank] |= bit;
            } else {
                cif.ppi_pend[bank] &= !bit;
            }
        } else if high {
            cif.ppi_pend[bank] |= bit;
        }
        cif.recompute_ppi_hppi();
        self.update_wake(cpu);
    }

    pub(crate) fn cpu_write_cdpri(&mut self, cpu: usize, value: u64) {
        let v = Cdpri::from(value);
        let Some((ty, id)) = decode_cd("CDPRI", v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        match ty {
            IntType::Ppi => {
                if id >= NUM_PPIS {
                    tracing::warn!(ppi = id, "CDPRI PPI out of range");
                    return;
                }
                let cif = &mut self.cpus[cpu];
                let word = &mut cif.ppi_priority[id as usize / 8];
                let shift = (id % 8) * 8;
                *word = (*word & !(0xff << shift)) | u64::from(v.priority()) << shift;
                cif.recompute_ppi_hppi();
                self.update_wake(cpu);
            }
            _ => self.stream_set_priority(id, v.priority(), domain, ty, false),
        }
    }

    pub(crate) fn cpu_write_cden(&mut self, cpu: usize, value: u64, enabled: bool) {
        let v = CdIntid::from(value);
        let command = if enabled { "CDEN" } else { "CDDIS" };
        let Some((ty, id)) = decode_cd(command, v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        match ty {
            IntType::Ppi => {
                if id >= NUM_PPIS {
                    tracing::warn!(ppi = id, command, "PPI out of range");
                    return;
                }
                let (bank, bit) = ppi_bit(id);
                let cif = &mut self.cpus[cpu];
                if enabled {
                    cif.ppi_enable[bank] |= bit;
                } else {
                    cif.ppi_enable[bank] &= !bit;
                }
                cif.recompute_ppi_hppi();
                self.update_wake(cpu);
            }
            _ => self.stream_set_enabled(id, enabled, domain, ty, false),
        }
    }

    pub(crate) fn cpu_write_cdpend(&mut self, cpu: usize, value: u64) {
        let v = Cdpend::from(value);
        let Some((ty, id)) = decode_cd("CDPEND", v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        match ty {
            IntType::Ppi => {
                if id >= NUM_PPIS {
                    tracing::warn!(ppi = id, "CDPEND PPI out of range");
                    return;
                }
                let (bank, bit) = ppi_bit(id);
                let cif = &mut self.cpus[cpu];
                // Level-handled PPI pending state tracks the wire and is
                // read-only to software.
                if cif.ppi_hm[bank] & bit != 0 {
                    return;
                }
                if v.pending() {
                    cif.ppi_pend[bank] |= bit;
                } else {
                    cif.ppi_pend[bank] &= !bit;
                }
                cif.recompute_ppi_hppi();
                self.update_wake(cpu);
            }
            _ => self.stream_set_pending(id, v.pending(), domain, ty, false),
        }
    }

    pub(crate) fn cpu_write_cdhm(&mut self, cpu: usize, value: u64) {
        let v = Cdhm::from(value);
        let Some((ty, id)) = decode_cd("CDHM", v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        match ty {
            IntType::Ppi => {
                tracing::warn!(ppi = id, "CDHM: PPI handling modes are fixed");
            }
            _ => self.stream_set_handling(id, HandlingMode::from_bit(v.hm()), domain, ty, false),
        }
    }

    pub(crate) fn cpu_write_cdaff(&mut self, cpu: usize, value: u64) {
        let v = Cdaff::from(value);
        let Some((ty, id)) = decode_cd("CDAFF", v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        match ty {
            IntType::Ppi => {
                tracing::warn!(ppi = id, "CDAFF: PPIs are not routable");
            }
            _ => self.stream_set_target(
                id,
                v.iaffid(),
                RoutingMode::from_bit(v.irm()),
                domain,
                ty,
                false,
            ),
        }
    }

    pub(crate) fn cpu_write_cdrcfg(&mut self, cpu: usize, value: u64) {
        let v = CdIntid::from(value);
        let Some((ty, id)) = decode_cd("CDRCFG", v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        let icsr = match ty {
            IntType::Ppi => {
                if id < NUM_PPIS {
                    let cif = &self.cpus[cpu];
                    let (bank, bit) = ppi_bit(id);
                    IccIcsr::new()
                        .with_pending(cif.ppi_pend[bank] & bit != 0)
                        .with_active(cif.ppi_active[bank] & bit != 0)
                        .with_hm(cif.ppi_hm[bank] & bit != 0)
                        .with_enabled(cif.ppi_enable[bank] & bit != 0)
                        .with_priority(cif.ppi_priority_of(id))
                        .with_iaffid(cif.iaffid)
                        .into()
                } else {
                    tracing::warn!(ppi = id, "CDRCFG PPI out of range");
                    IccIcsr::new().with_f(true).into()
                }
            }
            _ => self.stream_request_config(id, domain, ty, false),
        };
        self.cpus[cpu].icc_icsr = icsr;
    }

    /// `GIC_CDEOI`, the priority-drop half of interrupt completion: clears
    /// the lowest set bit of the active-priorities bitmap.
    pub(crate) fn cpu_write_cdeoi(&mut self, cpu: usize) {
        let domain = self.cpus[cpu].physical_domain();
        let cif = &mut self.cpus[cpu];
        let apr = &mut cif.icc_apr[domain.index()];
        if *apr != 0 {
            *apr &= *apr - 1;
        }
        self.update_wake(cpu);
    }

    /// `GIC_CDDI`, the deactivate half of interrupt completion.
    pub(crate) fn cpu_write_cddi(&mut self, cpu: usize, value: u64) {
        let v = CdIntid::from(value);
        let Some((ty, id)) = decode_cd("CDDI", v.intid(), v.virt()) else {
            return;
        };
        let domain = self.cpus[cpu].physical_domain();
        match ty {
            IntType::Ppi => {
                if id >= NUM_PPIS {
                    tracing::warn!(ppi = id, "CDDI PPI out of range");
                    return;
                }
                let (bank, bit) = ppi_bit(id);
                let cif = &mut self.cpus[cpu];
                cif.ppi_active[bank] &= !bit;
                cif.recompute_ppi_hppi();
                self.update_wake(cpu);
            }
            _ => self.stream_deactivate(id, domain, ty, false),
        }
    }

    /// `GICR_CDIA`/`GICR_CDNMIA`: acknowledge the highest-priority pending
    /// interrupt of the current physical domain.
    ///
    /// The NMI-ness of the candidate (superpriority and NMI delivery
    /// enabled at the CPU) must match the register being read, otherwise
    /// nothing is acknowledged and the read returns 0.
    pub(crate) fn cpu_acknowledge(&mut self, cpu: usize, want_nmi: bool) -> u64 {
        let domain = self.cpus[cpu].physical_domain();
        let best = self.gic_hppi(cpu, domain);
        if best.is_idle() {
            return 0;
        }
        let is_nmi = best.prio == 0 && self.cpus[cpu].link.nmi_delivery_enabled();
        if is_nmi != want_nmi {
            return 0;
        }
        let intid = Intid::from(best.intid);
        tracing::trace!(
            cpu,
            domain = domain.name(),
            intid = best.intid,
            prio = best.prio,
            "acknowledge"
        );
        self.cpus[cpu].icc_apr[domain.index()] |= 1 << best.prio;
        match intid.int_type() {
            Some(IntType::Ppi) => {
                let (bank, bit) = ppi_bit(intid.id());
                let cif = &mut self.cpus[cpu];
                cif.ppi_active[bank] |= bit;
                if cif.ppi_hm[bank] & bit == 0 {
                    cif.ppi_pend[bank] &= !bit;
                }
                cif.recompute_ppi_hppi();
            }
            Some(ty) => self.stream_activate(intid.id(), domain, ty, false),
            // irs_hppi and the PPI scan only produce well-formed INTIDs.
            None => unreachable!(),
        }
        self.update_wake(cpu);
        u64::from(best.intid) | HPPIV
    }
}

/// A handle to one CPU's interface, used by the CPU model to implement the
/// `ICC_*`/`GIC_*`/`GICR_*` system registers and to feed PPI wires.
///
/// Handles are cheap to clone and serialize on the shared device lock.
#[derive(Clone)]
pub struct CpuInterface {
    pub(crate) state: Arc<Mutex<GicState>>,
    pub(crate) index: usize,
}

impl CpuInterface {
    /// The CPU's interrupt affinity ID.
    pub fn iaffid(&self) -> u16 {
        self.state.lock().cpus[self.index].iaffid
    }

    /// Sets the level of PPI wire `ppi_id`.
    pub fn set_ppi(&self, ppi_id: u32, high: bool) {
        self.state.lock().cpu_set_ppi(self.index, ppi_id, high);
    }

    pub fn write_cdpri(&self, value: u64) {
        self.state.lock().cpu_write_cdpri(self.index, value);
    }

    pub fn write_cden(&self, value: u64) {
        self.state.lock().cpu_write_cden(self.index, value, true);
    }

    pub fn write_cddis(&self, value: u64) {
        self.state.lock().cpu_write_cden(self.index, value, false);
    }

    pub fn write_cdpend(&self, value: u64) {
        self.state.lock().cpu_write_cdpend(self.index, value);
    }

    pub fn write_cdhm(&self, value: u64) {
        self.state.lock().cpu_write_cdhm(self.index, value);
    }

    pub fn write_cdaff(&self, value: u64) {
        self.state.lock().cpu_write_cdaff(self.index, value);
    }

    pub fn write_cdrcfg(&self, value: u64) {
        self.state.lock().cpu_write_cdrcfg(self.index, value);
    }

    pub fn write_cdeoi(&self) {
        self.state.lock().cpu_write_cdeoi(self.index);
    }

    pub fn write_cddi(&self, value: u64) {
        self.state.lock().cpu_write_cddi(self.index, value);
    }

    /// Acknowledges the highest-priority pending non-NMI interrupt,
    /// returning its INTID with `HPPIV` set, or 0.
    pub fn read_cdia(&self) -> u64 {
        self.state.lock().cpu_acknowledge(self.index, false)
    }

    /// Acknowledges the highest-priority pending NMI, returning its INTID
    /// with `HPPIV` set, or 0.
    pub fn read_cdnmia(&self) -> u64 {
        self.state.lock().cpu_acknowledge(self.index, true)
    }

    /// `ICC_ICSR_EL1`: the configuration captured by the last `GIC_CDRCFG`.
    pub fn read_icsr(&self) -> u64 {
        self.state.lock().cpus[self.index].icc_icsr
    }

    /// `ICC_IDR0_EL1`.
    pub fn read_idr0(&self) -> u64 {
        IccIdr0::new()
            .with_pri_bits(PRI_BITS as u8 - 1)
            .with_iaffid_bits(IAFFID_BITS as u8 - 1)
            .into()
    }

    /// `ICC_CR0_EL1` for the current logical domain.
    pub fn read_cr0(&self) -> u64 {
        let state = self.state.lock();
        let cif = &state.cpus[self.index];
        cif.icc_cr0[cif.logical_domain().index()]
    }

    /// Writes `ICC_CR0_EL1` for the current logical domain. Only `EN` is
    /// writable; `LINK`/`LINK_IDLE` are forced set (the synchronous stream
    /// link is always up and idle), and without EL3 support `IPPT`/`PID`
    /// are ignored.
    pub fn write_cr0(&self, value: u64) {
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        let domain = cif.logical_domain();
        cif.icc_cr0[domain.index()] = IccCr0::new()
            .with_en(IccCr0::from(value).en())
            .with_link(true)
            .with_link_idle(true)
            .into();
        state.update_wake(self.index);
    }

    /// `ICC_PCR_EL1` for the current logical domain.
    pub fn read_pcr(&self) -> u64 {
        let state = self.state.lock();
        let cif = &state.cpus[self.index];
        IccPcr::new()
            .with_priority(cif.icc_pcr[cif.logical_domain().index()])
            .into()
    }

    pub fn write_pcr(&self, value: u64) {
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        let domain = cif.logical_domain();
        cif.icc_pcr[domain.index()] = IccPcr::from(value).priority();
        state.update_wake(self.index);
    }

    /// `ICC_APR_EL1` for the current logical domain.
    pub fn read_apr(&self) -> u64 {
        let state = self.state.lock();
        let cif = &state.cpus[self.index];
        cif.icc_apr[cif.logical_domain().index()].into()
    }

    pub fn write_apr(&self, value: u64) {
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        let domain = cif.logical_domain();
        cif.icc_apr[domain.index()] = value as u32;
        state.update_wake(self.index);
    }

    /// `ICC_HAPR_EL1`: the running priority.
    pub fn read_hapr(&self) -> u64 {
        let state = self.state.lock();
        let cif = &state.cpus[self.index];
        cif.running_prio(cif.logical_domain()).into()
    }

    pub fn read_ppi_enabler(&self, bank: usize) -> u64 {
        assert!(bank < 2);
        self.state.lock().cpus[self.index].ppi_enable[bank]
    }

    pub fn write_ppi_enabler(&self, bank: usize, value: u64) {
        assert!(bank < 2);
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        cif.ppi_enable[bank] = value;
        cif.recompute_ppi_hppi();
        state.update_wake(self.index);
    }

    /// The pending bank, as read through `ICC_PPI_{C,S}PENDR<n>_EL1`.
    pub fn read_ppi_pendr(&self, bank: usize) -> u64 {
        assert!(bank < 2);
        self.state.lock().cpus[self.index].ppi_pend[bank]
    }

    /// `ICC_PPI_SPENDR<n>_EL1`: sets pending bits. Bits of level-handled
    /// PPIs track the wire and are read-only.
    pub fn write_ppi_spendr(&self, bank: usize, value: u64) {
        assert!(bank < 2);
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        cif.ppi_pend[bank] |= value & !cif.ppi_hm[bank];
        cif.recompute_ppi_hppi();
        state.update_wake(self.index);
    }

    /// `ICC_PPI_CPENDR<n>_EL1`: clears pending bits, with the same
    /// level-handled read-only rule as the set form.
    pub fn write_ppi_cpendr(&self, bank: usize, value: u64) {
        assert!(bank < 2);
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        cif.ppi_pend[bank] &= !(value & !cif.ppi_hm[bank]);
        cif.recompute_ppi_hppi();
        state.update_wake(self.index);
    }

    pub fn read_ppi_activer(&self, bank: usize) -> u64 {
        assert!(bank < 2);
        self.state.lock().cpus[self.index].ppi_active[bank]
    }

    pub fn write_ppi_sactiver(&self, bank: usize, value: u64) {
        assert!(bank < 2);
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        cif.ppi_active[bank] |= value;
        cif.recompute_ppi_hppi();
        state.update_wake(self.index);
    }

    pub fn write_ppi_cactiver(&self, bank: usize, value: u64) {
        assert!(bank < 2);
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        cif.ppi_active[bank] &= !value;
        cif.recompute_ppi_hppi();
        state.update_wake(self.index);
    }

    /// `ICC_PPI_HMR<n>_EL1`: the (read-only) handling mode bank.
    pub fn read_ppi_hmr(&self, bank: usize) -> u64 {
        assert!(bank < 2);
        self.state.lock().cpus[self.index].ppi_hm[bank]
    }

    pub fn read_ppi_priorityr(&self, n: usize) -> u64 {
        assert!(n < 16);
        self.state.lock().cpus[self.index].ppi_priority[n]
    }

    pub fn write_ppi_priorityr(&self, n: usize, value: u64) {
        assert!(n < 16);
        let mut state = self.state.lock();
        let cif = &mut state.cpus[self.index];
        cif.ppi_priority[n] = value & PRIO_BYTES_MASK;
        cif.recompute_ppi_hppi();
        state.update_wake(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppi_hm_reset_values() {
        assert_eq!(PPI_HM_RESET[0] & (1 << ppi::SW_PPI), 0);
        assert_eq!(PPI_HM_RESET[0] | (1 << ppi::SW_PPI), !0);
        assert_eq!(PPI_HM_RESET[1], !0);
    }

    #[test]
    fn ppi_bit_split() {
        assert_eq!(ppi_bit(3), (0, 8));
        assert_eq!(ppi_bit(64), (1, 1));
        assert_eq!(ppi_bit(127), (1, 1 << 63));
    }
}
