// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ARM GICv5 emulation: the Interrupt Routing Service and the per-CPU
//! interface.
//!
//! The IRS owns the global interrupt state: SPIs in a flat table, LPIs in
//! guest-resident Interrupt State Tables (walked through a [`GuestMemory`]
//! implementation, with a cache of the pending entries), all partitioned
//! into up to four interrupt domains with one MMIO config frame each. The
//! CPU interface is the per-CPU register file (`ICC_*`, `GIC_CD*`,
//! `GICR_CD*`) reached through [`CpuInterface`] handles; it exchanges
//! commands with the IRS over the synchronous [`StreamProtocol`] and drives
//! each CPU's IRQ/FIQ/NMI wake lines through its [`PeLink`].
//!
//! The whole complex lives under a single lock, mirroring the emulator's
//! big-lock execution model: every register access and stream command runs
//! to completion, and a command's return implies full acknowledgement.

#![forbid(unsafe_code)]

mod cpuif;
mod irs;
mod ist;
mod memory;
mod spi;
mod stream;

pub use cpuif::CpuInterface;
pub use cpuif::PeLink;
pub use memory::GuestMemory;
pub use memory::MemTxAttrs;
pub use memory::MemTxError;
pub use stream::StreamProtocol;

use cpuif::CpuIf;
use gicv5defs::Domain;
use gicv5defs::DomainSet;
use gicv5defs::PRIO_IDLE;
use irs::IrsState;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// A candidate highest-priority pending interrupt.
///
/// The INTID carries the interrupt type in its top three bits. Superpriority
/// (NMI) needs no separate flag: it is exactly `prio == 0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PendingIrq {
    pub intid: u32,
    pub prio: u8,
}

impl PendingIrq {
    pub const IDLE: Self = Self {
        intid: 0,
        prio: PRIO_IDLE,
    };

    pub fn is_idle(&self) -> bool {
        self.prio == PRIO_IDLE
    }
}

/// Board-supplied IRS configuration.
#[derive(Debug, Clone)]
pub struct GicV5Params {
    /// The IRS identifier reported in `IRS_IDR0.IRSID`.
    pub irsid: u16,
    /// First SPI INTID managed by this IRS.
    pub spi_base: u32,
    /// Number of SPIs managed by this IRS.
    pub spi_irs_range: u32,
    /// Number of SPIs in the system.
    pub spi_range: u32,
    /// The interrupt domains this IRS implements. Accesses to an
    /// unimplemented domain's config frame decode-fault (the board gets no
    /// frame to map).
    pub domains: DomainSet,
}

/// One CPU connected to the IRS.
pub struct PeParams {
    /// The CPU's interrupt affinity ID. Unique per IRS.
    pub iaffid: u16,
    pub link: Arc<dyn PeLink>,
}

/// A configuration error caught at construction. The device does not come
/// up.
#[derive(Debug, Error)]
pub enum GicConfigError {
    #[error("spi_base {0:#x} exceeds the 24-bit INTID space")]
    SpiBaseTooLarge(u32),
    #[error("spi_irs_range {0:#x} exceeds the 24-bit INTID space")]
    SpiIrsRangeTooLarge(u32),
    #[error("spi_range {0:#x} exceeds the 24-bit INTID space")]
    SpiRangeTooLarge(u32),
    #[error("managed SPI window {base:#x}..{base:#x}+{len:#x} exceeds spi_range {range:#x}")]
    SpiWindowTooLarge { base: u32, len: u32, range: u32 },
    #[error("no interrupt domains implemented")]
    NoDomains,
    #[error("no CPUs connected")]
    NoCpus,
    #[error("{0} CPUs exceeds the 16-bit PE count")]
    TooManyCpus(usize),
    #[error("duplicate IAFFID {0:#x}")]
    DuplicateIaffid(u16),
}

pub(crate) struct GicState {
    pub(crate) props: GicV5Params,
    pub(crate) mem: Arc<dyn GuestMemory>,
    pub(crate) irs: IrsState,
    pub(crate) cpus: Vec<CpuIf>,
}

impl GicState {
    /// Power-on reset: registers to their reset values, the LPI cache
    /// dropped without writeback, SPI records cleared, PPI handling modes
    /// reloaded. Wake lines get recomputed (and thus deasserted).
    fn reset(&mut self) {
        self.irs = IrsState::new(&self.props, self.cpus.len());
        for cif in &mut self.cpus {
            cif.reset();
        }
        self.update_all_wake();
    }
}

/// The GICv5 device: one IRS plus the CPU interfaces of every connected
/// CPU.
pub struct GicV5 {
    pub(crate) state: Arc<Mutex<GicState>>,
}

impl GicV5 {
    /// Validates the board configuration and builds the device in its
    /// power-on state.
    pub fn new(
        params: GicV5Params,
        mem: Arc<dyn GuestMemory>,
        pes: Vec<PeParams>,
    ) -> Result<Self, GicConfigError> {
        if params.spi_base >= 1 << 24 {
            return Err(GicConfigError::SpiBaseTooLarge(params.spi_base));
        }
        if params.spi_irs_range > 1 << 24 {
            return Err(GicConfigError::SpiIrsRangeTooLarge(params.spi_irs_range));
        }
        if params.spi_range > 1 << 24 {
            return Err(GicConfigError::SpiRangeTooLarge(params.spi_range));
        }
        if params.spi_base + params.spi_irs_range > params.spi_range {
            return Err(GicConfigError::SpiWindowTooLarge {
                base: params.spi_base,
                len: params.spi_irs_range,
                range: params.spi_range,
            });
        }
        if params.domains.is_empty() {
            return Err(GicConfigError::NoDomains);
        }
        if pes.is_empty() {
            return Err(GicConfigError::NoCpus);
        }
        if pes.len() > u16::MAX as usize {
            return Err(GicConfigError::TooManyCpus(pes.len()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for pe in &pes {
            if !seen.insert(pe.iaffid) {
                return Err(GicConfigError::DuplicateIaffid(pe.iaffid));
            }
        }

        let irs = IrsState::new(&params, pes.len());
        let cpus = pes
            .into_iter()
            .map(|pe| CpuIf::new(pe.iaffid, pe.link))
            .collect();
        Ok(Self {
            state: Arc::new(Mutex::new(GicState {
                props: params,
                mem,
                irs,
                cpus,
            })),
        })
    }

    /// Power-on reset.
    pub fn reset(&self) {
        self.state.lock().reset();
    }

    /// The MMIO config frame for `domain`, or `None` if this IRS does not
    /// implement the domain (the board then maps nothing there and accesses
    /// decode-fault).
    pub fn config_frame(&self, domain: Domain) -> Option<ConfigFrame> {
        self.state
            .lock()
            .props
            .domains
            .contains(domain)
            .then(|| ConfigFrame {
                state: self.state.clone(),
                domain,
            })
    }

    /// The interface handle for the `index`th connected CPU.
    pub fn cpu_interface(&self, index: usize) -> Option<CpuInterface> {
        (index < self.state.lock().cpus.len()).then(|| CpuInterface {
            state: self.state.clone(),
            index,
        })
    }

    /// Sets the level of an SPI input wire. `line` is relative to
    /// `spi_base`.
    pub fn set_spi(&self, line: u32, high: bool) {
        self.state.lock().set_spi(line, high);
    }
}

/// One domain's 64 KiB MMIO config frame.
///
/// Accesses are 4 or 8 bytes, little-endian. Reserved registers and
/// malformed accesses are RAZ/WI with a guest error log; the bus transaction
/// always succeeds.
pub struct ConfigFrame {
    state: Arc<Mutex<GicState>>,
    domain: Domain,
}

impl ConfigFrame {
    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn read(&self, offset: u64, data: &mut [u8]) {
        self.state.lock().frame_read(self.domain, offset, data);
    }

    pub fn write(&self, offset: u64, data: &[u8]) {
        self.state.lock().frame_write(self.domain, offset, data);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::cpuif::PeLink;
    use crate::memory::GuestMemory;
    use crate::memory::MemTxAttrs;
    use crate::memory::MemTxError;
    use gicv5defs::Domain;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Guest memory backed by one RAM window.
    pub(crate) struct TestMemory {
        base: u64,
        data: Mutex<Vec<u8>>,
    }

    impl TestMemory {
        pub fn new(base: u64, len: usize) -> Self {
            Self {
                base,
                data: Mutex::new(vec![0; len]),
            }
        }

        fn offset(&self, gpa: u64, len: usize) -> Result<usize, MemTxError> {
            let offset = gpa.checked_sub(self.base).ok_or(MemTxError)? as usize;
            if offset + len > self.data.lock().len() {
                return Err(MemTxError);
            }
            Ok(offset)
        }
    }

    impl GuestMemory for TestMemory {
        fn read_u32_le(&self, gpa: u64, _attrs: MemTxAttrs) -> Result<u32, MemTxError> {
            let offset = self.offset(gpa, 4)?;
            let data = self.data.lock();
            Ok(u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()))
        }

        fn write_u32_le(&self, gpa: u64, value: u32, _attrs: MemTxAttrs) -> Result<(), MemTxError> {
            let offset = self.offset(gpa, 4)?;
            self.data.lock()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            Ok(())
        }

        fn read_u64_le(&self, gpa: u64, _attrs: MemTxAttrs) -> Result<u64, MemTxError> {
            let offset = self.offset(gpa, 8)?;
            let data = self.data.lock();
            Ok(u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap()))
        }

        fn write_u64_le(&self, gpa: u64, value: u64, _attrs: MemTxAttrs) -> Result<(), MemTxError> {
            let offset = self.offset(gpa, 8)?;
            self.data.lock()[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct TestPeState {
        at_el3: bool,
        security: Domain,
        nmi_enabled: bool,
        irq: bool,
        nmi: bool,
        fiq: bool,
    }

    /// A recording CPU collaborator: captures wake line levels and lets
    /// tests steer the architectural state queries.
    #[derive(Debug)]
    pub(crate) struct TestPe {
        state: Mutex<TestPeState>,
    }

    impl TestPe {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(TestPeState {
                    at_el3: false,
                    security: Domain::NonSecure,
                    nmi_enabled: true,
                    irq: false,
                    nmi: false,
                    fiq: false,
                }),
            })
        }

        pub fn irq_high(&self) -> bool {
            self.state.lock().irq
        }

        pub fn nmi_high(&self) -> bool {
            self.state.lock().nmi
        }

        pub fn fiq_high(&self) -> bool {
            self.state.lock().fiq
        }

        pub fn set_nmi_enabled(&self, enabled: bool) {
            self.state.lock().nmi_enabled = enabled;
        }

        pub fn set_security(&self, domain: Domain) {
            self.state.lock().security = domain;
        }

        pub fn set_at_el3(&self, at_el3: bool) {
            self.state.lock().at_el3 = at_el3;
        }
    }

    impl PeLink for TestPe {
        fn set_irq(&self, high: bool) {
            self.state.lock().irq = high;
        }

        fn set_fiq(&self, high: bool) {
            self.state.lock().fiq = high;
        }

        fn set_nmi(&self, high: bool) {
            self.state.lock().nmi = high;
        }

        fn at_el3(&self) -> bool {
            self.state.lock().at_el3
        }

        fn security_domain(&self) -> Domain {
            self.state.lock().security
        }

        fn nmi_delivery_enabled(&self) -> bool {
            self.state.lock().nmi_enabled
        }
    }
}
