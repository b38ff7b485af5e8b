// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! IRS register state and the per-domain config frame decode.
//!
//! Each implemented interrupt domain exposes one 64 KiB MMIO frame with the
//! `IRS_*` register map. The same physical registers can read differently
//! through different frames (`IRS_IDR0.INT_DOM`), and a few are only
//! accessible through the EL3 frame. Reserved registers are RAZ/WI with a
//! guest error log; the bus transaction itself always succeeds.

use crate::ist::IstConfig;
use crate::ist::LpiCache;
use crate::spi::SpiState;
use crate::GicState;
use crate::GicV5Params;
use crate::PendingIrq;
use gicv5defs::irs::IrsCr0;
use gicv5defs::irs::IrsIdr0;
use gicv5defs::irs::IrsIdr1;
use gicv5defs::irs::IrsIdr2;
use gicv5defs::irs::IrsIdr5;
use gicv5defs::irs::IrsIdr6;
use gicv5defs::irs::IrsIdr7;
use gicv5defs::irs::IrsIidr;
use gicv5defs::irs::IrsIstBaser;
use gicv5defs::irs::IrsIstCfgr;
use gicv5defs::irs::IrsIstStatusr;
use gicv5defs::irs::IrsMapL2Istr;
use gicv5defs::irs::IrsPeSelr;
use gicv5defs::irs::IrsPeStatusr;
use gicv5defs::irs::IrsRegister;
use gicv5defs::irs::IrsSpiCfgr;
use gicv5defs::irs::IrsSpiDomainr;
use gicv5defs::irs::IrsSpiResampler;
use gicv5defs::irs::IrsSpiSelr;
use gicv5defs::irs::IrsSpiStatusr;
use gicv5defs::irs::IrsSyncStatusr;
use gicv5defs::irs::IRS_DEVARCH;
use gicv5defs::irs::IRS_IDREGS;
use gicv5defs::iste::L1Iste;
use gicv5defs::Domain;
use gicv5defs::IntType;
use gicv5defs::Intid;
use gicv5defs::TriggerMode;
use gicv5defs::IAFFID_BITS;
use gicv5defs::ID_BITS;
use gicv5defs::MIN_LPI_ID_BITS;
use gicv5defs::NUM_DOMAINS;
use gicv5defs::PRI_BITS;

/// The state owned by the Interrupt Routing Service: the config-frame
/// registers (banked by domain where the architecture banks them), the
/// captured IST configurations, the pending-LPI cache, and the SPI table.
#[derive(Debug)]
pub(crate) struct IrsState {
    idr0: u32,
    idr1: u32,
    idr2: u32,
    idr5: u32,
    idr6: u32,
    idr7: u32,
    iidr: u32,
    aidr: u32,
    pub cr0: [u32; NUM_DOMAINS],
    pub cr1: [u32; NUM_DOMAINS],
    pub spi_selr: [u32; NUM_DOMAINS],
    pub pe_selr: [u32; NUM_DOMAINS],
    pub ist_baser: [u64; NUM_DOMAINS],
    pub ist_cfgr: [u32; NUM_DOMAINS],
    pub ist_cfg: [IstConfig; NUM_DOMAINS],
    pub lpi_cache: LpiCache,
    pub spis: Vec<SpiState>,
}

impl IrsState {
    pub fn new(params: &GicV5Params, num_cpus: usize) -> Self {
        // Most optional features (virtualization, 1-of-N, SETLPI, MPAM, MEC,
        // software error reporting) are unimplemented, so their IDR0 bits
        // stay zero. PA_RANGE reports 56 bits: the emulator handles physical
        // addresses of any size.
        let idr0 = IrsIdr0::new().with_pa_range(7).with_irsid(params.irsid);
        let idr1 = IrsIdr1::new()
            .with_pe_cnt(num_cpus as u16)
            .with_iaffid_bits(IAFFID_BITS as u8 - 1)
            .with_pri_bits(PRI_BITS as u8 - 1);
        // Physical LPIs with 1- and 2-level ISTs of every L2 size.
        let idr2 = IrsIdr2::new()
            .with_id_bits(ID_BITS as u8)
            .with_lpi(true)
            .with_min_lpi_id_bits(MIN_LPI_ID_BITS as u8)
            .with_ist_levels(true)
            .with_ist_l2sz(7);
        let idr5 = IrsIdr5::new().with_spi_range(params.spi_range);
        let idr6 = IrsIdr6::new().with_spi_irs_range(params.spi_irs_range);
        let idr7 = IrsIdr7::new().with_spi_base(params.spi_base);
        let iidr = IrsIidr::new().with_implementer(0x43b).with_productid(0x5);

        let spi_domain = params
            .domains
            .most_privileged()
            .unwrap_or(Domain::NonSecure);
        Self {
            idr0: idr0.into(),
            idr1: idr1.into(),
            idr2: idr2.into(),
            idr5: idr5.into(),
            idr6: idr6.into(),
            idr7: idr7.into(),
            iidr: iidr.into(),
            // A GICv5.0 IRS: every AIDR field is zero.
            aidr: 0,
            cr0: [0; NUM_DOMAINS],
            cr1: [0; NUM_DOMAINS],
            spi_selr: [0; NUM_DOMAINS],
            pe_selr: [0; NUM_DOMAINS],
            ist_baser: [0; NUM_DOMAINS],
            ist_cfgr: [0; NUM_DOMAINS],
            ist_cfg: Default::default(),
            lpi_cache: LpiCache::default(),
            spis: (0..params.spi_irs_range)
                .map(|_| SpiState::new(spi_domain))
                .collect(),
        }
    }
}

impl GicState {
    /// The SPI table index for INTID `id`, if this IRS manages it.
    pub(crate) fn spi_index(&self, id: u32) -> Option<usize> {
        id.checked_sub(self.props.spi_base)
            .filter(|&i| i < self.props.spi_irs_range)
            .map(|i| i as usize)
    }

    /// The SPI table index for `id` if the SPI is reachable from a stream
    /// command in `domain`: managed here and assigned to that domain.
    pub(crate) fn spi_in_domain(&self, domain: Domain, id: u32) -> Option<usize> {
        let index = self.spi_index(id)?;
        (self.irs.spis[index].domain == domain).then_some(index)
    }

    /// The SPI table index for `id` if the SPI is reachable through the
    /// `domain` config frame. The EL3 frame reaches every managed SPI (it is
    /// the frame that assigns domains).
    fn spi_in_frame(&self, domain: Domain, id: u32) -> Option<usize> {
        let index = self.spi_index(id)?;
        (domain == Domain::El3 || self.irs.spis[index].domain == domain).then_some(index)
    }

    /// An SPI wire changed level. `line` is relative to `spi_base`.
    pub(crate) fn set_spi(&mut self, line: u32, high: bool) {
        let spi_id = line + self.props.spi_base;
        let Some(index) = self.spi_index(spi_id) else {
            tracing::warn!(line, "SPI line out of range");
            return;
        };
        let spi = &mut self.irs.spis[index];
        if spi.level == high {
            return;
        }
        spi.level = high;
        tracing::trace!(spi_id, level = high, "spi wire");
        spi.sample();
        let iaffid = spi.iaffid;
        self.resignal_iaffid(iaffid);
    }

    /// The best pending interrupt the IRS has for `(domain, iaffid)`:
    /// enabled, pending, not active, targeted at that CPU. Scans the SPI
    /// table and the pending-LPI cache (which holds exactly the pending
    /// LPIs).
    pub(crate) fn irs_hppi(&self, domain: Domain, iaffid: u16) -> PendingIrq {
        let mut best = PendingIrq::IDLE;
        for (index, spi) in self.irs.spis.iter().enumerate() {
            if spi.domain == domain
                && spi.iaffid == iaffid
                && spi.enabled
                && spi.pending
                && !spi.active
                && spi.priority < best.prio
            {
                best = PendingIrq {
                    intid: Intid::pack(IntType::Spi, self.props.spi_base + index as u32),
                    prio: spi.priority,
                };
            }
        }
        for (id, word) in self.irs.lpi_cache.iter_domain(domain) {
            if word.iaffid() == iaffid
                && word.enable()
                && word.pending()
                && !word.active()
                && word.priority() < best.prio
            {
                best = PendingIrq {
                    intid: Intid::pack(IntType::Lpi, id),
                    prio: word.priority(),
                };
            }
        }
        best
    }

    fn ist_baser_write(&mut self, domain: Domain, value: u64) {
        let index = domain.index();
        let current = IrsIstBaser::from(self.irs.ist_baser[index]);
        let new = IrsIstBaser::from(value);
        if current.valid() {
            // While VALID is set, ADDR is read-only and only VALID can be
            // cleared. A 1->1 write changes nothing.
            if new.valid() {
                return;
            }
            let cfg = self.irs.ist_cfg[index];
            self.irs
                .lpi_cache
                .flush(self.mem.as_ref(), &cfg, domain);
            self.irs.ist_baser[index] = current.with_valid(false).into();
            self.irs.ist_cfg[index].valid = false;
            tracing::debug!(domain = domain.name(), "IST invalidated");
            // Cached pends are gone from the IRS's view.
            self.update_all_wake();
            return;
        }
        self.irs.ist_baser[index] = value;
        if new.valid() {
            let cfg = IstConfig::capture(
                new,
                IrsIstCfgr::from(self.irs.ist_cfgr[index]),
                domain,
                self.props.domains,
            );
            tracing::debug!(
                domain = domain.name(),
                base = cfg.base,
                id_bits = cfg.id_bits,
                istsz = cfg.istsz,
                two_level = cfg.two_level,
                "IST valid"
            );
            self.irs.ist_cfg[index] = cfg;
        }
    }

    /// `IRS_MAP_L2_ISTR`: marks the L1 entry covering `id` valid, by guest
    /// memory read-modify-write. The guest populates the L2 page itself.
    fn map_l2_iste(&mut self, domain: Domain, id: u32) {
        let cfg = self.irs.ist_cfg[domain.index()];
        if !cfg.valid || !cfg.two_level {
            tracing::warn!(
                domain = domain.name(),
                id,
                "MAP_L2_ISTR without a valid 2-level IST"
            );
            return;
        }
        if id >= 1 << cfg.id_bits {
            tracing::warn!(domain = domain.name(), id, "MAP_L2_ISTR ID out of range");
            return;
        }
        let l1_addr = crate::ist::l1_iste_addr(&cfg, id);
        let l1_iste = match self.mem.read_u64_le(l1_addr, cfg.attrs) {
            Ok(v) => L1Iste::from(v),
            Err(_) => {
                // Reportable with EC=0x01 if software error reporting is
                // implemented.
                tracing::warn!(id, addr = l1_addr, "L1 ISTE read failed");
                return;
            }
        };
        if self
            .mem
            .write_u64_le(l1_addr, l1_iste.with_valid(true).into(), cfg.attrs)
            .is_err()
        {
            tracing::warn!(id, addr = l1_addr, "L1 ISTE write failed");
        }
    }

    fn frame_read32(&mut self, domain: Domain, offset: u16) -> Option<u32> {
        let index = domain.index();
        let v = match IrsRegister(offset) {
            IrsRegister::IDR0 => {
                let mut v = IrsIdr0::from(self.irs.idr0).with_int_dom(domain.into_bits());
                // MEC is RES0 except through the Realm frame; VIRT is RES0
                // through the EL3 frame.
                if domain != Domain::Realm {
                    v.set_mec(false);
                }
                if domain == Domain::El3 {
                    v.set_virt(false);
                }
                v.into()
            }
            IrsRegister::IDR1 => self.irs.idr1,
            IrsRegister::IDR2 => self.irs.idr2,
            // No virtualization support, so these are zero everywhere (and
            // RES0 through the EL3 frame regardless).
            IrsRegister::IDR3 | IrsRegister::IDR4 => 0,
            IrsRegister::IDR5 => self.irs.idr5,
            IrsRegister::IDR6 => self.irs.idr6,
            IrsRegister::IDR7 => self.irs.idr7,
            IrsRegister::IIDR => self.irs.iidr,
            IrsRegister::AIDR => self.irs.aidr,
            IrsRegister::CR0 => IrsCr0::from(self.irs.cr0[index]).with_idle(true).into(),
            IrsRegister::CR1 => self.irs.cr1[index],
            // Writes take effect synchronously; the guest can never observe
            // a sync in progress.
            IrsRegister::SYNC_STATUSR => IrsSyncStatusr::new().with_idle(true).into(),
            IrsRegister::SPI_SELR => self.irs.spi_selr[index],
            IrsRegister::SPI_DOMAINR => {
                if domain != Domain::El3 {
                    return None;
                }
                let selected = IrsSpiSelr::from(self.irs.spi_selr[index]).id();
                match self.spi_index(selected) {
                    Some(spi) => IrsSpiDomainr::new()
                        .with_domain(self.irs.spis[spi].domain.into_bits())
                        .into(),
                    None => 0,
                }
            }
            IrsRegister::SPI_CFGR => {
                let selected = IrsSpiSelr::from(self.irs.spi_selr[index]).id();
                match self.spi_in_frame(domain, selected) {
                    Some(spi) => IrsSpiCfgr::new()
                        .with_tm(self.irs.spis[spi].tm.bit())
                        .into(),
                    None => 0,
                }
            }
            IrsRegister::SPI_STATUSR => {
                let selected = IrsSpiSelr::from(self.irs.spi_selr[index]).id();
                IrsSpiStatusr::new()
                    .with_idle(true)
                    .with_v(self.spi_in_frame(domain, selected).is_some())
                    .into()
            }
            IrsRegister::PE_SELR => self.irs.pe_selr[index],
            IrsRegister::PE_STATUSR => {
                let selected = IrsPeSelr::from(self.irs.pe_selr[index]).iaffid();
                let v = self.cpu_by_iaffid(selected).is_some();
                // Every emulated CPU is always online.
                IrsPeStatusr::new()
                    .with_idle(true)
                    .with_v(v)
                    .with_online(v)
                    .into()
            }
            IrsRegister::IST_BASER => self.irs.ist_baser[index] as u32,
            IrsRegister::IST_BASER_HI => (self.irs.ist_baser[index] >> 32) as u32,
            IrsRegister::IST_CFGR => self.irs.ist_cfgr[index],
            IrsRegister::IST_STATUSR => IrsIstStatusr::new().with_idle(true).into(),
            IrsRegister::DEVARCH => IRS_DEVARCH,
            reg if IrsRegister::IDREGS.contains(&reg.0) => {
                IRS_IDREGS[usize::from(reg.0 - IrsRegister::PIDR4.0) / 4]
            }
            _ => return None,
        };
        Some(v)
    }

    fn frame_write32(&mut self, domain: Domain, offset: u16, value: u32) -> bool {
        let index = domain.index();
        match IrsRegister(offset) {
            IrsRegister::CR0 => {
                self.irs.cr0[index] = IrsCr0::new().with_en(IrsCr0::from(value).en()).into();
            }
            IrsRegister::CR1 => {
                self.irs.cr1[index] = value;
            }
            // Everything is synchronous: a sync request completes by the
            // time the write does.
            IrsRegister::SYNCR => {}
            IrsRegister::SPI_SELR => {
                self.irs.spi_selr[index] = IrsSpiSelr::from(value).id();
            }
            IrsRegister::SPI_DOMAINR => {
                if domain != Domain::El3 {
                    return false;
                }
                let selected = IrsSpiSelr::from(self.irs.spi_selr[index]).id();
                match self.spi_index(selected) {
                    Some(spi) => {
                        let new_domain = Domain::from_bits(IrsSpiDomainr::from(value).domain());
                        let iaffid = self.irs.spis[spi].iaffid;
                        self.irs.spis[spi].domain = new_domain;
                        self.resignal_iaffid(iaffid);
                    }
                    None => {
                        tracing::warn!(spi_id = selected, "SPI_DOMAINR write to unmanaged SPI");
                    }
                }
            }
            IrsRegister::SPI_RESAMPLER => {
                let spi_id = IrsSpiResampler::from(value).spi_id();
                match self.spi_in_frame(domain, spi_id) {
                    Some(spi) => {
                        self.irs.spis[spi].sample();
                        let iaffid = self.irs.spis[spi].iaffid;
                        self.resignal_iaffid(iaffid);
                    }
                    None => {
                        tracing::warn!(
                            domain = domain.name(),
                            spi_id,
                            "SPI_RESAMPLER write to unreachable SPI"
                        );
                    }
                }
            }
            IrsRegister::SPI_CFGR => {
                let selected = IrsSpiSelr::from(self.irs.spi_selr[index]).id();
                match self.spi_in_frame(domain, selected) {
                    Some(spi) => {
                        let tm = TriggerMode::from_bit(IrsSpiCfgr::from(value).tm());
                        self.irs.spis[spi].set_trigger_mode(tm);
                        let iaffid = self.irs.spis[spi].iaffid;
                        self.resignal_iaffid(iaffid);
                    }
                    None => {
                        tracing::warn!(
                            domain = domain.name(),
                            spi_id = selected,
                            "SPI_CFGR write to unreachable SPI"
                        );
                    }
                }
            }
            IrsRegister::PE_SELR => {
                self.irs.pe_selr[index] = IrsPeSelr::from(value).iaffid().into();
            }
            IrsRegister::IST_BASER => {
                let merged = (self.irs.ist_baser[index] & !0xffff_ffff) | u64::from(value);
                self.ist_baser_write(domain, merged);
            }
            IrsRegister::IST_BASER_HI => {
                let merged =
                    (self.irs.ist_baser[index] & 0xffff_ffff) | (u64::from(value) << 32);
                self.ist_baser_write(domain, merged);
            }
            IrsRegister::IST_CFGR => {
                if IrsIstBaser::from(self.irs.ist_baser[index]).valid() {
                    tracing::warn!(
                        domain = domain.name(),
                        "IST_CFGR write while IST_BASER.VALID is set"
                    );
                } else {
                    self.irs.ist_cfgr[index] = value;
                }
            }
            IrsRegister::MAP_L2_ISTR => {
                self.map_l2_iste(domain, IrsMapL2Istr::from(value).id());
            }
            _ => return false,
        }
        true
    }

    fn frame_read64(&mut self, domain: Domain, offset: u16) -> Option<u64> {
        match IrsRegister(offset) {
            IrsRegister::IST_BASER => Some(self.irs.ist_baser[domain.index()]),
            _ => None,
        }
    }

    fn frame_write64(&mut self, domain: Domain, offset: u16, value: u64) -> bool {
        match IrsRegister(offset) {
            IrsRegister::IST_BASER => {
                self.ist_baser_write(domain, value);
                true
            }
            _ => false,
        }
    }

    /// An MMIO read of a config frame. Reserved or malformed accesses read
    /// as zero with a guest error log; the transaction always succeeds.
    pub(crate) fn frame_read(&mut self, domain: Domain, offset: u64, data: &mut [u8]) {
        data.fill(0);
        if !matches!(data.len(), 4 | 8) || offset & (data.len() as u64 - 1) != 0 || offset > 0xffff
        {
            tracing::warn!(
                domain = domain.name(),
                offset,
                size = data.len(),
                "malformed config frame read"
            );
            return;
        }
        let result = match data.len() {
            4 => self.frame_read32(domain, offset as u16).map(u64::from),
            8 => self.frame_read64(domain, offset as u16),
            _ => unreachable!(),
        };
        match result {
            Some(v) => {
                tracing::trace!(domain = domain.name(), offset, v, "config frame read");
                data.copy_from_slice(&v.to_le_bytes()[..data.len()]);
            }
            None => {
                tracing::warn!(
                    domain = domain.name(),
                    offset,
                    size = data.len(),
                    "invalid config frame read"
                );
            }
        }
    }

    /// An MMIO write to a config frame. Reserved or malformed accesses are
    /// ignored with a guest error log; the transaction always succeeds.
    pub(crate) fn frame_write(&mut self, domain: Domain, offset: u64, data: &[u8]) {
        if !matches!(data.len(), 4 | 8) || offset & (data.len() as u64 - 1) != 0 || offset > 0xffff
        {
            tracing::warn!(
                domain = domain.name(),
                offset,
                size = data.len(),
                "malformed config frame write"
            );
            return;
        }
        let handled = match data.len() {
            4 => {
                let value = u32::from_le_bytes(data.try_into().unwrap());
                self.frame_write32(domain, offset as u16, value)
            }
            8 => {
                let value = u64::from_le_bytes(data.try_into().unwrap());
                self.frame_write64(domain, offset as u16, value)
            }
            _ => unreachable!(),
        };
        if handled {
            tracing::trace!(domain = domain.name(), offset, "config frame write");
        } else {
            tracing::warn!(
                domain = domain.name(),
                offset,
                size = data.len(),
                "invalid config frame write"
            );
        }
    }
}
