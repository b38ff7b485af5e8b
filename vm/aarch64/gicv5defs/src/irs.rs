// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! IRS config-frame register layouts.
//!
//! Each interrupt domain gets its own 64 KiB config frame with this layout.
//! Registers not listed here are reserved (RAZ/WI).

use bitfield_struct::bitfield;
use core::ops::RangeInclusive;
use open_enum::open_enum;

#[open_enum]
#[repr(u16)]
pub enum IrsRegister {
    IDR0 = 0x000,
    IDR1 = 0x004,
    IDR2 = 0x008,
    IDR3 = 0x00c,
    IDR4 = 0x010,
    IDR5 = 0x014,
    IDR6 = 0x018,
    IDR7 = 0x01c,
    IIDR = 0x040,
    AIDR = 0x044,
    CR0 = 0x080,
    CR1 = 0x084,
    SYNCR = 0x0c0,
    SYNC_STATUSR = 0x0c4,
    SPI_SELR = 0x108,
    SPI_DOMAINR = 0x10c,
    SPI_RESAMPLER = 0x110,
    SPI_CFGR = 0x114,
    SPI_STATUSR = 0x118,
    PE_SELR = 0x140,
    PE_STATUSR = 0x144,
    IST_BASER = 0x180, // 64 bit
    IST_BASER_HI = 0x184,
    IST_CFGR = 0x190,
    IST_STATUSR = 0x194,
    MAP_L2_ISTR = 0x1c0,
    DEVARCH = 0xffbc,
    PIDR4 = 0xffd0,
    CIDR3 = 0xfffc,
}

impl IrsRegister {
    /// The CoreSight-style identification register ladder: PIDR4..7,
    /// PIDR0..3, CIDR0..3.
    pub const IDREGS: RangeInclusive<u16> = Self::PIDR4.0..=Self::CIDR3.0 + 3;
}

/// Values of the identification register ladder, one 32-bit register every
/// four bytes from `PIDR4` up to `CIDR3`. PIDR2 carries ArchRev 5.
pub const IRS_IDREGS: [u32; 12] = [
    0x44, 0x00, 0x00, 0x00, 0x92, 0xb4, 0x5b, 0x00, 0x0d, 0xf0, 0x05, 0xb1,
];

#[bitfield(u32)]
pub struct IrsIdr0 {
    #[bits(2)]
    pub int_dom: u8,
    #[bits(4)]
    pub pa_range: u8,
    pub virt: bool,
    pub one_n: bool,
    pub virt_one_n: bool,
    pub setlpi: bool,
    pub mec: bool,
    pub mpam: bool,
    pub swe: bool,
    #[bits(3)]
    _reserved: u8,
    pub irsid: u16,
}

#[bitfield(u32)]
pub struct IrsIdr1 {
    pub pe_cnt: u16,
    #[bits(4)]
    pub iaffid_bits: u8,
    #[bits(3)]
    pub pri_bits: u8,
    #[bits(9)]
    _reserved: u16,
}

#[bitfield(u32)]
pub struct IrsIdr2 {
    #[bits(5)]
    pub id_bits: u8,
    pub lpi: bool,
    #[bits(4)]
    pub min_lpi_id_bits: u8,
    pub ist_levels: bool,
    #[bits(3)]
    pub ist_l2sz: u8,
    pub ist_md: bool,
    #[bits(5)]
    pub istmd_sz: u8,
    #[bits(12)]
    _reserved: u16,
}

#[bitfield(u32)]
pub struct IrsIdr5 {
    #[bits(25)]
    pub spi_range: u32,
    #[bits(7)]
    _reserved: u8,
}

#[bitfield(u32)]
pub struct IrsIdr6 {
    #[bits(25)]
    pub spi_irs_range: u32,
    #[bits(7)]
    _reserved: u8,
}

#[bitfield(u32)]
pub struct IrsIdr7 {
    #[bits(24)]
    pub spi_base: u32,
    _reserved: u8,
}

#[bitfield(u32)]
pub struct IrsIidr {
    #[bits(12)]
    pub implementer: u16,
    #[bits(4)]
    pub revision: u8,
    #[bits(4)]
    pub variant: u8,
    #[bits(12)]
    pub productid: u16,
}

#[bitfield(u32)]
pub struct IrsAidr {
    #[bits(4)]
    pub archminorrev: u8,
    #[bits(4)]
    pub archmajorrev: u8,
    #[bits(4)]
    pub component: u8,
    #[bits(20)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsCr0 {
    pub en: bool,
    pub idle: bool,
    #[bits(30)]
    _reserved: u32,
}

/// Cacheability/shareability hints for IRS-initiated memory accesses.
/// Stored for read-back; an emulated IRS has no use for them.
#[bitfield(u32)]
pub struct IrsCr1 {
    #[bits(2)]
    pub sh: u8,
    #[bits(2)]
    pub oc: u8,
    #[bits(2)]
    pub ic: u8,
    pub ist_ra: bool,
    pub ist_wa: bool,
    #[bits(24)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsSyncr {
    #[bits(31)]
    _reserved: u32,
    pub sync: bool,
}

#[bitfield(u32)]
pub struct IrsSyncStatusr {
    pub idle: bool,
    #[bits(31)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsSpiSelr {
    #[bits(24)]
    pub id: u32,
    _reserved: u8,
}

#[bitfield(u32)]
pub struct IrsSpiDomainr {
    #[bits(2)]
    pub domain: u8,
    #[bits(30)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsSpiResampler {
    #[bits(24)]
    pub spi_id: u32,
    _reserved: u8,
}

#[bitfield(u32)]
pub struct IrsSpiCfgr {
    pub tm: bool,
    #[bits(31)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsSpiStatusr {
    pub idle: bool,
    pub v: bool,
    #[bits(30)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsPeSelr {
    pub iaffid: u16,
    _reserved: u16,
}

#[bitfield(u32)]
pub struct IrsPeStatusr {
    pub idle: bool,
    pub v: bool,
    pub online: bool,
    #[bits(29)]
    _reserved: u32,
}

#[bitfield(u64)]
pub struct IrsIstBaser {
    pub valid: bool,
    #[bits(5)]
    _reserved: u8,
    #[bits(50)]
    pub addr: u64,
    _reserved2: u8,
}

impl IrsIstBaser {
    /// The IST base physical address, 64-byte aligned.
    pub const fn address(&self) -> u64 {
        self.addr() << 6
    }
}

#[bitfield(u32)]
pub struct IrsIstCfgr {
    #[bits(5)]
    pub lpi_id_bits: u8,
    #[bits(2)]
    pub l2sz: u8,
    #[bits(2)]
    pub istsz: u8,
    #[bits(7)]
    _reserved: u8,
    pub structure: bool,
    #[bits(15)]
    _reserved2: u16,
}

#[bitfield(u32)]
pub struct IrsIstStatusr {
    pub idle: bool,
    #[bits(31)]
    _reserved: u32,
}

#[bitfield(u32)]
pub struct IrsMapL2Istr {
    #[bits(24)]
    pub id: u32,
    _reserved: u8,
}

#[bitfield(u32)]
pub struct IrsDevArch {
    pub archid: u16,
    #[bits(4)]
    pub revision: u8,
    pub present: bool,
    #[bits(11)]
    pub architect: u16,
}

/// `IRS_DEVARCH` value: Arm-architected (JEP106 code 0x23b) GICv5 IRS.
pub const IRS_DEVARCH: u32 = IrsDevArch::new()
    .with_archid(0x47d5)
    .with_revision(0)
    .with_present(true)
    .with_architect(0x23b)
    .0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ist_baser_address_alignment() {
        let baser = IrsIstBaser::from(0x4000_0001u64);
        assert!(baser.valid());
        assert_eq!(baser.address(), 0x4000_0000);

        // Bits below 6 other than VALID don't reach the address.
        let baser = IrsIstBaser::from(0x4000_003eu64);
        assert_eq!(baser.address(), 0x4000_0000);
    }

    #[test]
    fn idreg_ladder_span() {
        assert_eq!(IrsRegister::IDREGS.len(), IRS_IDREGS.len() * 4);
        assert!(IrsRegister::IDREGS.contains(&IrsRegister::PIDR4.0));
        assert!(IrsRegister::IDREGS.contains(&IrsRegister::CIDR3.0));
        assert!(!IrsRegister::IDREGS.contains(&IrsRegister::DEVARCH.0));
    }
}
