// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPU interface system register layouts.
//!
//! The `GIC_CD*` system instructions carry a 64-bit payload with the INTID
//! (type + ID) in the low word and any operand fields in the high word; a
//! virtual-interrupt flag sits at bit 63 of every payload.

use bitfield_struct::bitfield;

/// The `HPPIV` bit in a `GICR_CDIA`/`GICR_CDNMIA` result: set when the low
/// word carries a valid INTID.
pub const HPPIV: u64 = 1 << 32;

/// `ICC_ICSR_EL1`: the interrupt configuration captured by the last
/// `GIC_CDRCFG`. `F` set (alone) reports that the lookup failed.
#[bitfield(u64)]
pub struct IccIcsr {
    pub f: bool,
    pub pending: bool,
    pub active: bool,
    pub hm: bool,
    pub enabled: bool,
    pub irm: bool,
    #[bits(2)]
    _reserved: u8,
    #[bits(5)]
    pub priority: u8,
    #[bits(19)]
    _reserved2: u32,
    pub iaffid: u16,
    _reserved3: u16,
}

/// `ICC_CR0_EL1`, banked by interrupt domain. Only `EN` is writable; the
/// stream link to the IRS is synchronous, so `LINK` and `LINK_IDLE` always
/// read as set.
#[bitfield(u64)]
pub struct IccCr0 {
    pub en: bool,
    pub ippt: bool,
    pub pid: bool,
    #[bits(27)]
    _reserved: u32,
    pub link: bool,
    pub link_idle: bool,
    _reserved2: u32,
}

/// `ICC_PCR_EL1`: the priority mask, banked by interrupt domain.
#[bitfield(u64)]
pub struct IccPcr {
    #[bits(5)]
    pub priority: u8,
    #[bits(59)]
    _reserved: u64,
}

/// `ICC_IDR0_EL1`: CPU interface identification.
#[bitfield(u64)]
pub struct IccIdr0 {
    #[bits(3)]
    pub pri_bits: u8,
    #[bits(4)]
    pub iaffid_bits: u8,
    #[bits(57)]
    _reserved: u64,
}

/// `GIC_CDPRI` payload.
#[bitfield(u64)]
pub struct Cdpri {
    pub intid: u32,
    #[bits(5)]
    pub priority: u8,
    #[bits(26)]
    _reserved: u32,
    pub virt: bool,
}

/// `GIC_CDPEND` payload.
#[bitfield(u64)]
pub struct Cdpend {
    pub intid: u32,
    pub pending: bool,
    #[bits(30)]
    _reserved: u32,
    pub virt: bool,
}

/// `GIC_CDHM` payload.
#[bitfield(u64)]
pub struct Cdhm {
    pub intid: u32,
    pub hm: bool,
    #[bits(30)]
    _reserved: u32,
    pub virt: bool,
}

/// `GIC_CDAFF` payload.
#[bitfield(u64)]
pub struct Cdaff {
    pub intid: u32,
    pub iaffid: u16,
    pub irm: bool,
    #[bits(14)]
    _reserved: u16,
    pub virt: bool,
}

/// Payload of the commands that carry an INTID and nothing else:
/// `GIC_CDEN`, `GIC_CDDIS`, `GIC_CDRCFG` and `GIC_CDDI`.
#[bitfield(u64)]
pub struct CdIntid {
    pub intid: u32,
    #[bits(31)]
    _reserved: u32,
    pub virt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntType;
    use crate::Intid;

    #[test]
    fn cdpri_payload() {
        let v = Cdpri::new()
            .with_intid(Intid::pack(IntType::Lpi, 0x17))
            .with_priority(8);
        assert_eq!(u64::from(v), 0x8_4000_0017);
        assert!(!v.virt());
    }

    #[test]
    fn icsr_failure_value() {
        assert_eq!(u64::from(IccIcsr::new().with_f(true)), 1);
    }
}
