// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions for the ARM Generic Interrupt Controller v5 (GICv5).
//!
//! This crate holds the architectural layouts shared by the IRS emulator and
//! the CPU interface: IRS config-frame registers, Interrupt State Table entry
//! words, CPU interface system register layouts, and INTID packing.

#![forbid(unsafe_code)]

pub mod cpuif;
pub mod irs;
pub mod iste;

use bitfield_struct::bitfield;

/// Number of architectural priority bits implemented.
pub const PRI_BITS: u32 = 5;

/// Mask of the implemented low-order priority bits.
pub const PRIORITY_MASK: u8 = (1 << PRI_BITS) - 1;

/// Number of IAFFID bits implemented.
pub const IAFFID_BITS: u32 = 16;

/// Number of interrupt ID bits in an INTID.
pub const ID_BITS: u32 = 24;

/// Smallest LPI ID width a guest may configure in `IRS_IST_CFGR`.
pub const MIN_LPI_ID_BITS: u32 = 14;

/// Size of one IRS config frame in the physical address map.
pub const IRS_CONFIG_FRAME_SIZE: u64 = 0x10000;

/// Number of PPIs per CPU (two 64-bit banks).
pub const NUM_PPIS: u32 = 128;

/// Sentinel priority meaning "no candidate interrupt".
pub const PRIO_IDLE: u8 = 0xff;

/// The number of physical interrupt domains.
pub const NUM_DOMAINS: usize = 4;

/// A physical interrupt domain.
///
/// The numbering matches the architectural `IRS_IDR0.INT_DOM` encoding, which
/// is also the encoding used for the physical address space attribute of IRS
/// memory accesses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Secure = 0,
    NonSecure = 1,
    El3 = 2,
    Realm = 3,
}

impl Domain {
    pub const ALL: [Self; NUM_DOMAINS] = [Self::Secure, Self::NonSecure, Self::El3, Self::Realm];

    /// Decodes a 2-bit domain field. Total: every 2-bit value names a domain.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Secure,
            1 => Self::NonSecure,
            2 => Self::El3,
            _ => Self::Realm,
        }
    }

    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Secure => "Secure",
            Self::NonSecure => "NonSecure",
            Self::El3 => "EL3",
            Self::Realm => "Realm",
        }
    }
}

/// A set of interrupt domains, as configured by the board.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DomainSet(u8);

impl DomainSet {
    pub const EMPTY: Self = Self(0);

    /// The set containing only the NonSecure domain, the baseline for boards
    /// without EL3 or RME support.
    pub const NS_ONLY: Self = Self(1 << Domain::NonSecure as u8);

    pub const fn with(self, domain: Domain) -> Self {
        Self(self.0 | 1 << domain as u8)
    }

    pub const fn contains(self, domain: Domain) -> bool {
        self.0 & (1 << domain as u8) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The most privileged domain in the set, used as the reset assignment
    /// for SPIs: EL3, then Secure, then Realm, then NonSecure.
    pub const fn most_privileged(self) -> Option<Domain> {
        if self.contains(Domain::El3) {
            Some(Domain::El3)
        } else if self.contains(Domain::Secure) {
            Some(Domain::Secure)
        } else if self.contains(Domain::Realm) {
            Some(Domain::Realm)
        } else if self.contains(Domain::NonSecure) {
            Some(Domain::NonSecure)
        } else {
            None
        }
    }
}

/// The type of an interrupt, in the 3-bit encoding used by `INTID.TYPE`.
///
/// Values 0 and 4..=7 are reserved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntType {
    Ppi = 1,
    Lpi = 2,
    Spi = 3,
}

impl IntType {
    /// Decodes a 3-bit `TYPE` field; reserved encodings return `None`.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Self::Ppi),
            2 => Some(Self::Lpi),
            3 => Some(Self::Spi),
            _ => None,
        }
    }

    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ppi => "PPI",
            Self::Lpi => "LPI",
            Self::Spi => "SPI",
        }
    }
}

/// Interrupt handling mode, in the `L2_ISTE.HM` encoding.
///
/// Handling mode controls whether acknowledging an interrupt clears its
/// pending state. It applies to the latched state of SPIs, LPIs and PPIs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandlingMode {
    Edge = 0,
    Level = 1,
}

impl HandlingMode {
    pub const fn from_bit(bit: bool) -> Self {
        if bit { Self::Level } else { Self::Edge }
    }

    pub const fn bit(self) -> bool {
        matches!(self, Self::Level)
    }
}

/// Interrupt trigger mode, in the `IRS_SPI_CFGR.TM` encoding.
///
/// Not the same thing as [`HandlingMode`], even though the two states have
/// the same names. Trigger mode applies only to SPIs and tells the IRS what
/// kinds of changes to the input wire generate SET and CLEAR events.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TriggerMode {
    Edge = 0,
    Level = 1,
}

impl TriggerMode {
    pub const fn from_bit(bit: bool) -> Self {
        if bit { Self::Level } else { Self::Edge }
    }

    pub const fn bit(self) -> bool {
        matches!(self, Self::Level)
    }
}

/// Interrupt routing mode, in the `L2_ISTE.IRM` encoding.
///
/// 1-of-N routing is an optional feature this implementation does not
/// provide; a guest requesting it gets targeted routing instead.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoutingMode {
    Targeted = 0,
    OneOfN = 1,
}

impl RoutingMode {
    pub const fn from_bit(bit: bool) -> Self {
        if bit { Self::OneOfN } else { Self::Targeted }
    }

    pub const fn bit(self) -> bool {
        matches!(self, Self::OneOfN)
    }
}

/// A 32-bit INTID: the interrupt ID in the low 24 bits and the interrupt
/// type in the top three bits.
#[bitfield(u32)]
pub struct Intid {
    #[bits(24)]
    pub id: u32,
    #[bits(5)]
    _reserved: u8,
    #[bits(3)]
    pub ty: u8,
}

impl Intid {
    /// Packs an interrupt type and ID into INTID form.
    pub fn pack(ty: IntType, id: u32) -> u32 {
        Self::new().with_id(id).with_ty(ty.into_bits()).into()
    }

    /// The interrupt type, if the `TYPE` field holds a non-reserved value.
    pub fn int_type(&self) -> Option<IntType> {
        IntType::from_bits(self.ty())
    }
}

/// Architected PPI assignments.
pub mod ppi {
    pub const S_DB_PPI: u32 = 0;
    pub const RL_DB_PPI: u32 = 1;
    pub const NS_DB_PPI: u32 = 2;
    pub const SW_PPI: u32 = 3;
    pub const HACDBSIRQ: u32 = 15;
    pub const CNTHVS: u32 = 19;
    pub const CNTHPS: u32 = 20;
    pub const PMBIRQ: u32 = 21;
    pub const COMMIRQ: u32 = 22;
    pub const PMUIRQ: u32 = 23;
    pub const CTIIRQ: u32 = 24;
    pub const GICMNT: u32 = 25;
    pub const CNTHP: u32 = 26;
    pub const CNTV: u32 = 27;
    pub const CNTHV: u32 = 28;
    pub const CNTPS: u32 = 29;
    pub const CNTP: u32 = 30;
    pub const TRBIRQ: u32 = 31;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intid_packing() {
        assert_eq!(Intid::pack(IntType::Lpi, 0x17), 0x4000_0017);
        assert_eq!(Intid::pack(IntType::Spi, 40), 0x6000_0028);
        assert_eq!(Intid::pack(IntType::Ppi, 3), 0x2000_0003);

        let intid = Intid::from(0x4000_0017);
        assert_eq!(intid.int_type(), Some(IntType::Lpi));
        assert_eq!(intid.id(), 0x17);
        assert_eq!(Intid::from(0x0000_0001).int_type(), None);
        assert_eq!(Intid::from(0x8000_0000).int_type(), None);
    }

    #[test]
    fn domain_bits_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::from_bits(domain.into_bits()), domain);
        }
    }

    #[test]
    fn domain_set_privilege_order() {
        let all = DomainSet::EMPTY
            .with(Domain::NonSecure)
            .with(Domain::Secure)
            .with(Domain::El3)
            .with(Domain::Realm);
        assert_eq!(all.most_privileged(), Some(Domain::El3));
        assert_eq!(
            DomainSet::EMPTY
                .with(Domain::NonSecure)
                .with(Domain::Realm)
                .most_privileged(),
            Some(Domain::Realm)
        );
        assert_eq!(DomainSet::NS_ONLY.most_privileged(), Some(Domain::NonSecure));
        assert_eq!(DomainSet::EMPTY.most_privileged(), None);
    }
}
