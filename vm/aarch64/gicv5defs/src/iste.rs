// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interrupt State Table entry layouts.
//!
//! ISTs live in guest memory. A 2-level IST has an L1 table of 64-bit
//! entries, each pointing at an L2 page of 32-bit interrupt state words; a
//! 1-level IST is a bare array of L2 words.

use bitfield_struct::bitfield;

/// An L1 IST entry: a valid bit plus the 4 KiB-aligned address of the L2
/// page it maps.
#[bitfield(u64)]
pub struct L1Iste {
    pub valid: bool,
    #[bits(11)]
    _reserved: u16,
    #[bits(44)]
    pub l2_addr: u64,
    _reserved2: u8,
}

impl L1Iste {
    /// The physical address of the L2 page.
    pub const fn address(&self) -> u64 {
        self.l2_addr() << 12
    }
}

/// An L2 IST entry: the live state of one LPI.
///
/// L2 entries may be 4, 8 or 16 bytes in guest memory depending on
/// `IRS_IST_CFGR.ISTSZ`; the state word is always the first 32 bits and the
/// remainder is implementation-reserved (unused here).
#[bitfield(u32)]
pub struct L2Iste {
    pub pending: bool,
    pub active: bool,
    pub hm: bool,
    pub enable: bool,
    pub irm: bool,
    #[bits(4)]
    _reserved: u8,
    #[bits(2)]
    pub hwu: u8,
    #[bits(5)]
    pub priority: u8,
    pub iaffid: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_iste_field_positions() {
        let iste = L2Iste::new()
            .with_pending(true)
            .with_enable(true)
            .with_priority(8)
            .with_iaffid(0x1234);
        assert_eq!(u32::from(iste), 0x1234_4009);
    }

    #[test]
    fn l1_iste_address() {
        let iste = L1Iste::from(0x4001_3001u64);
        assert!(iste.valid());
        assert_eq!(iste.address(), 0x4001_3000);
    }
}
