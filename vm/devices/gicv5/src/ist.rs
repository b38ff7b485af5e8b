// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Interrupt State Table walker and the pending-LPI cache.
//!
//! LPI state lives in guest memory, in a one- or two-level table configured
//! through `IRS_IST_BASER`/`IRS_IST_CFGR`. The walker hands out
//! [`IsteHandle`]s: a handle is the only way to write an L2 ISTE back, which
//! keeps the cache-versus-memory discipline in one place. The cache holds
//! exactly the LPIs whose `PENDING` bit is set, with writeback deferred until
//! the pending bit clears or the table is invalidated.

use crate::memory::GuestMemory;
use crate::memory::MemTxAttrs;
use gicv5defs::iste::L1Iste;
use gicv5defs::iste::L2Iste;
use gicv5defs::irs::IrsIstBaser;
use gicv5defs::irs::IrsIstCfgr;
use gicv5defs::Domain;
use gicv5defs::DomainSet;
use gicv5defs::ID_BITS;
use gicv5defs::MIN_LPI_ID_BITS;
use gicv5defs::NUM_DOMAINS;
use std::collections::BTreeMap;

/// The IST configuration for one domain, captured and frozen when the guest
/// sets `IRS_IST_BASER.VALID`.
#[derive(Debug, Copy, Clone)]
pub(crate) struct IstConfig {
    pub valid: bool,
    pub base: u64,
    pub two_level: bool,
    pub id_bits: u8,
    /// L2 entry size in bytes.
    pub istsz: u8,
    /// How many low bits of an ID index the L2 table.
    pub l2_idx_bits: u8,
    pub attrs: MemTxAttrs,
}

impl Default for IstConfig {
    fn default() -> Self {
        Self {
            valid: false,
            base: 0,
            two_level: false,
            id_bits: 0,
            istsz: 0,
            l2_idx_bits: 0,
            attrs: MemTxAttrs {
                space: Domain::NonSecure,
                secure: false,
            },
        }
    }
}

impl IstConfig {
    /// Captures the live `IST_CFGR`/`IST_BASER` values into a frozen config,
    /// sanitizing reserved encodings down to the minimum sizes.
    pub fn capture(
        baser: IrsIstBaser,
        cfgr: IrsIstCfgr,
        domain: Domain,
        implemented: DomainSet,
    ) -> Self {
        let id_bits = cfgr
            .lpi_id_bits()
            .clamp(MIN_LPI_ID_BITS as u8, ID_BITS as u8);

        // Entry size: 4, 8 or 16 bytes as log2.
        let istbits: u8 = match cfgr.istsz() {
            0 => 2,
            1 => 3,
            2 => 4,
            _ => {
                tracing::warn!(
                    domain = domain.name(),
                    istsz = cfgr.istsz(),
                    "reserved ISTSZ encoding, using 4-byte entries"
                );
                2
            }
        };
        // L2 page size: 4K, 16K or 64K as log2.
        let l2bits: u8 = match cfgr.l2sz() {
            0 => 12,
            1 => 14,
            2 => 16,
            _ => {
                tracing::warn!(
                    domain = domain.name(),
                    l2sz = cfgr.l2sz(),
                    "reserved L2SZ encoding, using 4K pages"
                );
                12
            }
        };

        Self {
            valid: true,
            base: baser.address(),
            two_level: cfgr.structure(),
            id_bits,
            istsz: 1 << istbits,
            // If 14 bits index each byte of a 16K L2 page and entries are 4
            // bytes, an entry index needs 14 - 2 = 12 bits.
            l2_idx_bits: l2bits - istbits,
            attrs: MemTxAttrs::for_domain(domain, implemented),
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct CacheEntry {
    word: u32,
    /// Guest address of the L2 ISTE, captured at insert time. Eviction
    /// writeback never re-walks the L1 table.
    addr: u64,
}

/// Cache of L2 ISTE words for the LPIs that are currently pending.
#[derive(Debug, Default)]
pub(crate) struct LpiCache {
    domains: [BTreeMap<u32, CacheEntry>; NUM_DOMAINS],
}

impl LpiCache {
    /// Writes every cached entry for `domain` back to guest memory and drops
    /// it. Used when the guest invalidates the IST.
    pub fn flush(&mut self, mem: &dyn GuestMemory, cfg: &IstConfig, domain: Domain) {
        for (id, entry) in std::mem::take(&mut self.domains[domain.index()]) {
            if write_l2_iste_mem(mem, cfg.attrs, entry.addr, entry.word).is_err() {
                tracing::warn!(
                    domain = domain.name(),
                    id,
                    addr = entry.addr,
                    "LPI cache flush lost an entry to a memory error"
                );
            }
        }
    }

    /// Drops all entries without writeback. Power-on reset only.
    pub fn clear(&mut self) {
        for map in &mut self.domains {
            map.clear();
        }
    }

    /// The pending LPIs of `domain`, in ID order.
    pub fn iter_domain(&self, domain: Domain) -> impl Iterator<Item = (u32, L2Iste)> + '_ {
        self.domains[domain.index()]
            .iter()
            .map(|(&id, entry)| (id, L2Iste::from(entry.word)))
    }

    #[cfg(test)]
    pub fn contains(&self, domain: Domain, id: u32) -> bool {
        self.domains[domain.index()].contains_key(&id)
    }
}

/// A writable view of one L2 ISTE, returned by [`get_l2_iste`].
///
/// Callers that modify `word` must commit it with [`put_l2_iste`]; read-only
/// callers can just drop the handle. The handle records whether the word came
/// from the cache so that `put` maintains the pending-entries-only invariant.
pub(crate) struct IsteHandle {
    pub word: L2Iste,
    domain: Domain,
    id: u32,
    addr: u64,
    cached: bool,
}

impl IsteHandle {
    pub fn iaffid(&self) -> u16 {
        self.word.iaffid()
    }
}

fn read_l2_iste_mem(mem: &dyn GuestMemory, attrs: MemTxAttrs, addr: u64) -> Option<u32> {
    match mem.read_u32_le(addr, attrs) {
        Ok(word) => Some(word),
        Err(_) => {
            // Reportable with EC=0x02 if software error reporting is
            // implemented.
            tracing::warn!(addr, "L2 ISTE read failed");
            None
        }
    }
}

fn write_l2_iste_mem(
    mem: &dyn GuestMemory,
    attrs: MemTxAttrs,
    addr: u64,
    word: u32,
) -> Result<(), ()> {
    mem.write_u32_le(addr, word, attrs).map_err(|_| {
        // Reportable with EC=0x02 if software error reporting is
        // implemented.
        tracing::warn!(addr, "L2 ISTE write failed");
    })
}

/// The guest address of the L1 IST entry covering `id` in a 2-level
/// configuration. The low `l2_idx_bits` of the ID index the L2 table and the
/// higher bits index the L1 table.
pub(crate) fn l1_iste_addr(cfg: &IstConfig, id: u32) -> u64 {
    cfg.base + u64::from(id >> cfg.l2_idx_bits) * 8
}

/// Resolves `id` to the guest address of its L2 ISTE, walking the L1 table
/// for 2-level configurations.
fn l2_iste_addr(mem: &dyn GuestMemory, cfg: &IstConfig, id: u32) -> Option<u64> {
    let (l2_base, index) = if cfg.two_level {
        let l1_addr = l1_iste_addr(cfg, id);
        let l1_iste = match mem.read_u64_le(l1_addr, cfg.attrs) {
            Ok(v) => L1Iste::from(v),
            Err(_) => {
                // Reportable with EC=0x01 if software error reporting is
                // implemented.
                tracing::warn!(id, addr = l1_addr, "L1 ISTE lookup failed");
                return None;
            }
        };
        if !l1_iste.valid() {
            return None;
        }
        (l1_iste.address(), id & ((1 << cfg.l2_idx_bits) - 1))
    } else {
        (cfg.base, id)
    };
    Some(l2_base + u64::from(index) * u64::from(cfg.istsz))
}

/// Finds the L2 ISTE for interrupt `id`, from the cache if the LPI is
/// pending, otherwise from guest memory.
///
/// Returns `None` if the domain has no valid IST, the ID is outside the
/// configured range, the covering L1 entry is invalid, or guest memory
/// failed.
pub(crate) fn get_l2_iste(
    mem: &dyn GuestMemory,
    cfg: &IstConfig,
    cache: &LpiCache,
    domain: Domain,
    id: u32,
) -> Option<IsteHandle> {
    if !cfg.valid {
        return None;
    }
    if id >= 1 << cfg.id_bits {
        return None;
    }
    if let Some(entry) = cache.domains[domain.index()].get(&id) {
        return Some(IsteHandle {
            word: L2Iste::from(entry.word),
            domain,
            id,
            addr: entry.addr,
            cached: true,
        });
    }
    let addr = l2_iste_addr(mem, cfg, id)?;
    let word = read_l2_iste_mem(mem, cfg.attrs, addr)?;
    Some(IsteHandle {
        word: L2Iste::from(word),
        domain,
        id,
        addr,
        cached: false,
    })
}

/// Commits a modified L2 ISTE.
///
/// The pending bit decides where the word lands: newly-pending entries are
/// inserted into the cache with writeback deferred, entries that stopped
/// being pending are evicted and written back, and everything else writes
/// straight through (or updates the cached copy in place).
pub(crate) fn put_l2_iste(
    mem: &dyn GuestMemory,
    cfg: &IstConfig,
    cache: &mut LpiCache,
    handle: IsteHandle,
) {
    let IsteHandle {
        word,
        domain,
        id,
        addr,
        cached,
    } = handle;
    let map = &mut cache.domains[domain.index()];
    let word = u32::from(word);
    match (cached, L2Iste::from(word).pending()) {
        (false, true) => {
            map.insert(id, CacheEntry { word, addr });
        }
        (true, true) => {
            // Still pending: update the cached copy, keep deferring.
            map.insert(id, CacheEntry { word, addr });
        }
        (true, false) => {
            map.remove(&id);
            let _ = write_l2_iste_mem(mem, cfg.attrs, addr, word);
        }
        (false, false) => {
            let _ = write_l2_iste_mem(mem, cfg.attrs, addr, word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestMemory;
    use gicv5defs::irs::IrsIstBaser;
    use gicv5defs::irs::IrsIstCfgr;

    const BASE: u64 = 0x4000_0000;

    fn ns_attrs() -> MemTxAttrs {
        MemTxAttrs::for_domain(Domain::NonSecure, DomainSet::NS_ONLY)
    }

    fn one_level_cfg() -> IstConfig {
        IstConfig::capture(
            IrsIstBaser::new().with_valid(true).with_addr(BASE >> 6),
            IrsIstCfgr::new().with_lpi_id_bits(14),
            Domain::NonSecure,
            DomainSet::NS_ONLY,
        )
    }

    fn two_level_cfg() -> IstConfig {
        IstConfig::capture(
            IrsIstBaser::new().with_valid(true).with_addr(BASE >> 6),
            IrsIstCfgr::new().with_lpi_id_bits(14).with_structure(true),
            Domain::NonSecure,
            DomainSet::NS_ONLY,
        )
    }

    #[test]
    fn capture_sanitizes_reserved_encodings() {
        let cfg = IstConfig::capture(
            IrsIstBaser::new().with_valid(true).with_addr(BASE >> 6),
            IrsIstCfgr::new()
                .with_lpi_id_bits(0)
                .with_istsz(3)
                .with_l2sz(3),
            Domain::NonSecure,
            DomainSet::NS_ONLY,
        );
        assert!(cfg.valid);
        assert_eq!(cfg.base, BASE);
        assert_eq!(cfg.id_bits, MIN_LPI_ID_BITS as u8);
        assert_eq!(cfg.istsz, 4);
        assert_eq!(cfg.l2_idx_bits, 10);
    }

    #[test]
    fn capture_entry_sizes() {
        for (istsz, bytes, idx_bits) in [(0, 4, 14), (1, 8, 13), (2, 16, 12)] {
            let cfg = IstConfig::capture(
                IrsIstBaser::new().with_valid(true).with_addr(BASE >> 6),
                IrsIstCfgr::new()
                    .with_lpi_id_bits(14)
                    .with_istsz(istsz)
                    .with_l2sz(2),
                Domain::NonSecure,
                DomainSet::NS_ONLY,
            );
            assert_eq!(cfg.istsz, bytes);
            assert_eq!(cfg.l2_idx_bits, idx_bits);
        }
    }

    #[test]
    fn one_level_walk() {
        let mem = TestMemory::new(BASE, 0x1_0000);
        let cfg = one_level_cfg();
        let cache = LpiCache::default();
        mem.write_u32_le(BASE + 0x17 * 4, 0x0000_4008, ns_attrs())
            .unwrap();

        let handle =
            get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x17).expect("walk succeeds");
        assert_eq!(handle.word.priority(), 8);
        assert!(handle.word.enable());
        assert!(!handle.cached);
    }

    #[test]
    fn one_level_rejects_out_of_range_id() {
        let mem = TestMemory::new(BASE, 0x1_0000);
        let cfg = one_level_cfg();
        let cache = LpiCache::default();
        assert!(get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 1 << 14).is_none());
    }

    #[test]
    fn invalid_config_walks_nothing() {
        let mem = TestMemory::new(BASE, 0x1_0000);
        let cfg = IstConfig::default();
        let cache = LpiCache::default();
        assert!(get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0).is_none());
    }

    #[test]
    fn two_level_walk() {
        let mem = TestMemory::new(BASE, 0x10_0000);
        let cfg = two_level_cfg();
        let cache = LpiCache::default();
        let l2_page = BASE + 0x1_0000;

        // ID 0x1404 with 10 L2 index bits: L1 index 5, L2 index 4.
        mem.write_u64_le(BASE + 5 * 8, (l2_page >> 12) << 12 | 1, ns_attrs())
            .unwrap();
        mem.write_u32_le(l2_page + 4 * 4, 0x0000_5808, ns_attrs())
            .unwrap();

        let handle =
            get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x1404).expect("walk succeeds");
        assert_eq!(handle.word.priority(), 11);
        assert_eq!(handle.addr, l2_page + 4 * 4);
    }

    #[test]
    fn two_level_invalid_l1_entry() {
        let mem = TestMemory::new(BASE, 0x10_0000);
        let cfg = two_level_cfg();
        let cache = LpiCache::default();
        // L1 entry reads as zero: VALID clear.
        assert!(get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x1404).is_none());
    }

    #[test]
    fn walk_failure_is_absorbed() {
        // Memory window too small for the table: the read faults and the
        // walk reports no entry rather than panicking.
        let mem = TestMemory::new(BASE, 0x10);
        let cfg = one_level_cfg();
        let cache = LpiCache::default();
        assert!(get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x100).is_none());
    }

    #[test]
    fn pending_transitions_drive_the_cache() {
        let mem = TestMemory::new(BASE, 0x1_0000);
        let cfg = one_level_cfg();
        let mut cache = LpiCache::default();
        let addr = BASE + 0x17 * 4;
        mem.write_u32_le(addr, 0x0000_4008, ns_attrs()).unwrap();

        // Setting PENDING inserts into the cache and defers the writeback.
        let mut handle = get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x17).unwrap();
        handle.word.set_pending(true);
        put_l2_iste(&mem, &cfg, &mut cache, handle);
        assert!(cache.contains(Domain::NonSecure, 0x17));
        assert_eq!(mem.read_u32_le(addr, ns_attrs()).unwrap(), 0x0000_4008);

        // The cached word is what subsequent walks see.
        let handle = get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x17).unwrap();
        assert!(handle.cached);
        assert!(handle.word.pending());

        // Clearing PENDING evicts and writes back.
        let mut handle = get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 0x17).unwrap();
        handle.word.set_pending(false);
        put_l2_iste(&mem, &cfg, &mut cache, handle);
        assert!(!cache.contains(Domain::NonSecure, 0x17));
        assert_eq!(mem.read_u32_le(addr, ns_attrs()).unwrap(), 0x0000_4008);
    }

    #[test]
    fn non_pending_update_writes_through() {
        let mem = TestMemory::new(BASE, 0x1_0000);
        let cfg = one_level_cfg();
        let mut cache = LpiCache::default();
        let addr = BASE + 3 * 4;

        let mut handle = get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 3).unwrap();
        handle.word.set_priority(5);
        handle.word.set_enable(true);
        put_l2_iste(&mem, &cfg, &mut cache, handle);
        assert!(!cache.contains(Domain::NonSecure, 3));
        let stored = L2Iste::from(mem.read_u32_le(addr, ns_attrs()).unwrap());
        assert_eq!(stored.priority(), 5);
        assert!(stored.enable());
    }

    #[test]
    fn cached_update_stays_deferred() {
        let mem = TestMemory::new(BASE, 0x1_0000);
        let cfg = one_level_cfg();
        let mut cache = LpiCache::default();
        let addr = BASE + 9 * 4;

        let mut handle = get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 9).unwrap();
        handle.word.set_pending(true);
        put_l2_iste(&mem, &cfg, &mut cache, handle);

        // Change the priority while pending: cache updated, memory not.
        let mut handle = get_l2_iste(&mem, &cfg, &cache, Domain::NonSecure, 9).unwrap();
        handle.word.set_priority(3);
        put_l2_iste(&mem, &cfg, &mut cache, handle);
        assert_eq!(mem.read_u32_le(addr, ns_attrs()).unwrap(), 0);
        let (_, word) = cache.iter_domain(Domain::NonSecure).next().unwrap();
        assert_eq!(word.priority(), 3);

        // Flush writes the deferred state back and empties the cache.
        cache.flush(&mem, &cfg, Domain::NonSecure);
        assert!(!cache.contains(Domain::NonSecure, 9));
        let stored = L2Iste::from(mem.read_u32_le(addr, ns_attrs()).unwrap());
        assert!(stored.pending());
        assert_eq!(stored.priority(), 3);
    }
}
