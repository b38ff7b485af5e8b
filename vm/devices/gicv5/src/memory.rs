// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Access to the guest physical address space for IST walks.

use gicv5defs::Domain;
use gicv5defs::DomainSet;
use thiserror::Error;

/// Attributes attached to every IRS-initiated memory transaction.
///
/// `IRS_CR1` nominally supplies cacheability and shareability for these
/// accesses, but an emulator only needs the security attributes, and those
/// follow from the interrupt domain. The domain encoding doubles as the
/// physical address space encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemTxAttrs {
    pub space: Domain,
    pub secure: bool,
}

impl MemTxAttrs {
    /// The attributes for IST accesses on behalf of `domain`.
    ///
    /// EL3 accesses are emitted to the Secure space rather than Root when the
    /// Realm domain is unimplemented (no RME means no Root PAS).
    pub fn for_domain(domain: Domain, implemented: DomainSet) -> Self {
        let space = if domain == Domain::El3 && !implemented.contains(Domain::Realm) {
            Domain::Secure
        } else {
            domain
        };
        Self {
            space,
            secure: matches!(space, Domain::Secure | Domain::El3),
        }
    }
}

/// A failed guest memory transaction.
///
/// The IRS absorbs these: the in-flight operation is dropped with a guest
/// error log, never a device failure.
#[derive(Debug, Error)]
#[error("guest memory transaction failed")]
pub struct MemTxError;

/// The guest physical address space the IRS walks ISTs in.
///
/// All accesses are little-endian and carry explicit [`MemTxAttrs`]. The
/// implementation is supplied by the VMM; calls happen with the GIC device
/// lock held and must not reenter the GIC.
pub trait GuestMemory: Send + Sync {
    fn read_u32_le(&self, gpa: u64, attrs: MemTxAttrs) -> Result<u32, MemTxError>;
    fn write_u32_le(&self, gpa: u64, value: u32, attrs: MemTxAttrs) -> Result<(), MemTxError>;
    fn read_u64_le(&self, gpa: u64, attrs: MemTxAttrs) -> Result<u64, MemTxError>;
    fn write_u64_le(&self, gpa: u64, value: u64, attrs: MemTxAttrs) -> Result<(), MemTxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn el3_space_downgrade() {
        let ns_el3 = DomainSet::NS_ONLY.with(Domain::El3);
        let attrs = MemTxAttrs::for_domain(Domain::El3, ns_el3);
        assert_eq!(attrs.space, Domain::Secure);
        assert!(attrs.secure);

        let with_realm = ns_el3.with(Domain::Realm);
        let attrs = MemTxAttrs::for_domain(Domain::El3, with_realm);
        assert_eq!(attrs.space, Domain::El3);
        assert!(attrs.secure);
    }

    #[test]
    fn space_follows_domain() {
        let all = DomainSet::NS_ONLY
            .with(Domain::Secure)
            .with(Domain::El3)
            .with(Domain::Realm);
        for (domain, secure) in [
            (Domain::Secure, true),
            (Domain::NonSecure, false),
            (Domain::Realm, false),
        ] {
            let attrs = MemTxAttrs::for_domain(domain, all);
            assert_eq!(attrs.space, domain);
            assert_eq!(attrs.secure, secure);
        }
    }
}
