use bitfield_struct::bitfield;

use crate::owner::OwnerId;

/// Outcome of an offline, online or query request on a single frame.
///
/// The low half holds flags, the high half the owner the flags refer to
/// when one is reported.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageStatus {
    /// The frame is withheld from allocation.
    pub offlined: bool,
    /// The frame is in use; it will be withheld once freed.
    pub pending: bool,
    /// The request could not be carried out.
    pub failed: bool,
    /// The frame was returned to service.
    pub onlined: bool,
    pub broken: bool,
    /// The frame is held by the owner in [`owner`](Self::owner).
    pub owned: bool,
    /// The frame belongs to the hypervisor.
    pub xen_page: bool,
    /// In use by nobody the allocator can name.
    pub anonymous: bool,
    /// Not conventional RAM.
    pub not_ram: bool,
    #[bits(7)]
    __: u8,
    #[bits(16)]
    owner_raw: u16,
}

impl PageStatus {
    #[must_use]
    pub const fn with_owner(self, owner: OwnerId) -> Self {
        self.with_owner_raw(owner.as_u16())
    }

    /// The owner reported alongside the flags, if any.
    #[must_use]
    pub const fn owner(self) -> Option<OwnerId> {
        if self.owned() || self.xen_page() || self.anonymous() {
            Some(OwnerId::new(self.owner_raw()))
        } else {
            None
        }
    }
}
