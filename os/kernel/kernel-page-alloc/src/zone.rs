//! Address-width zones.
//!
//! Zone `z >= 1` holds the frames whose number is `z + 1` bits wide, so
//! every zone is a power-of-two sized, naturally aligned band of frames and
//! a buddy block never straddles two zones. Zone [`MEMZONE_XEN`] is the
//! hypervisor heap, whatever the frame numbers.
//!
//! ```rust
//! # use kernel_page_alloc::zone::*;
//! # use kernel_frames::Mfn;
//! assert_eq!(frame_zone(Mfn::new(0x400), false), 10);
//! assert_eq!(frame_zone(Mfn::new(0x7ff), false), 10);
//! assert_eq!(frame_zone(Mfn::new(0x7ff), true), 0);
//! assert_eq!(bits_to_zone(32), 19);
//! assert_eq!(zone_width_bits(19), 32);
//! ```

use kernel_frames::{Mfn, PAGE_SHIFT};

use crate::config::{MEMZONE_XEN, NR_ZONES};

/// Highest zone whose frames all lie below `1 << bits` bytes.
#[must_use]
pub const fn bits_to_zone(bits: u32) -> usize {
    if bits < PAGE_SHIFT + 1 {
        0
    } else {
        (bits - PAGE_SHIFT - 1) as usize
    }
}

/// Zone of a single frame.
///
/// Frames 0 and 1 share zone 1 with frames 2 and 3 so that the bottom of
/// memory stays out of the hypervisor zone.
#[must_use]
pub const fn frame_zone(mfn: Mfn, xen_heap: bool) -> usize {
    if xen_heap {
        return MEMZONE_XEN;
    }
    let width = mfn.width();
    let zone = if width > 2 { (width - 1) as usize } else { 1 };
    debug_assert!(zone < NR_ZONES);
    zone
}

/// Physical address width covered by zones `0..=zone`.
#[must_use]
pub const fn zone_width_bits(zone: usize) -> u32 {
    zone as u32 + 1 + PAGE_SHIFT
}

/// Clamp a caller supplied upper zone into the table.
#[must_use]
pub const fn clamp_zone(zone: usize) -> usize {
    if zone >= NR_ZONES { NR_ZONES - 1 } else { zone }
}
