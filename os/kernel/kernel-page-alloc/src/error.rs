use kernel_frames::Mfn;

use crate::owner::OwnerId;

/// Reasons a heap allocation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("order {0} exceeds the largest block order")]
    OrderTooLarge(u32),
    #[error("zone range {lo}..={hi} is empty or out of bounds")]
    BadZoneRange { lo: usize, hi: usize },
    #[error("no free block of order {order} in zones {lo}..={hi}")]
    Exhausted { order: u32, lo: usize, hi: usize },
    #[error("allocated block could not be given to its owner")]
    Assign(#[from] AssignError),
}

/// Reasons a block cannot be handed to an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AssignError {
    #[error("owner {0:?} is being torn down")]
    OwnerDying(OwnerId),
    #[error("owner {owner:?} would hold {wanted} pages, limit is {limit}")]
    QuotaExceeded { owner: OwnerId, wanted: u64, limit: u64 },
}

/// Frame-addressed operations on a frame the machine does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("{0} lies beyond the frame table")]
    OutOfRange(Mfn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BadPageParseError {
    #[error("invalid frame number in entry at byte {offset}")]
    InvalidNumber { offset: usize },
}
