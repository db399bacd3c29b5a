//! Compile-time geometry and boot-time configuration of the page heap.

use alloc::vec::Vec;
use core::str::FromStr;

use kernel_frames::{Mfn, NodeId, PAGE_SHIFT};

use crate::error::BadPageParseError;

/// Largest block order managed by the heap; blocks span up to `2^MAX_ORDER` frames.
pub const MAX_ORDER: u32 = 20;

/// Physical address width supported by the frame table.
pub const PADDR_BITS: u32 = 52;

/// One zone per significant bit of a frame number.
pub const NR_ZONES: usize = (PADDR_BITS - PAGE_SHIFT) as usize;

/// Zone reserved for the hypervisor's own heap.
pub const MEMZONE_XEN: usize = 0;

pub const MAX_NUMNODES: usize = NodeId::MAX;

/// Address width assumed when a caller places no restriction.
pub const UNRESTRICTED_BITS: u32 = u64::BITS + PAGE_SHIFT;

/// Upper bound for the automatically derived DMA width.
pub const DEFAULT_DMA_BITS_CAP: u32 = 32;

const _: () = {
    assert!(MAX_ORDER < u8::MAX as u32);
    assert!(NR_ZONES > 1);
    assert!(NR_ZONES <= u8::MAX as usize);
    assert!(MAX_NUMNODES <= u64::BITS as usize);
    // Zone selection for unrestricted requests must saturate at the top zone.
    assert!(UNRESTRICTED_BITS - PAGE_SHIFT - 1 >= NR_ZONES as u32 - 1);
};

/// Knobs read from the boot command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Width in bits of the DMA-capable region. Derived from node 0 when absent.
    pub dma_bits: Option<u32>,
    /// Zero every free frame once the heap is up.
    pub bootscrub: bool,
    /// Frames that must never reach the heap.
    pub badpages: BadPages,
}

impl HeapConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            dma_bits: None,
            bootscrub: true,
            badpages: BadPages::default(),
        }
    }

    #[must_use]
    pub const fn with_dma_bits(mut self, bits: u32) -> Self {
        self.dma_bits = Some(bits);
        self
    }

    #[must_use]
    pub const fn with_bootscrub(mut self, enabled: bool) -> Self {
        self.bootscrub = enabled;
        self
    }

    #[must_use]
    pub fn with_badpages(mut self, badpages: BadPages) -> Self {
        self.badpages = badpages;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Inclusive range of bad frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadRange {
    pub first: Mfn,
    pub last: Mfn,
}

impl BadRange {
    #[must_use]
    pub const fn contains(&self, mfn: Mfn) -> bool {
        mfn.as_u64() >= self.first.as_u64() && mfn.as_u64() <= self.last.as_u64()
    }
}

/// A parsed `badpage=` list.
///
/// Entries are frame numbers or inclusive `first-last` ranges separated by
/// commas. Numbers take C-style prefixes: `0x` for hex, a leading `0` for
/// octal, decimal otherwise.
///
/// ```rust
/// # use kernel_page_alloc::BadPages;
/// # use kernel_frames::Mfn;
/// let bad: BadPages = "0x3f45,0x8a321-0x8a330".parse().unwrap();
/// assert_eq!(bad.ranges().len(), 2);
/// assert!(bad.contains(Mfn::new(0x8a325)));
/// assert!(!bad.contains(Mfn::new(0x3f46)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadPages(Vec<BadRange>);

impl BadPages {
    #[must_use]
    pub fn ranges(&self) -> &[BadRange] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, mfn: Mfn) -> bool {
        self.0.iter().any(|r| r.contains(mfn))
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for BadPages {
    type Err = BadPageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();
        let mut offset = 0;
        for entry in s.split(',') {
            let trimmed = entry.trim();
            if !trimmed.is_empty() {
                ranges.push(parse_range(trimmed, offset)?);
            }
            offset += entry.len() + 1;
        }
        Ok(Self(ranges))
    }
}

fn parse_range(entry: &str, offset: usize) -> Result<BadRange, BadPageParseError> {
    let (first, last) = match entry.split_once('-') {
        Some((a, b)) => (a.trim(), Some(b.trim())),
        None => (entry, None),
    };
    let first = parse_frame(first, offset)?;
    let last = match last {
        Some(text) => parse_frame(text, offset)?,
        None => first,
    };
    // A reversed range collapses to its first frame.
    Ok(BadRange {
        first: Mfn::new(first),
        last: Mfn::new(last.max(first)),
    })
}

fn parse_frame(text: &str, offset: usize) -> Result<u64, BadPageParseError> {
    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|_| BadPageParseError::InvalidNumber { offset })
}
