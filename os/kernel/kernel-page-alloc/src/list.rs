//! Intrusive doubly linked lists of frames.
//!
//! Links live in one arena indexed by frame number, so a frame can sit on at
//! most one list at a time and unlinking is O(1).

use alloc::boxed::Box;
use alloc::vec::Vec;

use kernel_frames::Mfn;

/// Link cell of one frame.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Link {
    prev: Option<Mfn>,
    next: Option<Mfn>,
    linked: bool,
    /// Order of the free block headed by this frame.
    pub(crate) order: Option<u8>,
}

pub(crate) struct LinkArena(Box<[Link]>);

impl LinkArena {
    pub(crate) fn new(frames: u64) -> Self {
        let len = usize::try_from(frames).unwrap_or(usize::MAX);
        let links: Vec<Link> = alloc::vec![Link::default(); len];
        Self(links.into_boxed_slice())
    }

    pub(crate) fn get(&self, mfn: Mfn) -> Option<&Link> {
        self.0.get(mfn.index())
    }

    pub(crate) fn at(&mut self, mfn: Mfn) -> &mut Link {
        &mut self.0[mfn.index()]
    }
}

/// A list head. Copyable only so arrays of empty lists can be built.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PageList {
    head: Option<Mfn>,
    tail: Option<Mfn>,
    len: u64,
}

impl PageList {
    pub(crate) const EMPTY: Self = Self {
        head: None,
        tail: None,
        len: 0,
    };

    pub(crate) const fn len(&self) -> u64 {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_tail(&mut self, links: &mut LinkArena, mfn: Mfn) {
        let link = links.at(mfn);
        assert!(!link.linked, "{mfn} is already on a list");
        link.linked = true;
        link.prev = self.tail;
        link.next = None;
        match self.tail {
            Some(tail) => links.at(tail).next = Some(mfn),
            None => self.head = Some(mfn),
        }
        self.tail = Some(mfn);
        self.len += 1;
    }

    pub(crate) fn pop_head(&mut self, links: &mut LinkArena) -> Option<Mfn> {
        let head = self.head?;
        self.unlink(links, head);
        Some(head)
    }

    /// Unlink `mfn`, which must be on this list.
    pub(crate) fn unlink(&mut self, links: &mut LinkArena, mfn: Mfn) {
        let Link {
            prev, next, linked, ..
        } = *links.at(mfn);
        assert!(linked, "{mfn} is not on a list");
        match prev {
            Some(prev) => links.at(prev).next = next,
            None => {
                debug_assert_eq!(self.head, Some(mfn));
                self.head = next;
            }
        }
        match next {
            Some(next) => links.at(next).prev = prev,
            None => {
                debug_assert_eq!(self.tail, Some(mfn));
                self.tail = prev;
            }
        }
        let link = links.at(mfn);
        link.prev = None;
        link.next = None;
        link.linked = false;
        self.len -= 1;
    }

    pub(crate) fn iter<'a>(&self, links: &'a LinkArena) -> impl Iterator<Item = Mfn> + use<'a> {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let current = cursor?;
            cursor = links.get(current).and_then(|l| l.next);
            Some(current)
        })
    }
}
