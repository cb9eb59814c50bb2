use crate::error::{HeapError, Result};

/// Logical position of an item in the heap. Slot 0 is never used.
pub type Slot = u32;

/// Slot of the root item.
pub const ROOT: Slot = 1;

/// Returned by [`Layout::children`] when a child index would not fit in a [`Slot`].
pub const NO_SLOT: Slot = Slot::MAX;

/// Size of a VM page measured in heap slots, plus the mask and shift derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    size: u32,
    mask: u32,
    shift: u32,
}

impl PageGeometry {
    /// Smallest page that still has a bottom row distinct from its two entry slots.
    pub const MIN_SIZE: u32 = 4;

    pub fn new(page_size: u32) -> Result<Self> {
        if !page_size.is_power_of_two() {
            return Err(HeapError::InvalidConfig(format!(
                "page size {} is not a power of two",
                page_size
            )));
        }
        if page_size < Self::MIN_SIZE {
            return Err(HeapError::InvalidConfig(format!(
                "page size {} is below the minimum of {} slots",
                page_size,
                Self::MIN_SIZE
            )));
        }

        Ok(PageGeometry {
            size: page_size,
            mask: page_size - 1,
            shift: page_size.trailing_zeros(),
        })
    }

    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline(always)]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline(always)]
    pub fn shift(&self) -> u32 {
        self.shift
    }
}

/// Numbering of the implicit tree onto slots.
///
/// `Paged` keeps small subtrees inside one VM page, so a trickle through a large
/// heap touches about one page per `log2(page_size)` levels instead of one per level.
/// `Flat` is the textbook `2u` / `2u + 1` numbering.
///
/// Both numberings satisfy the same contract: children are always greater than
/// their parent, `parent` inverts `children`, and slots `1..=n` form a tree rooted
/// at [`ROOT`] for every `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Paged(PageGeometry),
    Flat,
}

impl Layout {
    pub fn paged(page_size: u32) -> Result<Self> {
        PageGeometry::new(page_size).map(Layout::Paged)
    }

    /// Returns the parent slot of `u`. `u` must be a non-root slot.
    #[inline]
    pub fn parent(&self, u: Slot) -> Slot {
        debug_assert!(u > ROOT, "slot {} has no parent", u);
        debug_assert!(u != NO_SLOT);

        match *self {
            Layout::Flat => u >> 1,
            Layout::Paged(page) => {
                let po = u & page.mask;

                if u < page.size || po > 3 {
                    // Plain halving inside the page
                    (u & !page.mask) | (po >> 1)
                } else if po < 2 {
                    // Entry slots of a page hang off the bottom row of an earlier page
                    let mut v = (u - page.size) >> page.shift;
                    v += v & !(page.mask >> 1);
                    v | (page.size >> 1)
                } else {
                    u - 2
                }
            }
        }
    }

    /// Returns the two child slots of `u`.
    ///
    /// Both values are equal when `u` has a single child. Either value may exceed
    /// the current heap length; callers treat those as absent. [`NO_SLOT`] is
    /// returned for children that cannot be represented.
    #[inline]
    pub fn children(&self, u: Slot) -> (Slot, Slot) {
        debug_assert!(u >= ROOT);

        match *self {
            Layout::Flat => sibling_pair(u.checked_mul(2)),
            Layout::Paged(page) => {
                if u > page.mask && (u & (page.mask - 1)) == 0 {
                    // Entry slots of every page but the first have one child
                    let only = u.saturating_add(2);
                    (only, only)
                } else if u & (page.size >> 1) != 0 {
                    // Bottom row: children open a fresh page
                    let page_idx = ((u & !page.mask) >> 1) | (u & (page.mask >> 1));
                    let first = (u64::from(page_idx) + 1) << page.shift;
                    sibling_pair(Slot::try_from(first).ok())
                } else {
                    sibling_pair(u.checked_add(u & page.mask))
                }
            }
        }
    }
}

/// Builds `(left, left + 1)`. A right child that would hit [`NO_SLOT`] is dropped,
/// leaving `left` as the only child.
#[inline(always)]
fn sibling_pair(left: Option<Slot>) -> (Slot, Slot) {
    match left {
        Some(left) if left < NO_SLOT - 1 => (left, left + 1),
        Some(left) if left == NO_SLOT - 1 => (left, left),
        _ => (NO_SLOT, NO_SLOT),
    }
}
