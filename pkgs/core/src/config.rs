use nonzero_ext::nonzero;
use std::num::NonZeroUsize;

use crate::{
    error::{HeapError, Result},
    layout::{Layout, PageGeometry},
};

/// Default row width is 64k slots: on a busy server rows are added seconds apart,
/// and at most two rows (1 MiB of pointers) sit unused.
pub const DEFAULT_ROW_SHIFT: u32 = 16;

/// Directory entries reserved up front.
pub const DEFAULT_INITIAL_ROWS: NonZeroUsize = nonzero!(16usize);

const FALLBACK_PAGE_BYTES: usize = 4096;

/// Which slot numbering the heap uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutKind {
    #[default]
    Paged,
    Flat,
}

/// Construction-time parameters of a [`BinHeap`](crate::BinHeap).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Row width as a power of two.
    pub row_shift: u32,
    /// VM page size measured in slots.
    pub page_size: u32,
    /// Initial number of row directory entries.
    pub initial_rows: NonZeroUsize,
    pub layout: LayoutKind,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            row_shift: DEFAULT_ROW_SHIFT,
            page_size: host_page_slots().min(1 << DEFAULT_ROW_SHIFT),
            initial_rows: DEFAULT_INITIAL_ROWS,
            layout: LayoutKind::Paged,
        }
    }
}

impl HeapConfig {
    pub fn with_row_shift(mut self, row_shift: u32) -> Self {
        self.row_shift = row_shift;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_initial_rows(mut self, initial_rows: NonZeroUsize) -> Self {
        self.initial_rows = initial_rows;
        self
    }

    pub fn with_layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Number of slots per row.
    pub fn row_width(&self) -> usize {
        1 << self.row_shift
    }

    /// Checks all constraints and builds the slot numbering.
    pub fn validate(&self) -> Result<Layout> {
        if !(2..=31).contains(&self.row_shift) {
            return Err(HeapError::InvalidConfig(format!(
                "row shift {} is outside 2..=31",
                self.row_shift
            )));
        }

        let page = PageGeometry::new(self.page_size)?;
        if page.size() as usize > self.row_width() {
            return Err(HeapError::InvalidConfig(format!(
                "page size {} exceeds the row width {}",
                page.size(),
                self.row_width()
            )));
        }

        Ok(match self.layout {
            LayoutKind::Paged => Layout::Paged(page),
            LayoutKind::Flat => Layout::Flat,
        })
    }
}

/// Host VM page size in bytes.
pub fn host_page_bytes() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let bytes = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if bytes > 0 {
            return bytes as usize;
        }
    }
    FALLBACK_PAGE_BYTES
}

/// Host VM page size measured in pointer-sized slots.
pub fn host_page_slots() -> u32 {
    let slots = host_page_bytes() / std::mem::size_of::<usize>();
    u32::try_from(slots)
        .ok()
        .filter(|s| s.is_power_of_two() && *s >= PageGeometry::MIN_SIZE)
        .unwrap_or((FALLBACK_PAGE_BYTES / std::mem::size_of::<usize>()) as u32)
}
