pub mod config;
pub mod error;
pub mod expiry;
pub mod heap;
pub mod layout;
pub mod row_store;

pub use config::{HeapConfig, LayoutKind};
pub use error::{HeapError, Result};
pub use expiry::{ExpiryQueue, TimerId};
pub use heap::{BinHeap, FnDelegate, HeapDelegate};
pub use layout::{Layout, NO_SLOT, PageGeometry, ROOT, Slot};
