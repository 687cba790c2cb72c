/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Ids handed out by the buffer pool are non-negative;
/// `INVALID_PAGE_ID` marks an unassigned frame.
pub type PageId = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type, indexing into the frame array of one pool
/// instance.
pub type FrameId = usize;

/// Transaction ID type. Lower ids are older transactions.
pub type TxnId = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u32;

/// Row identifier: a page plus a slot within it. Used as the lock-table
/// key by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}
