/*!
 * Sharing Flags
 *
 * A sharing flag records whether one thread currently holds (or is trying
 * to take) a shared lock on one rarely-unique mutex. Flags live in
 * cache-line aligned blocks; a [`FlagSupplier`] decides how flags are
 * spread over blocks.
 *
 * # Suppliers
 *
 * - [`IsolatedFlags`]: one block per flag, so no two flags ever share a
 *   cache line
 * - [`PackedFlags`]: a thread's flags for different mutexes are packed
 *   into the same block, trading memory for locality of that thread's
 *   flags
 *
 * Flags are only written by their owning thread and read by writers
 * scanning the registry; a shared block is therefore only ever written by
 * one thread.
 */

use crate::core::limits::FLAGS_PER_BLOCK;
use std::array;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cache-line aligned block of sharing flags
#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
pub struct FlagBlock {
    flags: [AtomicBool; FLAGS_PER_BLOCK],
}

impl FlagBlock {
    /// Allocate a block with every flag clear
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: array::from_fn(|_| AtomicBool::new(false)),
        })
    }
}

impl fmt::Debug for FlagBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self
            .flags
            .iter()
            .filter(|flag| flag.load(Ordering::Relaxed))
            .count();
        f.debug_struct("FlagBlock").field("set", &set).finish()
    }
}

/// Handle to one flag inside a [`FlagBlock`]
///
/// All accesses are sequentially consistent: the shared fast path is a
/// flag store followed by a load of the mutex's `uniq` field, mirrored by
/// the writer's `uniq` store followed by a flag scan.
#[derive(Clone)]
pub struct SharingFlag {
    block: Arc<FlagBlock>,
    slot: usize,
}

impl SharingFlag {
    /// A flag with a block of its own
    pub fn isolated() -> Self {
        Self {
            block: FlagBlock::new(),
            slot: 0,
        }
    }

    /// A flag at `slot` of `block`, or `None` if the slot is out of range
    ///
    /// The caller is responsible for handing each slot out only once.
    pub fn in_block(block: Arc<FlagBlock>, slot: usize) -> Option<Self> {
        (slot < FLAGS_PER_BLOCK).then_some(Self { block, slot })
    }

    #[inline(always)]
    pub(crate) fn set(&self, value: bool) {
        self.block.flags[self.slot].store(value, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn is_set(&self) -> bool {
        self.block.flags[self.slot].load(Ordering::SeqCst)
    }

    /// Same block and slot
    #[inline]
    pub(crate) fn same_as(&self, other: &SharingFlag) -> bool {
        Arc::ptr_eq(&self.block, &other.block) && self.slot == other.slot
    }

    #[cfg(test)]
    pub(crate) fn shares_block_with(&self, other: &SharingFlag) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }
}

impl fmt::Debug for SharingFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharingFlag")
            .field("slot", &self.slot)
            .field("set", &self.is_set())
            .finish()
    }
}

/// Source of sharing flags for a rarely-unique mutex
///
/// Called once per (mutex, thread) pair, on the thread's first shared
/// acquisition of that mutex. The returned flag must be clear and must not
/// be handed out again while it is alive.
///
/// # Examples
///
/// A supplier packing each thread's flags two to a block:
///
/// ```
/// use shared_locks::{FlagBlock, FlagSupplier, RuSharedMutex, SharedMutexExt, SharingFlag};
/// use std::cell::RefCell;
/// use std::sync::Arc;
///
/// struct PairedFlags;
///
/// thread_local! {
///     static PAIR: RefCell<Option<Arc<FlagBlock>>> = RefCell::new(None);
/// }
///
/// impl FlagSupplier for PairedFlags {
///     fn allocate() -> SharingFlag {
///         PAIR.with(|pair| {
///             let mut pair = pair.borrow_mut();
///             match pair.take() {
///                 Some(block) => SharingFlag::in_block(block, 1),
///                 None => {
///                     let block = FlagBlock::new();
///                     *pair = Some(block.clone());
///                     SharingFlag::in_block(block, 0)
///                 }
///             }
///         })
///         .unwrap_or_else(SharingFlag::isolated)
///     }
/// }
///
/// let mutex = RuSharedMutex::<PairedFlags>::new();
/// drop(mutex.read());
/// let _w = mutex.write();
/// ```
pub trait FlagSupplier: 'static {
    /// Allocate a fresh flag for the calling thread
    fn allocate() -> SharingFlag;
}

/// Every flag on its own cache line
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolatedFlags;

impl FlagSupplier for IsolatedFlags {
    #[inline]
    fn allocate() -> SharingFlag {
        SharingFlag::isolated()
    }
}

/// A thread's flags packed into shared blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedFlags;

thread_local! {
    static PACKED_BLOCK: RefCell<(Arc<FlagBlock>, usize)> = RefCell::new((FlagBlock::new(), 0));
}

impl PackedFlags {
    fn allocate_in_thread_block(current: &mut (Arc<FlagBlock>, usize)) -> SharingFlag {
        if current.1 == FLAGS_PER_BLOCK {
            *current = (FlagBlock::new(), 0);
        }
        let slot = current.1;
        current.1 += 1;
        SharingFlag::in_block(current.0.clone(), slot).unwrap_or_else(SharingFlag::isolated)
    }
}

impl FlagSupplier for PackedFlags {
    fn allocate() -> SharingFlag {
        PACKED_BLOCK
            .try_with(|current| Self::allocate_in_thread_block(&mut current.borrow_mut()))
            .unwrap_or_else(|_| SharingFlag::isolated())
    }
}
