//! Host-side contract: the acquisition descriptor, the allocator capability,
//! and buffers whose ownership transfers to the host.
//!
//! The host framework supplies memory-management callbacks at acquisition
//! time. Every buffer the adapter hands back is obtained through those
//! callbacks, never through a private allocator, so the host can release it
//! through the matching free callback. Optional lock/unlock hooks exist as
//! installable callbacks; the default is a no-op, and real serialization of
//! concurrent calls against one context remains the host's responsibility.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::Status;

/// Lowest interface version this adapter will negotiate.
pub const MINIMUM_SUPPORTED_VERSION: u32 = 4;
/// Highest interface version this adapter understands. Requests above this
/// are clamped down during acquisition.
pub const MAXIMUM_SUPPORTED_VERSION: u32 = 7;

/// Allocation callback: returns a zeroed buffer of exactly the requested
/// length, or `None` when the host is out of memory.
pub type AllocFn = Arc<dyn Fn(usize) -> Option<Vec<u8>> + Send + Sync>;
/// Reallocation callback: grows or shrinks a previously allocated buffer.
pub type ReallocFn = Arc<dyn Fn(Vec<u8>, usize) -> Option<Vec<u8>> + Send + Sync>;
/// Release callback for buffers the host hands back.
pub type FreeFn = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
/// Optional serialization hook invoked around each dispatched call.
pub type LockFn = Arc<dyn Fn() + Send + Sync>;

/// Callback table supplied by the host inside [`HostDescriptor`].
///
/// All three memory callbacks are mandatory; acquisition rejects a
/// descriptor that is missing any of them. The lock hooks are optional.
#[derive(Clone, Default)]
pub struct HostCallbacks {
    pub alloc: Option<AllocFn>,
    pub realloc: Option<ReallocFn>,
    pub free: Option<FreeFn>,
    pub lock: Option<LockFn>,
    pub unlock: Option<LockFn>,
}

impl HostCallbacks {
    /// Plain heap-backed callbacks, for hosts without a specialized pool.
    pub fn system() -> Self {
        HostCallbacks {
            alloc: Some(Arc::new(|len| Some(vec![0u8; len]))),
            realloc: Some(Arc::new(|mut buf, len| {
                buf.resize(len, 0);
                Some(buf)
            })),
            free: Some(Arc::new(drop)),
            lock: None,
            unlock: None,
        }
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("alloc", &self.alloc.is_some())
            .field("realloc", &self.realloc.is_some())
            .field("free", &self.free.is_some())
            .field("lock", &self.lock.is_some())
            .field("unlock", &self.unlock.is_some())
            .finish()
    }
}

/// Acquisition request from the host, validated by
/// [`acquire_context`](crate::context::acquire_context).
///
/// `requested_version` is the one field the adapter may rewrite: versions
/// above [`MAXIMUM_SUPPORTED_VERSION`] are clamped down on success, and the
/// field is left untouched when acquisition fails.
#[derive(Clone, Debug)]
pub struct HostDescriptor {
    /// Interface version the host asks for.
    pub requested_version: u32,
    /// Answer-to-reset (card identity) bytes; at least 4 are required.
    pub atr: Option<Vec<u8>>,
    /// Registered card name.
    pub card_name: Option<String>,
    /// Open card connection handle; zero is invalid.
    pub card_handle: u64,
    /// Transport context the card handle belongs to.
    pub transport_handle: u64,
    /// Memory and locking callbacks.
    pub callbacks: HostCallbacks,
}

impl HostDescriptor {
    /// Descriptor with the given identity and system callbacks, requesting
    /// the maximum version. Intended for tests and in-process hosts.
    pub fn new(card_name: &str, atr: &[u8], card_handle: u64) -> Self {
        HostDescriptor {
            requested_version: MAXIMUM_SUPPORTED_VERSION,
            atr: Some(atr.to_vec()),
            card_name: Some(card_name.to_owned()),
            card_handle,
            transport_handle: 1,
            callbacks: HostCallbacks::system(),
        }
    }
}

/// A buffer allocated through the host's callbacks.
///
/// Ownership transfers to the host when the adapter returns one; the host
/// releases it through [`HostAlloc::free`]. The adapter never frees a buffer
/// it has handed back.
pub struct HostBuf {
    bytes: Vec<u8>,
}

impl HostBuf {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Deref for HostBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for HostBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl fmt::Debug for HostBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostBuf({} bytes)", self.bytes.len())
    }
}

/// Validated allocator capability, extracted from [`HostCallbacks`] during
/// acquisition once all mandatory callbacks are known to be present.
#[derive(Clone)]
pub struct HostAlloc {
    alloc: AllocFn,
    realloc: ReallocFn,
    free: FreeFn,
    lock: Option<LockFn>,
    unlock: Option<LockFn>,
}

impl HostAlloc {
    /// `None` when any of the three mandatory callbacks is missing.
    pub fn from_callbacks(callbacks: &HostCallbacks) -> Option<Self> {
        Some(HostAlloc {
            alloc: callbacks.alloc.clone()?,
            realloc: callbacks.realloc.clone()?,
            free: callbacks.free.clone()?,
            lock: callbacks.lock.clone(),
            unlock: callbacks.unlock.clone(),
        })
    }

    /// Allocate a zeroed host buffer of exactly `len` bytes.
    pub fn alloc(&self, len: usize) -> Result<HostBuf, Status> {
        match (self.alloc)(len) {
            Some(bytes) if bytes.len() == len => Ok(HostBuf { bytes }),
            _ => Err(Status::NoMemory),
        }
    }

    /// Resize a host buffer through the host's realloc callback.
    pub fn realloc(&self, buf: HostBuf, len: usize) -> Result<HostBuf, Status> {
        match (self.realloc)(buf.into_bytes(), len) {
            Some(bytes) if bytes.len() == len => Ok(HostBuf { bytes }),
            _ => Err(Status::NoMemory),
        }
    }

    /// Release a buffer previously handed to the host.
    pub fn free(&self, buf: HostBuf) {
        (self.free)(buf.into_bytes());
    }

    /// Allocate a host buffer holding a copy of `content`.
    pub fn alloc_copy(&self, content: &[u8]) -> Result<HostBuf, Status> {
        let mut buf = self.alloc(content.len())?;
        buf.as_mut_slice().copy_from_slice(content);
        Ok(buf)
    }

    /// Run the host's lock hook, returning a guard that unlocks on drop.
    /// With no hooks installed this is a no-op.
    pub(crate) fn lock_guard(&self) -> LockGuard {
        if let Some(lock) = &self.lock {
            lock();
        }
        LockGuard {
            unlock: self.unlock.clone(),
        }
    }
}

impl fmt::Debug for HostAlloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAlloc")
            .field("lock_hooks", &self.lock.is_some())
            .finish()
    }
}

pub(crate) struct LockGuard {
    unlock: Option<LockFn>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(unlock) = &self.unlock {
            unlock();
        }
    }
}
