//! Wait channels
use core::fmt;

/// An opaque identifier of a wait channel.
///
/// A channel is usually derived from the address of the object whose state
/// change the waiters are interested in (a semaphore, a buffer, a device
/// descriptor, ...). The engine never dereferences it; it only compares and
/// hashes it. Two different objects that are alive at the same time never
/// share a channel, but it's the caller's responsibility not to wait on a
/// channel whose object has been freed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(usize);

impl ChannelId {
    /// Get the channel identified by the address of `object`.
    #[inline]
    pub fn of<T: ?Sized>(object: &T) -> Self {
        Self(object as *const T as *const () as usize)
    }

    /// Construct a `ChannelId` from a raw value.
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Get the raw value of `self`.
    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ChannelId({:#x})", self.0)
    }
}
