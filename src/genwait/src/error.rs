//! Error codes
use core::fmt;

/// The reason a wait or a blocking operation failed.
///
/// Besides the codes generated by the engine and [`Semaphore`] themselves,
/// subsystems layered on top of the engine can wake waiters with any of
/// these codes by [`WaitEngine::wake_one_err`] and its siblings.
///
/// [`Semaphore`]: crate::Semaphore
/// [`WaitEngine::wake_one_err`]: crate::WaitEngine::wake_one_err
#[repr(i8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A parameter is invalid, or the target object is not initialized.
    InvalidArgument = -1,
    /// The operation isn't allowed in the current context. A blocking
    /// operation was attempted from an interrupt context, or CPU Lock was
    /// already active.
    WrongContext = -2,
    /// The wait's deadline elapsed before it was woken up.
    TimedOut = -3,
    /// A non-blocking operation couldn't complete immediately.
    WouldBlock = -4,
    /// The object being waited on was destroyed.
    Unrecoverable = -5,
    /// The wait was cancelled by another context.
    Interrupted = -6,
    /// The owner of the object being waited on terminated without releasing
    /// it.
    Abandoned = -7,
}

impl ErrorKind {
    /// Get the numeric code of `self`.
    #[inline]
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Get a short description of `self`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::WrongContext => "operation not permitted in the current context",
            Self::TimedOut => "timed out",
            Self::WouldBlock => "operation would block",
            Self::Unrecoverable => "object destroyed while waiting",
            Self::Interrupted => "wait interrupted",
            Self::Abandoned => "owner terminated without release",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ErrorKind::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Debug::fmt(&ErrorKind::from(*self), f)
            }
        }

        impl fmt::Display for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&ErrorKind::from(*self), f)
            }
        }

        impl From<$Name> for ErrorKind {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }
    };
}

define_suberror! {
    /// `WrongContext`. Returned by operations that need to enter CPU Lock when
    /// CPU Lock is already active.
    pub enum BadContextError {
        WrongContext,
    }
}

define_suberror! {
    /// Error type for [`Semaphore::init`](crate::Semaphore::init).
    pub enum InitSemaphoreError {
        WrongContext,
        InvalidArgument,
    }
}

define_suberror! {
    /// Error type for [`Semaphore::signal`](crate::Semaphore::signal).
    pub enum SignalSemaphoreError {
        WrongContext,
        InvalidArgument,
    }
}

define_suberror! {
    /// Error type for [`Semaphore::try_wait`](crate::Semaphore::try_wait).
    pub enum PollSemaphoreError {
        WrongContext,
        InvalidArgument,
        WouldBlock,
    }
}

impl From<BadContextError> for InitSemaphoreError {
    #[inline]
    fn from(_: BadContextError) -> Self {
        Self::WrongContext
    }
}

impl From<BadContextError> for SignalSemaphoreError {
    #[inline]
    fn from(_: BadContextError) -> Self {
        Self::WrongContext
    }
}

impl From<BadContextError> for PollSemaphoreError {
    #[inline]
    fn from(_: BadContextError) -> Self {
        Self::WrongContext
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suberror_codes_match() {
        assert_eq!(
            PollSemaphoreError::WouldBlock as i8,
            ErrorKind::WouldBlock.code()
        );
        assert_eq!(
            ErrorKind::from(InitSemaphoreError::InvalidArgument),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            ErrorKind::from(BadContextError::WrongContext),
            ErrorKind::WrongContext
        );
    }

    #[test]
    fn suberror_debug_delegates() {
        assert_eq!(
            format!("{:?}", SignalSemaphoreError::InvalidArgument),
            "InvalidArgument"
        );
        assert_eq!(format!("{}", ErrorKind::TimedOut), "timed out");
    }
}
