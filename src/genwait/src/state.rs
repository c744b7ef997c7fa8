use crate::{error::BadContextError, PortThreading};

/// If the current context is not waitable, return `Err(WrongContext)`.
///
/// A context is waitable if it's a thread context, i.e., it isn't an
/// interrupt handler and the port can name the thread running it.
pub(crate) fn expect_waitable_context<Traits: PortThreading>() -> Result<(), BadContextError> {
    if Traits::is_interrupt_context() || Traits::current_thread().is_none() {
        Err(BadContextError::WrongContext)
    } else {
        Ok(())
    }
}
