/// Call the specified closure, aborting if it unwinds.
///
/// Used around code that temporarily links stack-allocated objects into
/// global structures. Unwinding out of such a region would leave dangling
/// references behind.
#[inline]
pub fn abort_on_unwind<R>(f: impl FnOnce() -> R) -> R {
    /// The RAII guard type to cause a double panic on unwind.
    struct Guard;

    impl Drop for Guard {
        #[inline]
        fn drop(&mut self) {
            // Note: Panic strategies may be added in the future, so don't
            // change this to `cfg(panic = "unwind")`
            #[cfg(not(panic = "abort"))]
            panic!("unsafe to unwind while a wait object is linked");
        }
    }

    let guard = Guard;

    let ret = f();

    // Nullify the RAII guard if the call didn't cause unwinding
    core::mem::forget(guard);

    ret
}
