//! Utilities shared by the integration tests

/// Define a test running on its own port instance.
///
/// The body can refer to the traits type `SystemTraits` and to a fresh
/// `ENGINE: WaitEngine<SystemTraits>`. Each test gets its own CPU Lock and
/// virtual clock, so tests don't interfere with each other when run in
/// parallel.
macro_rules! port_test {
    ( $(#[$meta:meta])* fn $name:ident() $body:block ) => {
        mod $name {
            #[allow(unused_imports)]
            use super::*;

            genwait_port_std::use_port!(unsafe struct SystemTraits);

            static ENGINE: genwait::WaitEngine<SystemTraits> = genwait::WaitEngine::new();

            #[test]
            $(#[$meta])*
            fn run() {
                genwait_port_std::init_logger();
                ENGINE.init().unwrap();
                $body
            }
        }
    };
}

/// Leak `x` to get a `'static` reference.
pub fn leak<T>(x: T) -> &'static T {
    Box::leak(Box::new(x))
}
