//! Test utilities for arena-based testing.
//!
//! Each test gets its own arena so dominator trees and other session
//! allocations are released when the test returns.

#[cfg(test)]
pub mod test {
    use super::super::session::CheckpointSession;
    use bumpalo::Bump;

    /// Test context that owns the arena for one test.
    pub struct TestContext {
        arena: Bump,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self { arena: Bump::new() }
        }

        /// Create a session using this context's arena.
        ///
        /// The returned session borrows from the TestContext, so the
        /// TestContext must outlive the session.
        pub fn create_session(&self) -> CheckpointSession<'_> {
            CheckpointSession::new(&self.arena)
        }

        pub fn memory_used(&self) -> usize {
            self.arena.allocated_bytes()
        }
    }

    impl Default for TestContext {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Run a test with a temporary arena context.
    pub fn with_test_context<F, R>(f: F) -> R
    where
        F: FnOnce(&TestContext) -> R,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let ctx = TestContext::new();
        f(&ctx)
    }
}
