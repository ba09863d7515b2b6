//! Thread-bound "current context" for code that cannot take a context
//! parameter, such as helpers called from inside a test body.
//!
//! The lifecycle itself passes contexts explicitly. It only publishes the
//! active stack here around fulfiller calls and test bodies, and checks that
//! the slot is empty before and drained after every test.

use std::cell::RefCell;

use crate::context::{ContextStack, TestContext};
use crate::error::{Result, TestbedError};

thread_local! {
    static CURRENT: RefCell<Vec<TestContext>> = const { RefCell::new(Vec::new()) };
}

/// Fails when a context is already published on this thread.
pub fn assert_not_set() -> Result<()> {
    CURRENT.with(|current| {
        if current.borrow().is_empty() {
            Ok(())
        } else {
            Err(TestbedError::ContextAlreadySet)
        }
    })
}

/// Publish every scope of `stack`, base first.
pub fn push_all(stack: &ContextStack) {
    CURRENT.with(|current| current.borrow_mut().extend(stack.iter().cloned()));
}

/// Remove every published scope. Fails when nothing was published.
pub fn pop_all() -> Result<()> {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        if current.is_empty() {
            return Err(TestbedError::ContextNotSet);
        }
        current.clear();
        Ok(())
    })
}

/// The innermost published scope.
pub fn current() -> Result<TestContext> {
    current_if_set().ok_or(TestbedError::ContextNotSet)
}

pub fn current_if_set() -> Option<TestContext> {
    CURRENT.with(|current| current.borrow().last().cloned())
}

struct Published;

impl Drop for Published {
    fn drop(&mut self) {
        CURRENT.with(|current| {
            current.borrow_mut().pop();
        });
    }
}

/// Run `f` with `context` published as the current scope. The previous
/// scope is restored afterwards, also when `f` panics.
pub fn run_with<R>(context: &TestContext, f: impl FnOnce() -> R) -> R {
    CURRENT.with(|current| current.borrow_mut().push(context.clone()));
    let _published = Published;
    f()
}
