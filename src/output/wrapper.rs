// src/output/wrapper.rs
//! Fixed front object with a host-rebindable target
//!
//! The guest's `System.print` resolves to an [`OutputWrapper`], which can
//! only print. The matching [`OutputBinding`] stays with the host and is the
//! only way to swap where that output goes.

use crate::output::PrintTarget;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

type Slot = Arc<RwLock<Arc<dyn PrintTarget>>>;

/// Guest-facing output front
pub struct OutputWrapper {
    target: Slot,
}

impl OutputWrapper {
    /// Create a front and the host's binding for it
    pub fn new(initial: Arc<dyn PrintTarget>) -> (OutputWrapper, OutputBinding) {
        let target: Slot = Arc::new(RwLock::new(initial));
        (
            OutputWrapper {
                target: Arc::clone(&target),
            },
            OutputBinding { target },
        )
    }

    fn current(&self) -> Arc<dyn PrintTarget> {
        Arc::clone(&self.target.read())
    }
}

impl PrintTarget for OutputWrapper {
    fn print(&self, text: &str) {
        self.current().print(text);
    }

    fn println(&self, text: &str) {
        self.current().println(text);
    }
}

/// Host-side handle that rebinds an [`OutputWrapper`]
#[derive(Clone)]
pub struct OutputBinding {
    target: Slot,
}

impl OutputBinding {
    /// Point the wrapper at `target`, returning the previous target
    pub fn rebind(&self, target: Arc<dyn PrintTarget>) -> Arc<dyn PrintTarget> {
        debug!("Rebinding actor output target");
        std::mem::replace(&mut *self.target.write(), target)
    }

    pub fn current(&self) -> Arc<dyn PrintTarget> {
        Arc::clone(&self.target.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::silencer::NullSink;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl PrintTarget for Recorder {
        fn print(&self, text: &str) {
            self.0.lock().push(text.to_string());
        }

        fn println(&self, text: &str) {
            self.0.lock().push(format!("{}\n", text));
        }
    }

    #[test]
    fn test_rebind_redirects_future_output() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let (front, binding) = OutputWrapper::new(first.clone());

        front.print("a");
        let previous = binding.rebind(second.clone());
        front.println("b");

        assert!(Arc::ptr_eq(
            &previous,
            &(first.clone() as Arc<dyn PrintTarget>)
        ));
        assert_eq!(*first.0.lock(), vec!["a".to_string()]);
        assert_eq!(*second.0.lock(), vec!["b\n".to_string()]);
    }

    #[test]
    fn test_bound_to_null_sink() {
        let (front, binding) = OutputWrapper::new(NullSink::shared());
        front.println("nobody hears this");

        let recorder = Arc::new(Recorder::default());
        binding.rebind(recorder.clone());
        front.print("now heard");
        assert_eq!(recorder.0.lock().len(), 1);
    }
}
