//! Window registry: native window handle → host window object.
//!
//! Native callbacks only carry a handle; the registry is how an event gets
//! back its [`Window`]. Entries are added at creation and removed only by
//! [`Window::destroy`].

use dashmap::DashMap;

use crate::native::WindowHandle;
use crate::window::Window;

#[derive(Default)]
pub struct WindowRegistry {
    windows: DashMap<WindowHandle, Window>,
}

impl WindowRegistry {
    pub fn insert(&self, window: Window) {
        let handle = window.handle();
        if self.windows.insert(handle, window).is_some() {
            tracing::error!(window = %handle, "native runtime reissued a live window handle");
        }
    }

    pub fn get(&self, handle: WindowHandle) -> Option<Window> {
        self.windows.get(&handle).map(|w| w.value().clone())
    }

    pub fn remove(&self, handle: WindowHandle) -> Option<Window> {
        self.windows.remove(&handle).map(|(_, w)| w)
    }

    pub fn windows(&self) -> Vec<Window> {
        self.windows.iter().map(|w| w.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::core::Bridge;
    use crate::native::WindowHandle;
    use crate::testing::MockRuntime;

    #[tokio::test]
    async fn lookup_and_removal() {
        let bridge = Bridge::start(Arc::new(MockRuntime::new())).unwrap();
        let registry = &bridge.shared.windows;
        assert!(registry.is_empty());

        let window = bridge.new_window();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(window.handle()).unwrap().handle(), window.handle());
        assert!(registry.get(WindowHandle(999)).is_none());

        window.destroy();
        assert!(registry.get(window.handle()).is_none());
        assert!(registry.remove(window.handle()).is_none());
    }
}
