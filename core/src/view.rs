//! Terminal-view capability surface.
//!
//! Rendering technology is opaque to the core. Every renderer implements the
//! full method set; where a given renderer cannot support an operation it
//! inherits the no-op default rather than the core probing for the capability
//! at runtime.

use std::sync::Arc;

use tokio::sync::Mutex;

/// Write/scroll surface of one terminal widget.
///
/// Scroll positions are line numbers from the top of the scrollback;
/// `is_scrolled_to_bottom` decides whether new output should keep the view
/// anchored.
pub trait TerminalView: Send {
    fn write(&mut self, data: &str);
    fn clear(&mut self);
    fn focus(&mut self) {}
    fn set_input_disabled(&mut self, _disabled: bool) {}
    fn refresh_layout(&mut self) {}
    fn scroll_position(&mut self) -> i64 {
        0
    }
    fn scroll_to_line(&mut self, _line: i64) {}
    fn scroll_to_bottom(&mut self) {}
    fn is_scrolled_to_bottom(&mut self) -> bool {
        true
    }
}

/// Shared handle to a view. Ownership transitions (pane mount/unmount) swap
/// which component holds a clone; the registry keeps the canonical one.
pub type SharedView = Arc<Mutex<Box<dyn TerminalView>>>;

pub fn shared_view(view: impl TerminalView + 'static) -> SharedView {
    let boxed: Box<dyn TerminalView> = Box::new(view);
    Arc::new(Mutex::new(boxed))
}

/// Renderer that discards everything, for headless panes.
#[derive(Debug, Default)]
pub struct NullView;

impl TerminalView for NullView {
    fn write(&mut self, _data: &str) {}
    fn clear(&mut self) {}
}
