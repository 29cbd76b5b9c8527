/// Notifies the application that the map has new data to draw.
///
/// Maps in continuous mode call the messenger every time a resource is delivered, so the
/// application can schedule a redraw.
pub trait Messenger: Send + Sync {
    /// Requests redraw of the map.
    fn request_redraw(&self);
}

/// Messenger that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyMessenger;

impl Messenger for DummyMessenger {
    fn request_redraw(&self) {}
}
