pub mod collecting;

pub use collecting::CollectingSink;

/// Receives lines printed by student code, in order.
///
/// The sandbox pushes captured output into a sink supplied by the caller
/// instead of touching any global logger, so every grading call owns its
/// own buffer.
pub trait OutputSink: Send {
    fn line(&mut self, line: String);
}
