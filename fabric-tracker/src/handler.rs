//! The tracker handler contract (spec §6, §4.E Startup).
//!
//! `init` is called once when a shard starts, producing the user state
//! threaded through every subsequent `handle_diff` call. Both are plain
//! functions rather than a stateful object with interior mutability,
//! matching the source's `{init(state) -> user_state, handle_diff(diff,
//! user_state) -> user_state}` contract directly.

use crate::wire::DiffMap;

/// Implemented by the application embedding a tracker shard.
pub trait TrackerHandler: Send + Sync + 'static {
    /// The arbitrary payload attached to tracked entries.
    type Meta: Send + Sync + 'static;
    /// User state threaded through every `handle_diff` call.
    type State: Send + 'static;

    /// Produces the initial state for a freshly started shard.
    fn init(&self) -> Self::State;

    /// Called whenever a merge (heartbeat or transfer) or a permdown purge
    /// produces a non-empty diff for at least one topic. Not called for
    /// empty diffs.
    fn handle_diff(&self, diff: &DiffMap<Self::Meta>, state: Self::State) -> Self::State;
}

/// A handler that does nothing with diffs besides returning `()` state,
/// useful for presence tracking that is only ever observed through
/// `list`/`get_by_key` polling rather than push notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler<Meta>(std::marker::PhantomData<fn() -> Meta>);

impl<Meta: Send + Sync + 'static> TrackerHandler for NoopHandler<Meta> {
    type Meta = Meta;
    type State = ();

    fn init(&self) {}

    fn handle_diff(&self, _diff: &DiffMap<Meta>, _state: ()) {}
}
