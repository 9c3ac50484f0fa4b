//! Testing utilities for statetree
//!
//! * [`ClientMirror`] replays encoded change records like a client would, and
//!   [`project`] computes what that client should end up with.
//! * [`SyncHarness`] pairs a tree with a mirror across commits.
//! * [`RecordingVisitor`] keeps every change a commit delivers.
//! * [`strategies`] generates random edits for property tests.

mod harness;
pub mod mirror;
mod recording;
pub mod strategies;

pub use harness::SyncHarness;
pub use mirror::{project, ClientMirror, ClientNode, ClientSlot, ClientTree, MirrorError, ROOT_ID};
pub use recording::{RecordingVisitor, Visit};

pub mod prelude {
    pub use crate::mirror::{project, ClientMirror, ClientSlot, ClientTree};
    pub use crate::strategies::{arb_history, arb_op, arb_transaction, OpValue, TreeOp, TreePool};
    pub use crate::{RecordingVisitor, SyncHarness};
}
