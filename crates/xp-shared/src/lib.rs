//! # xp-shared
//!
//! Zero-copy sharing of large, read-only datasets between sweep workers.
//!
//! A [`SharedArena`] publishes each buffer of a [`Dataset`](xp_types::Dataset)
//! into its own named segment and hands back lightweight handles. Any worker,
//! in this process or another one pointed at the same segment directory, can
//! attach a handle and read the data through a memory map without copying.
//! Segments are unlinked when the [`ReleaseToken`] returned by `publish` is
//! released or dropped.

mod arena;
mod view;

pub use arena::{default_segment_root, ReleaseToken, SharedArena, SEGMENT_PREFIX};
pub use view::{BufferView, DatasetView};
