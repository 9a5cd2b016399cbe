//! # cascade
//!
//! Scheduling core for adaptive grid searches run by a fleet of remote
//! workers.
//!
//! A [`Sequencer`] enumerates every combination of a set of [`ValueRange`]s.
//! The [`Scheduler`] hands those combinations to worker nodes, takes back
//! their results, re-queues what was abandoned and, once the grid is
//! exhausted, reclaims tasks from stalled nodes. When every task is done, the
//! [`Densifier`] keeps the best fraction of the results and the sequencer is
//! reloaded with a finer grid around each of them.
//!
//! Results are kept in a [`ResultStore`]: [`MemoryStore`] is always
//! available, [`SqliteStore`] comes with the `sqlite` feature.
//!
//! ## Features
//!
//! - `parking-lot`: use `parking_lot` for the [`SharedScheduler`] lock
//! - `sqlite`: enable [`SqliteStore`]
//! - `serde`: derive `Serialize`/`Deserialize` on values and status views
//! - `tracing`: emit spans and events through `tracing`

extern crate alloc;

mod densify;
mod error;
mod project;
mod range;
mod scheduler;
mod sequencer;
mod store;
mod time;
mod value;

pub use crate::densify::*;
pub use crate::error::*;
pub use crate::project::*;
pub use crate::range::*;
pub use crate::scheduler::*;
pub use crate::sequencer::*;
pub use crate::store::*;
pub use crate::time::*;
pub use crate::value::*;
