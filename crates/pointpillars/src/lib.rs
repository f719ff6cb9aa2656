//! PointPillars detection loss tooling.
//!
//! Re-exports the loss crate and adds backend selection plus a synthetic probe
//! used by the `pointpillars` command-line tool.

pub mod backend;
pub mod probe;

#[doc(inline)]
pub use backend::{create_device, SelectedBackend, SelectedDevice, NAME};
#[doc(inline)]
pub use pointpillars_loss as loss;
