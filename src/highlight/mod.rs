pub mod applier;
pub mod history;
pub mod palette;
pub mod registry;
pub mod serial;

pub use applier::{ApplyOutcome, apply};
pub use history::History;
pub use palette::{DEFAULT_COLOR, PALETTE, adaptive_color};
pub use registry::Registry;
pub use serial::{RESTORE_BATCH_SIZE, RestoreReport, restore, serialize};
