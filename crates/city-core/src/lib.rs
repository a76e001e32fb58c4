//! Pure resolution core: period clock, grid scans, and the end-of-day engine.

pub mod clock;
pub mod grid;
pub mod resolve;

pub use clock::{current_period_id, current_period_id_at, period_is_due, period_is_due_at, ResetTime};
pub use grid::{occupied_tiles, open_tiles};
pub use resolve::{destroy_weight, resolve_day, weighted_sample_without_replacement};
