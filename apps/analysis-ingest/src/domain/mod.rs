//! Domain Layer - Ticks, signals and indicator math.
//!
//! Pure types with no I/O.

/// Per-minute tick aggregates.
pub mod bar;

/// Rolling price window and indicator snapshot.
pub mod indicators;

/// Trade signal schema.
pub mod signal;

/// Parsed ticker update.
pub mod tick;
