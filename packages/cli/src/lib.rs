// ABOUTME: Library side of the taskbox binary: logging setup, output formatting and progress display
// ABOUTME: Kept apart from the bin so formatting helpers are unit-testable

pub mod logging;
pub mod output;
pub mod progress;
