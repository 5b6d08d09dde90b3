//! Error types for the CaddyMate kiosk.
//!
//! Domain failures carry a dedicated variant so callers can react to them
//! (an unknown aisle is not the same as a broken database). Application
//! level code wraps these with `anyhow` context.

use thiserror::Error;

/// Custom error type for the CaddyMate kiosk.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested aisle does not exist on the generated map
    #[error("Unknown aisle {0}")]
    UnknownAisle(u32),

    /// The map has no walkable path from the current position to the aisle
    #[error("No route to aisle {0}")]
    NoRoute(u32),

    /// A pose datagram could not be decoded
    #[error("Invalid pose datagram: {0}")]
    PoseDecode(#[from] serde_json::Error),

    /// A pose datagram decoded but carried NaN or infinite values
    #[error("Pose contains non-finite values")]
    PoseNotFinite,

    /// The voice activity model failed to load or to score a frame
    #[error("Voice activity model error: {0}")]
    Vad(#[from] ort::Error),
}
