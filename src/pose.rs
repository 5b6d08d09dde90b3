//! Robot pose ingestion over UDP.
//!
//! The guide robot broadcasts its pose as small JSON datagrams. The sender
//! uses a `z` axis where the map uses `y`, so the field is renamed on the
//! way in. Malformed datagrams are logged and dropped; the listener never
//! dies because of a bad packet.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::error::Error;
use crate::map::Cell;

/// A robot pose in map cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    #[serde(rename = "z")]
    pub y: f64,
    pub theta: f64,
}

impl Default for Pose {
    /// Placeholder starting position near the store entrance.
    fn default() -> Self {
        Self {
            x: 2.0,
            y: 2.0,
            theta: 0.0,
        }
    }
}

impl Pose {
    /// The grid cell this pose falls into, as (row, col).
    pub fn cell(&self) -> Cell {
        (self.y.max(0.0) as usize, self.x.max(0.0) as usize)
    }
}

/// Decodes a single pose datagram.
pub fn decode(datagram: &[u8]) -> Result<Pose, Error> {
    let pose: Pose = serde_json::from_slice(datagram)?;
    if !(pose.x.is_finite() && pose.y.is_finite() && pose.theta.is_finite()) {
        return Err(Error::PoseNotFinite);
    }
    Ok(pose)
}

/// Binds the pose socket and publishes incoming poses on the watch
/// channel. Runs until the receiving side goes away.
pub async fn listen(bind: &str, tx: watch::Sender<Pose>) -> Result<()> {
    let socket = UdpSocket::bind(bind)
        .await
        .context(format!("Binding pose socket on {bind}"))?;
    info!("Listening for robot pose on {bind}");
    serve(socket, tx).await
}

/// Receive loop over an already bound socket.
pub async fn serve(socket: UdpSocket, tx: watch::Sender<Pose>) -> Result<()> {
    let mut buf = [0u8; 256];
    loop {
        let (len, peer) = socket
            .recv_from(&mut buf)
            .await
            .context("Receiving pose datagram")?;
        match decode(&buf[..len]) {
            Ok(pose) => {
                debug!("Pose from {peer}: {pose:?}");
                if tx.send(pose).is_err() {
                    info!("Pose receiver dropped, stopping listener");
                    return Ok(());
                }
            }
            Err(err) => warn!("Dropping pose datagram from {peer}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sender_payload() {
        let pose = decode(br#"{"x": 3.5, "z": 12.0, "theta": 1.57}"#).unwrap();
        assert_eq!(pose.x, 3.5);
        assert_eq!(pose.y, 12.0);
        assert_eq!(pose.theta, 1.57);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"x": 1.0}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        let result = decode(br#"{"x": 1.0, "z": null, "theta": 0.0}"#);
        assert!(result.is_err());
        // JSON has no literal NaN, but a huge exponent overflows to inf
        let result = decode(br#"{"x": 1e999, "z": 0.0, "theta": 0.0}"#);
        assert!(matches!(result, Err(Error::PoseNotFinite)));
    }

    #[test]
    fn test_pose_cell() {
        let pose = Pose {
            x: 4.7,
            y: 9.2,
            theta: 0.0,
        };
        assert_eq!(pose.cell(), (9, 4));

        let negative = Pose {
            x: -3.0,
            y: -1.0,
            theta: 0.0,
        };
        assert_eq!(negative.cell(), (0, 0));
    }

    #[tokio::test]
    async fn test_serve_publishes_latest_pose() {
        let (tx, mut rx) = watch::channel(Pose::default());
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(serve(listener, tx));

        // The listener socket is bound, so the datagram queues even if the
        // task has not polled yet
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(br#"{"x": 5.0, "z": 7.0, "theta": 0.5}"#, addr)
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), rx.changed())
            .await
            .expect("pose arrives")
            .unwrap();
        let pose = *rx.borrow();
        assert_eq!(pose.x, 5.0);
        assert_eq!(pose.y, 7.0);

        drop(rx);
        handle.abort();
    }
}
