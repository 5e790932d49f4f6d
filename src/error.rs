/// Enum representing errors that can happen in hubtun's client and relay
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("TUN device error: {0}")]
    Tun(#[from] tun::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MTU {0} exceeds the largest supported packet of {max} bytes", max = crate::client::device::MAX_MTU)]
    MtuTooLarge(u16),

    /// Every pump of a client has stopped.
    #[error("all tunnel pumps stopped")]
    Died,
}
