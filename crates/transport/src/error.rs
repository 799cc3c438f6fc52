use shoal_multiaddr::Multiaddr;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No registered transport matched the address.
    #[error("no transport for {0}")]
    NoTransport(Multiaddr),
    /// The matched transport cannot express this address.
    #[error("address not dialable by transport: {0}")]
    UnsupportedAddr(Multiaddr),
    #[error("connect timed out")]
    Timeout,
    #[error("listener closed")]
    ListenerClosed,
    #[error("connection reset by remote")]
    Reset,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
