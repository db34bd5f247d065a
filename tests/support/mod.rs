pub mod mock_transport;

use visavis::PeerName;

/// Shorthand for test peer names
pub fn name(s: &str) -> PeerName {
    PeerName::parse(s).unwrap()
}

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}
