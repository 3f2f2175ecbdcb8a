//! Shared constants for end-to-end tests

// ============================================================================
// Test Deployment
// ============================================================================

/// Hostname test deployments are configured with. Not a production name.
pub const TEST_HOSTNAME: &str = "librarian.test";

/// A hostname matching the default production pattern
pub const PRODUCTION_HOSTNAME: &str = "launchpadlibrarian.net";

// ============================================================================
// Test Payloads
// ============================================================================

/// Payload with embedded NUL bytes
pub const NUL_PAYLOAD: &[u8] = b"librarian\0test\0\0payload";

/// Ten bytes, handy for range arithmetic
pub const DIGITS_PAYLOAD: &[u8] = b"0123456789";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for a server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for a server to be ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Socket timeout of the test upload servers (seconds)
pub const TEST_SOCKET_TIMEOUT_SECS: u64 = 2;
