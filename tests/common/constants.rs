//! Shared constants for end-to-end tests
//!
//! When the test data changes, update only this file.

// ============================================================================
// BigQuery Fixture
// ============================================================================

/// Project served by the in-memory backend
pub const TEST_PROJECT: &str = "test-project";

/// Dataset holding the fixture tables
pub const TEST_DATASET: &str = "sales";

/// A table in the fixture dataset
pub const TEST_TABLE: &str = "orders";

/// A view in the fixture dataset
pub const TEST_VIEW: &str = "daily_totals";

// ============================================================================
// Authentication
// ============================================================================

/// API key accepted by servers spawned with auth enabled
pub const TEST_API_KEY: &str = "test-api-key-123";

/// HS256 secret accepted by servers spawned with auth enabled
pub const TEST_JWT_SECRET: &str = "test-jwt-secret";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Timeout for individual requests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
