//! Fixed test ids for deterministic tests.

// Principals
pub const TEST_PRINCIPAL_ALICE: &str = "alice";
pub const TEST_PRINCIPAL_BOB: &str = "bob";

// Pre-shared tokens accepted by the harness token handler
pub const TEST_TOKEN_ALICE: &str = "alice-test-token-do-not-use-in-production";
pub const TEST_TOKEN_BOB: &str = "bob-test-token-do-not-use-in-production";

// Password accepted by the harness accept-users handler (user: alice)
pub const TEST_PASSWORD_ALICE: &str = "alice-test-password";

// Services
pub const TEST_SERVICE_APP: &str = "https://app.example.org";
pub const TEST_SERVICE_OTHER: &str = "https://other.example.org";
pub const TEST_SERVICE_PROXY_CALLBACK: &str = "https://proxy.example.org/callback";
pub const TEST_SERVICE_BACKEND: &str = "https://backend.example.org/api";

// Ticket id generation
pub const TEST_HOST_NAME: &str = "cas-test";
pub const TEST_MISSING_TGT_ID: &str = "TGT-999-0000-cas-test";
pub const TEST_MISSING_ST_ID: &str = "ST-999-0000-cas-test";
