//! Mock API Server
//!
//! The request-resolution core of a configuration-driven HTTP mock server.
//! Given an inbound request and a YAML configuration, it decides which
//! canned response to send back.
//!
//! # Features
//!
//! - **Selectors**: Pull values from the JSON body, headers, query or path
//! - **Rules**: Exact, prefix, suffix, contains, regex and numeric range
//!   conditions combined with AND/OR logic and nested groups
//! - **Scenarios**: Per-client step tracking so an endpoint can answer
//!   differently across successive calls
//! - **Responses**: Inline bodies, files, or weighted random files
//! - **Templates**: Simple `{{.name}}` substitution or Handlebars with helpers
//!
//! # Example Configuration
//!
//! ```yaml
//! endpoints:
//!   - path: /api/checkout
//!     method: POST
//!     scenario: checkout_flow
//!     scenario_key: session_id
//!     selectors:
//!       - name: session_id
//!         type: header
//!         key: X-Session-ID
//!     rules:
//!       - scenario_step: idle
//!         next_step: initiated
//!         response:
//!           body: '{"checkout":"initiated"}'
//!     default:
//!       body: '{"checkout":"unknown"}'
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod random;
pub mod request;
pub mod response;
pub mod router;
pub mod scenario;
pub mod server;
pub mod template;

pub use config::MockServerConfig;
pub use error::MockError;
pub use request::MockRequest;
pub use scenario::ScenarioStore;
pub use server::{MatchedRule, MockResponse, MockServer, Resolution};
