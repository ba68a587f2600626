//! # Route configuration
//!
//! Parses the declarative route file into [`Route`](crate::proxy::Route)
//! records. The format is line-oriented with case-insensitive keywords:
//!
//! ```text
//! # Virtual hosts for the main site
//! route example.com www.example.com
//!     upstream localhost:8080
//!     provider acme
//!     header add x-clacks-overhead GNU Terry Pratchett
//!
//! route internal.example.net
//!     upstream localhost:8081
//!     provider selfsigned
//! ```
//!
//! Parsing only enforces the grammar; semantic checks (domain syntax,
//! duplicate domains, required upstream) happen when the routes are
//! installed into the proxy manager.

mod error;
mod parser;

pub use error::{ConfigError, ConfigResult};
pub use parser::{parse_file, parse_str};
