//! Best-effort structured JSON extraction from raw subprocess/backend text.
//!
//! Kept from the teacher's larger parser toolkit, trimmed to the one
//! strategy pipeline this proxy actually calls:
//! [`backend::pi::PiBackend`](crate::backend::pi::PiBackend) reads
//! line-delimited JSON from a Pi CLI child process, which — unlike an HTTP
//! API — can wrap a line in stray prose or hand back JSON truncated
//! mid-stream. [`parse_json_value`] falls back to markdown-fence
//! extraction, bracket matching, and repair/auto-completion before giving
//! up, rather than failing the whole request on a single malformed line.
//!
//! | Parser | Use Case |
//! |--------|----------|
//! | [`parse_json`] | Extract a typed struct |
//! | [`parse_json_value`] | Extract untyped JSON |
//!
//! ## Shared Utilities
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |
//! | [`try_repair_json`] | Fix common LLM JSON errors |

pub mod error;
pub mod extract;
pub mod json;
pub mod repair;
pub mod streaming;

pub use error::ParseError;
pub use extract::{preprocess, strip_think_tags};
pub use json::{parse_json, parse_json_value};
pub use repair::try_repair_json;
