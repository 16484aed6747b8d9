//! Reference node library (spec §4.5): concrete [`crate::node::Node`]
//! implementations an operator can wire into a graph out of the box.

pub mod acp_io;
pub mod analyzed_combiner;
pub mod client;
pub mod combiner;
pub mod normalizer;
pub mod passthrough;
pub mod router;
pub mod splitter;
pub mod translator;

use crate::node::NodeRegistry;

/// Registers every reference node type under its spec-given name. Callers
/// that need a smaller surface can register a subset by hand instead.
pub fn register_all(registry: &mut NodeRegistry) -> crate::error::Result<()> {
    passthrough::register(registry)?;
    translator::register_all(registry)?;
    client::register_all(registry)?;
    normalizer::register_all(registry)?;
    splitter::register(registry)?;
    combiner::register(registry)?;
    analyzed_combiner::register(registry)?;
    router::register_all(registry)?;
    acp_io::register(registry)?;
    Ok(())
}
