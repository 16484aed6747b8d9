//! The "streaming node" shape (spec §4.1): a single input whose messages are
//! each expanded into an output stream; `process` collapses to
//! `process_stream`. Composition over the teacher's class-hierarchy
//! instinct (spec §9, "Deep inheritance"): this is a free function, not a
//! base class, built over a user-supplied inner function.

use crate::message::PipelineContext;
use crate::node::{Inputs, Outputs};
use crate::stream::MessageStream;
use std::sync::Arc;

/// Wires `inputs[input_port]` (merged if fan-in) through `f` and places the
/// result on `outputs[output_port]`.
pub fn run_streaming<F>(
    inputs: Inputs,
    input_port: &str,
    output_port: &str,
    ctx: Arc<PipelineContext>,
    f: F,
) -> Outputs
where
    F: Fn(crate::message::PipelineMessage, Arc<PipelineContext>) -> MessageStream
        + Send
        + Sync
        + 'static,
{
    let mut inputs = inputs;
    let mut outputs = Outputs::new();
    let Some(upstream) = inputs.remove(input_port) else {
        return outputs;
    };
    let merged = MessageStream::merge(upstream);
    let ctx2 = ctx.clone();
    let out = merged.flat_map(move |msg| f(msg, ctx2.clone()));
    outputs.insert(output_port.to_string(), out);
    outputs
}
