//! The "router node" shape (spec §4.1, §4.5): a single input dispatched to
//! exactly one (or none) of several named output ports.

use crate::message::{PipelineContext, PipelineMessage};
use crate::meta::Metadata;
use crate::node::{Inputs, Outputs};
use crate::stream::{Item, MessageStream};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wires `inputs[input_port]` through `route` into one of `output_ports`.
/// Messages routed to a name not in `output_ports`, or for which `route`
/// returns `None`, are dropped.
pub fn run_router<F>(
    inputs: Inputs,
    input_port: &str,
    output_ports: &[&str],
    ctx: Arc<PipelineContext>,
    route: F,
) -> Outputs
where
    F: Fn(&PipelineMessage, &Arc<PipelineContext>) -> Option<String> + Send + Sync + 'static,
{
    let mut inputs = inputs;
    let mut outputs = Outputs::new();
    let Some(upstream) = inputs.remove(input_port) else {
        return outputs;
    };
    let merged = MessageStream::merge(upstream);

    let port_names: Vec<String> = output_ports.iter().map(|s| s.to_string()).collect();
    let mut txs = Vec::with_capacity(port_names.len());
    for name in &port_names {
        let (tx, rx) = mpsc::unbounded_channel::<Item>();
        txs.push(tx);
        outputs.insert(name.clone(), stream_from_receiver(rx));
    }

    merged.subscribe(
        move |msg| {
            if let Some(port) = route(&msg, &ctx) {
                if let Some(idx) = port_names.iter().position(|p| *p == port) {
                    let _ = txs[idx].send(Ok(msg));
                }
            }
        },
        move |_err| {
            // A routing-input error ends every output port; senders are
            // dropped along with the subscription task, which the
            // receiving streams observe as completion.
        },
        || {},
    );

    outputs
}

fn stream_from_receiver(mut rx: mpsc::UnboundedReceiver<Item>) -> MessageStream {
    let cancel = tokio_util::sync::CancellationToken::new();
    let boxed = Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    });
    MessageStream::from_boxed(boxed, cancel)
}

/// Reads a nested value from `message.request.params._meta` by dotted path
/// under a namespace, e.g. `get_meta(msg, "pi", "thinkingLevel")` (spec
/// §4.5, Router abstract base: "a `getMeta(message, dottedPath)` helper").
pub fn get_meta(message: &PipelineMessage, namespace: &str, key: &str) -> Option<Value> {
    let meta_value = message.request.meta()?.clone();
    let meta = Metadata::from_value(meta_value)?;
    meta.get_path(namespace, key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::{AcpRequest, RequestId};
    use serde_json::json;

    fn msg(ctx: &Arc<PipelineContext>, route: &str) -> PipelineMessage {
        PipelineMessage::new(
            ctx.clone(),
            AcpRequest::new("acp/route", json!({"route": route}), RequestId::Number(1)),
        )
    }

    #[tokio::test]
    async fn routes_messages_to_named_ports() {
        let ctx = PipelineContext::new("req-1", None);
        let m1 = msg(&ctx, "yes");
        let m2 = msg(&ctx, "no");
        let m3 = msg(&ctx, "yes");
        let input = MessageStream::merge(vec![
            MessageStream::of(m1),
            MessageStream::of(m2),
            MessageStream::of(m3),
        ]);
        let mut inputs = Inputs::new();
        inputs.insert("in".to_string(), vec![input]);
        let mut outputs = run_router(inputs, "in", &["yes", "no"], ctx, |m, _ctx| {
            m.request
                .params
                .get("route")
                .and_then(Value::as_str)
                .map(String::from)
        });
        let yes_stream = outputs.remove("yes").unwrap();
        let yes = yes_stream.collect_all().await.unwrap();
        assert_eq!(yes.len(), 2);
    }
}
