use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::{argument_text, ClientMessage, ServerMessage};
use crate::pipeline::{Pipeline, PipelineError, DENIED};

/// Channel back to the view that sent a frame
pub type Reply = mpsc::UnboundedSender<ServerMessage>;

/// Dispatches presentation-layer frames onto a [`Pipeline`].
#[derive(Clone)]
pub struct MessageRouter {
    pipeline: Arc<Pipeline>,
}

impl MessageRouter {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Decode one text frame and dispatch it; undecodable frames get an `ERROR` reply
    pub async fn handle_text(&self, text: &str, reply: &Reply) {
        match ClientMessage::decode(text) {
            Ok(message) => self.dispatch(message, reply).await,
            Err(e) => {
                tracing::warn!("Rejecting malformed frame: {}", e);
                send(reply, ServerMessage::Error(format!("malformed message: {e}")));
            }
        }
    }

    /// Handle one message.
    ///
    /// `EXECUTE` runs on its own task so the caller can keep reading frames
    /// while the stage is in flight; its reply arrives once the stage exits.
    pub async fn dispatch(&self, message: ClientMessage, reply: &Reply) {
        match message {
            ClientMessage::LoadModule(target) => {
                tracing::debug!("LOADMODULE {}", target);
                if let Err(e) = self.pipeline.request_go_to(target).await {
                    match e {
                        PipelineError::NotReachable { .. } => {
                            tracing::info!("Denied navigation to module {}", target)
                        }
                        ref other => tracing::warn!("Navigation to {} failed: {}", target, other),
                    }
                    send(reply, ServerMessage::LoadModule(DENIED.to_string()));
                }
            }
            ClientMessage::Execute(stage, argument) => {
                let argument = argument_text(&argument);
                tracing::debug!("EXECUTE {} with args: {}", stage, argument);

                let pipeline = Arc::clone(&self.pipeline);
                let reply = reply.clone();
                tokio::spawn(async move {
                    let outcome = match pipeline.execute(&stage, &argument).await {
                        Ok(()) => None,
                        Err(e) => Some(e.wire_message()),
                    };
                    send(&reply, ServerMessage::Execute(outcome));
                });
            }
            ClientMessage::Ready => {
                if let Some(payload) = self.pipeline.view_ready().await {
                    send(reply, ServerMessage::New(payload));
                }
            }
        }
    }
}

fn send(reply: &Reply, message: ServerMessage) {
    if reply.send(message).is_err() {
        tracing::debug!("View disconnected before reply could be sent");
    }
}
