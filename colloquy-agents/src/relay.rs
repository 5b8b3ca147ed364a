//! Streaming relay: forwards a turn's fragments to the observer as they arrive.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::gateway::FragmentStream;
use crate::notify::{ContentNotice, MessageKind, Notification, Outbox, new_content_id};

/// What one relayed turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub turn_content_id: String,
    /// Concatenation of every forwarded fragment, in order.
    pub text: String,
    /// Set when the stream ended in an error; `text` holds the partial output.
    pub error: Option<GatewayError>,
    /// Set when the session was cancelled mid-turn. The result must be discarded.
    pub cancelled: bool,
}

/// Relay `stream` to `outbox` as `speaker`'s turn.
///
/// Always emits a started notice before reading the stream and a complete
/// notice after it ends, whatever the reason.
pub async fn relay(
    outbox: &Outbox,
    speaker: &str,
    mut stream: FragmentStream,
    cancel: &CancellationToken,
) -> RelayOutcome {
    let id = new_content_id();
    let notice = |fragment: String, is_complete: bool| {
        Notification::Content(ContentNotice {
            turn_content_id: id.clone(),
            speaker: speaker.to_string(),
            kind: MessageKind::Agent,
            fragment,
            is_complete,
            request_id: None,
        })
    };

    outbox.send(notice(String::new(), false));

    let mut text = String::new();
    let mut error = None;
    let mut cancelled = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                text.push_str(&fragment);
                outbox.send(notice(fragment, false));
            }
            Some(Err(e)) => {
                tracing::warn!(%speaker, error = %e, "Gateway failed mid-turn");
                error = Some(e);
                break;
            }
            None => break,
        }
    }

    outbox.send(notice(String::new(), true));
    tracing::debug!(%speaker, chars = text.len(), cancelled, "Turn relayed");

    RelayOutcome {
        turn_content_id: id,
        text,
        error,
        cancelled,
    }
}
