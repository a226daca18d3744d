//! JSON-lines message channel.
//!
//! Each input line is one message, e.g. `{"id":1,"what":"getRulesetData"}`.
//! Recognized messages are answered with one `{"id":1,"reply":...}` line;
//! anything else produces no output. Replies are written as they complete,
//! so their order need not match the input.

use std::future::Future;
use std::io;
use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};

use crate::dispatcher::Dispatcher;

/// Dispatches one input line. Returns `None` when the line is blank, not
/// JSON, or not addressed to the dispatcher; otherwise a future yielding
/// the output line for its reply.
pub fn reply_line(
    dispatcher: &Arc<Dispatcher>,
    line: &str,
) -> Option<impl Future<Output = Option<String>>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("Skipping unparseable message: {}", e);
            return None;
        }
    };
    let id = message.get("id").cloned().unwrap_or(Value::Null);
    let reply = dispatcher.dispatch(message)?;
    Some(async move {
        let reply = reply.await.ok()?;
        Some(json!({ "id": id, "reply": reply }).to_string())
    })
}

/// Serves `input` until EOF, writing replies to `output`, then waits for the
/// replies still in flight and hands `output` back.
pub async fn serve_lines<R, W>(dispatcher: Arc<Dispatcher>, input: R, output: W) -> io::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let output = Arc::new(Mutex::new(output));
    let mut replies = JoinSet::new();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        while let Some(finished) = replies.try_join_next() {
            log_finished(finished);
        }
        let Some(reply) = reply_line(&dispatcher, &line) else {
            continue;
        };
        let output = Arc::clone(&output);
        replies.spawn(async move {
            let Some(line) = reply.await else {
                return Ok(());
            };
            let mut output = output.lock().await;
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await
        });
    }

    while let Some(finished) = replies.join_next().await {
        log_finished(finished);
    }

    match Arc::try_unwrap(output) {
        Ok(output) => Ok(output.into_inner()),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::Other,
            "reply writer still shared after all replies finished",
        )),
    }
}

fn log_finished(finished: Result<io::Result<()>, JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to write reply: {}", e),
        Err(e) => warn!("Reply task failed: {}", e),
    }
}
