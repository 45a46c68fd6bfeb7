//! JSON-lines command protocol
//!
//! Each input line is one command, either `{"send": SendRequest}` or
//! `{"ack": Acknowledgement}`. Each produces exactly one output line: the
//! resulting message on success, or the error (with the failed record, when
//! there is one).

use herald_common::{ErrorCode, Message, Signal, internal};
use herald_dispatch::{Acknowledgement, DispatchError, Dispatcher, SendRequest};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::broadcast,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Send(SendRequest),
    Ack(Acknowledgement),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReply {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReply>,
}

impl Reply {
    fn success(message: Message) -> Self {
        Self {
            ok: true,
            message: Some(message),
            error: None,
        }
    }

    fn failure(err: &DispatchError) -> Self {
        Self {
            ok: false,
            message: err.failed_message().cloned(),
            error: Some(ErrorReply {
                kind: err.kind().as_str(),
                code: err.code(),
                message: err.to_string(),
            }),
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            ok: false,
            message: None,
            error: Some(ErrorReply {
                kind: "invalid_command",
                code: None,
                message: reason,
            }),
        }
    }
}

/// Run one command line against `dispatcher`
pub async fn handle(dispatcher: &Dispatcher, line: &str) -> Reply {
    let command = match serde_json::from_str::<Command>(line) {
        Ok(command) => command,
        Err(err) => return Reply::invalid(format!("unreadable command: {err}")),
    };

    let result = match command {
        Command::Send(request) => dispatcher.dispatch(request).await,
        Command::Ack(ack) => dispatcher.acknowledge(ack).await,
    };

    match result {
        Ok(message) => Reply::success(message),
        Err(err) => Reply::failure(&err),
    }
}

/// Answer commands from `reader` on `writer` until EOF or shutdown
///
/// Blank lines are skipped. Returns how many commands were handled.
///
/// # Errors
///
/// I/O failures on either stream, or a reply that cannot be encoded.
pub async fn serve<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
    mut shutdown: broadcast::Receiver<Signal>,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.recv() => {
                internal!("Command loop received shutdown");
                None
            }
        };

        let Some(line) = line else {
            break;
        };

        if line.trim().is_empty() {
            continue;
        }

        let reply = handle(dispatcher, &line).await;
        let mut encoded = serde_json::to_vec(&reply)?;
        encoded.push(b'\n');

        writer.write_all(&encoded).await?;
        writer.flush().await?;
        handled += 1;
    }

    Ok(handled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use herald_common::{
        ChannelInstance, ChannelKind, ConnectionState, Contact, InstanceId, TenantId, Ticket,
        TicketId,
    };
    use herald_dispatch::MockTransport;
    use herald_ledger::{MemoryDirectory, MemoryMessageStore};
    use serde_json::{Map, Value, json};

    use super::*;

    fn dispatcher() -> Dispatcher {
        let directory = MemoryDirectory::new();
        directory.insert_instance(ChannelInstance {
            id: InstanceId::from("wa-1"),
            tenant_id: TenantId::from("acme"),
            provider: "broker".to_string(),
            state: ConnectionState::Connected,
        });
        directory.insert_ticket(Ticket {
            id: TicketId::from("t-1"),
            tenant_id: TenantId::from("acme"),
            contact: Some(Contact {
                name: None,
                phone: Some("5511999990000".to_string()),
            }),
            channel: ChannelKind::Whatsapp,
            instance_id: Some(InstanceId::from("wa-1")),
            metadata: Map::new(),
        });

        Dispatcher::builder(
            Arc::new(MemoryMessageStore::new()),
            Arc::new(directory),
            Arc::new(MockTransport::new()),
        )
        .build()
    }

    fn replies(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_send_then_ack() {
        let dispatcher = dispatcher();
        let (_tx, rx) = broadcast::channel(1);

        let input = [
            json!({ "send": { "tenant_id": "acme", "ticket_id": "t-1", "content": { "body": "hi" } } }),
            json!({ "ack": { "tenant_id": "acme", "external_id": "mock-1", "status": "DELIVERED" } }),
        ]
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n\n");

        let mut output = Vec::new();
        let handled = serve(&dispatcher, input.as_bytes(), &mut output, rx)
            .await
            .unwrap();
        assert_eq!(handled, 2);

        let replies = replies(&output);
        assert_eq!(replies[0]["ok"], true);
        assert_eq!(replies[0]["message"]["status"], "SENT");
        assert_eq!(replies[1]["message"]["status"], "DELIVERED");
    }

    #[tokio::test]
    async fn test_errors_are_replies() {
        let dispatcher = dispatcher();

        let reply = handle(&dispatcher, "{ not json").await;
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap().kind, "invalid_command");

        let reply = handle(
            &dispatcher,
            r#"{ "send": { "tenant_id": "acme", "ticket_id": "t-404" } }"#,
        )
        .await;
        assert_eq!(reply.error.unwrap().kind, "not_found");

        let reply = handle(
            &dispatcher,
            r#"{ "ack": { "tenant_id": "acme", "external_id": "nope", "status": "READ" } }"#,
        )
        .await;
        assert!(!reply.ok);
        assert!(reply.message.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let dispatcher = dispatcher();
        let (tx, rx) = broadcast::channel(1);
        let (reader, _writer) = tokio::io::duplex(64);

        tx.send(Signal::Shutdown).unwrap();

        let handled = serve(
            &dispatcher,
            tokio::io::BufReader::new(reader),
            tokio::io::sink(),
            rx,
        )
        .await
        .unwrap();
        assert_eq!(handled, 0);
    }
}
