//! Stdio transport: line-delimited JSON-RPC with serialised writes.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::io::Result as IoResult;
use std::sync::Arc;

use nts_core::Engine;
use nts_core::EngineConfig;
use nts_protocol::JsonRpcMessage;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::{self};
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod message_processor;
mod outgoing_message;
pub mod tools;

use crate::message_processor::MessageProcessor;
use crate::outgoing_message::OutgoingMessageSender;

/// Size of the bounded channels between the reader, processor, and writer
/// tasks. An interactive agent never has this many messages in flight.
const CHANNEL_CAPACITY: usize = 128;

/// Stderr (or `MCP_LOG_FILE`) diagnostics; `MCP_DEBUG=true` forces debug
/// level, otherwise `RUST_LOG` applies.
fn init_tracing() {
    let default_level = if std::env::var("MCP_DEBUG").is_ok_and(|v| v == "true") {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match std::env::var_os("MCP_LOG_FILE") {
        Some(path) if !path.is_empty() => match std::fs::File::create(&path) {
            Ok(file) => {
                let writer = FileWriter(Arc::new(file));
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(move || writer.clone())
                    .with_ansi(false)
                    .init();
            }
            Err(_) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        },
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[derive(Clone)]
struct FileWriter(Arc<std::fs::File>);

impl std::io::Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> IoResult<()> {
        (&*self.0).flush()
    }
}

pub async fn run_main() -> IoResult<()> {
    init_tracing();

    let config = EngineConfig::from_env()?;
    let engine = Arc::new(Engine::new(config));

    let (incoming_tx, mut incoming_rx) = mpsc::channel::<JsonRpcMessage>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JsonRpcMessage>(CHANNEL_CAPACITY);

    // Task: read from stdin, push to `incoming_tx`.
    let stdin_reader_handle = tokio::spawn({
        let incoming_tx = incoming_tx.clone();
        async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcMessage>(&line) {
                    Ok(message) => {
                        if incoming_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("failed to deserialize JSON-RPC line: {e}"),
                }
            }
            debug!("stdin reader finished (EOF)");
        }
    });

    // Task: process incoming messages sequentially.
    let processor_handle = tokio::spawn({
        let outgoing = Arc::new(OutgoingMessageSender::new(outgoing_tx.clone()));
        let mut processor = MessageProcessor::new(engine, outgoing);
        async move {
            while let Some(message) = incoming_rx.recv().await {
                match message {
                    JsonRpcMessage::Request(request) => processor.process_request(request).await,
                    JsonRpcMessage::Notification(notification) => {
                        processor.process_notification(notification).await
                    }
                    JsonRpcMessage::Response(response) => {
                        processor.process_response(response).await
                    }
                    JsonRpcMessage::Error(err) => processor.process_error(err).await,
                }
            }
            info!("processor task exited (channel closed)");
        }
    });

    // Task: write outgoing messages to stdout, one JSON object per line,
    // always UTF-8 regardless of platform defaults.
    let stdout_writer_handle = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(message) = outgoing_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if let Err(e) = stdout.write_all(json.as_bytes()).await {
                        error!("failed to write to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.write_all(b"\n").await {
                        error!("failed to write newline to stdout: {e}");
                        break;
                    }
                    if let Err(e) = stdout.flush().await {
                        error!("failed to flush stdout: {e}");
                        break;
                    }
                }
                Err(e) => error!("failed to serialize JSON-RPC message: {e}"),
            }
        }
        info!("stdout writer exited (channel closed)");
    });

    // The exit path is the stdin reader hitting EOF, which drops the
    // incoming sender and lets the processor and writer drain.
    let _ = tokio::join!(stdin_reader_handle, processor_handle, stdout_writer_handle);

    Ok(())
}
