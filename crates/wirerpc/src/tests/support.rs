use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{
    duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::time;

use crate::client::{ClientOptions, RpcClient};
use crate::codec::{LineReader, LineWriter};
use crate::contract::{MethodEntry, ParamKind, ParameterEntry, ServerContract, ServerContractBuilder};
use crate::features::Features;
use crate::server::{RpcServer, ServerOptions, SessionHandle};

pub(super) const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub(super) async fn within<T>(future: impl Future<Output = T>) -> T {
    time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("test timed out")
}

pub(super) type TestReader = LineReader<BufReader<ReadHalf<DuplexStream>>>;
pub(super) type TestWriter = LineWriter<WriteHalf<DuplexStream>>;

fn framed(stream: DuplexStream) -> (TestReader, TestWriter) {
    let (read, write) = tokio::io::split(stream);
    (
        LineReader::new(BufReader::new(read)),
        LineWriter::new(write),
    )
}

/// Raw byte-level peer for driving a session frame by frame.
pub(super) struct RawPeer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    pub(super) async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("peer write");
        self.writer.write_all(b"\n").await.expect("peer newline");
        self.writer.flush().await.expect("peer flush");
    }

    /// Reads and parses the next non-empty line.
    pub(super) async fn recv_json(&mut self) -> Value {
        within(async {
            loop {
                let mut line = String::new();
                let read = self
                    .reader
                    .read_line(&mut line)
                    .await
                    .expect("peer read");
                assert_ne!(read, 0, "peer hit EOF while expecting a frame");
                if !line.trim().is_empty() {
                    return serde_json::from_str(line.trim()).expect("peer frame is JSON");
                }
            }
        })
        .await
    }

    /// Closes the write side so the far end observes EOF.
    pub(super) async fn shutdown(mut self) {
        self.writer.shutdown().await.expect("peer shutdown");
    }
}

/// Attaches `server` to an in-memory transport and hands back the far end.
pub(super) fn attach_server(server: &RpcServer) -> (SessionHandle, RawPeer) {
    let (near, far) = duplex(64 * 1024);
    let (reader, writer) = framed(near);
    let handle = server
        .attach(reader, writer, Features::new())
        .expect("attach session");

    let (far_read, far_write) = tokio::io::split(far);
    (
        handle,
        RawPeer {
            reader: BufReader::new(far_read),
            writer: far_write,
        },
    )
}

/// Wires a real client and server together over an in-memory transport.
pub(super) fn client_server_pair(
    server: &RpcServer,
    options: ClientOptions,
) -> (RpcClient, SessionHandle) {
    let (near, far) = duplex(64 * 1024);
    let (server_reader, server_writer) = framed(near);
    let handle = server
        .attach(server_reader, server_writer, Features::new())
        .expect("attach session");

    let (client_reader, client_writer) = framed(far);
    let client = RpcClient::attach(client_reader, client_writer, options);
    (client, handle)
}

/// A client whose far end is a scripted raw peer instead of a server.
pub(super) fn client_with_raw_peer(options: ClientOptions) -> (RpcClient, RawPeer) {
    let (near, far) = duplex(64 * 1024);
    let (client_reader, client_writer) = framed(near);
    let client = RpcClient::attach(client_reader, client_writer, options);

    let (far_read, far_write) = tokio::io::split(far);
    (
        client,
        RawPeer {
            reader: BufReader::new(far_read),
            writer: far_write,
        },
    )
}

pub(super) fn add_int_entry() -> MethodEntry {
    MethodEntry::builder("add")
        .param(ParameterEntry::required("a", ParamKind::Integer))
        .param(ParameterEntry::required("b", ParamKind::Integer))
        .returns(ParamKind::Integer)
        .handler(|args, _ctx| async move {
            let a: i64 = args.get(0)?;
            let b: i64 = args.get(1)?;
            Ok(json!(a + b))
        })
        .expect("add entry")
}

pub(super) fn add_string_entry() -> MethodEntry {
    MethodEntry::builder("add")
        .param(ParameterEntry::required("a", ParamKind::String))
        .param(ParameterEntry::required("b", ParamKind::String))
        .returns(ParamKind::String)
        .handler(|args, _ctx| async move {
            let a: String = args.get(0)?;
            let b: String = args.get(1)?;
            Ok(json!(format!("{a}{b}")))
        })
        .expect("add string entry")
}

pub(super) fn one_entry() -> MethodEntry {
    MethodEntry::builder("one")
        .param(ParameterEntry::optional("negative", ParamKind::Boolean).with_default(json!(false)))
        .returns(ParamKind::Integer)
        .handler(|args, _ctx| async move {
            let negative: bool = args.get(0)?;
            Ok(json!(if negative { -1 } else { 1 }))
        })
        .expect("one entry")
}

/// Sleeps for its argument in milliseconds, then echoes it.
pub(super) fn delay_entry() -> MethodEntry {
    MethodEntry::builder("delay")
        .param(ParameterEntry::required("ms", ParamKind::Integer))
        .returns(ParamKind::Integer)
        .handler(|args, _ctx| async move {
            let ms: u64 = args.get(0)?;
            time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        })
        .expect("delay entry")
}

/// Waits until its cancellation fires, or a long fallback elapses.
pub(super) fn hold_entry() -> MethodEntry {
    MethodEntry::builder("hold")
        .param(ParameterEntry::cancellation())
        .returns(ParamKind::String)
        .handler(|_args, ctx| async move {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => Ok(json!("cancelled")),
                _ = time::sleep(Duration::from_secs(30)) => Ok(json!("finished")),
            }
        })
        .expect("hold entry")
}

pub(super) fn demo_contract() -> ServerContractBuilder {
    ServerContract::builder()
        .method(add_int_entry())
        .method(add_string_entry())
        .method(one_entry())
        .method(delay_entry())
        .method(hold_entry())
}

pub(super) fn demo_server(options: ServerOptions) -> RpcServer {
    RpcServer::with_options(demo_contract().build(), options)
}
