//! TCP ingestion and retrieval API.
//!
//! The wire protocol is deliberately small. A connection opens with one op
//! byte:
//!
//! - `0x01` stream ingest: a sequence of chunk records, each
//!   `[tag_len u8][tag][payload_len u32 BE][payload]`. A zero `tag_len` or
//!   a clean EOF ends the stream; the server answers with one JSON line
//!   `{"message": ..., "task_id": ...}` and closes.
//! - `0x02` snapshot retrieval: the server writes `count u32 BE` followed
//!   by `[ts_len u32 BE][timestamp][jpeg_len u32 BE][jpeg]` per retained
//!   snapshot, oldest first.
//!
//! Each connection gets its own thread, so streams run in parallel; frames
//! from one stream keep their arrival order through the shared queue.

use anyhow::{anyhow, Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::service::{StreamChunk, StreamService};

pub const OP_STREAM: u8 = 0x01;
pub const OP_RESULTS: u8 = 0x02;

const MAX_CHUNK_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7799".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api listener thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<StreamService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<StreamService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind api listener on {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);
        let service = self.service;
        let join = std::thread::spawn(move || run_listener(listener, service, shutdown_thread));

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_listener(listener: TcpListener, service: Arc<StreamService>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &service) {
                        log::warn!("connection from {peer} failed: {err:#}");
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("api accept failed: {err}");
                break;
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, service: &StreamService) -> Result<()> {
    let mut op = [0u8; 1];
    stream.read_exact(&mut op).context("read request op")?;
    match op[0] {
        OP_STREAM => handle_stream_op(stream, service),
        OP_RESULTS => handle_results_op(stream, service),
        other => Err(anyhow!("unknown request op {other:#04x}")),
    }
}

fn handle_stream_op(mut stream: TcpStream, service: &StreamService) -> Result<()> {
    let reader = ChunkReader::new(stream.try_clone().context("clone connection")?);
    let summary = service.handle_stream(reader);

    let response = serde_json::json!({
        "message": summary.message,
        "task_id": summary.task_id,
    });
    let mut payload = serde_json::to_vec(&response).context("encode terminal response")?;
    payload.push(b'\n');
    stream
        .write_all(&payload)
        .context("write terminal response")?;
    stream.flush().context("flush terminal response")?;
    Ok(())
}

fn handle_results_op(mut stream: TcpStream, service: &StreamService) -> Result<()> {
    let snapshots = service.pipeline().snapshots();
    stream.write_all(&(snapshots.len() as u32).to_be_bytes())?;
    for snapshot in snapshots {
        write_record(&mut stream, snapshot.timestamp.as_bytes())?;
        write_record(&mut stream, &snapshot.jpeg)?;
    }
    stream.flush().context("flush snapshot records")?;
    Ok(())
}

fn write_record(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    stream.write_all(&(data.len() as u32).to_be_bytes())?;
    stream.write_all(data)?;
    Ok(())
}

/// Pulls chunk records off one connection.
struct ChunkReader<R: Read> {
    reader: R,
    finished: bool,
}

impl<R: Read> ChunkReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    fn read_chunk(&mut self) -> Result<Option<StreamChunk>> {
        let mut tag_len = [0u8; 1];
        match self.reader.read_exact(&mut tag_len) {
            Ok(()) => {}
            // EOF at a record boundary is a clean end of stream.
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err).context("read chunk tag length"),
        }
        if tag_len[0] == 0 {
            return Ok(None);
        }

        let mut tag = vec![0u8; tag_len[0] as usize];
        self.reader.read_exact(&mut tag).context("read chunk tag")?;
        let kind_tag =
            String::from_utf8(tag).map_err(|_| anyhow!("chunk tag is not valid utf-8"))?;

        let payload_len = read_u32(&mut self.reader).context("read chunk payload length")? as usize;
        if payload_len > MAX_CHUNK_BYTES {
            return Err(anyhow!(
                "chunk payload of {payload_len} bytes exceeds the {MAX_CHUNK_BYTES} byte limit"
            ));
        }
        let mut data = vec![0u8; payload_len];
        self.reader
            .read_exact(&mut data)
            .context("read chunk payload")?;
        Ok(Some(StreamChunk { data, kind_tag }))
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<StreamChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}
