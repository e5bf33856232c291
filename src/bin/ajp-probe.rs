//! Sends one AJP13 request (or a CPing) to a connector and prints the
//! container's reply as JSON.

use std::time::Instant;

use clap::Parser;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use servlet_connector::protocol::ajp13::{
    encode_body_frame, encode_cping, read_container_packet, ContainerPacket, ForwardRequest,
};

#[derive(Parser)]
#[command(name = "ajp-probe")]
#[command(about = "Diagnostic AJP13 client for the servlet connector", long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:8009")]
    addr: String,

    #[arg(short, long, default_value = "GET")]
    method: String,

    #[arg(short, long, default_value = "/")]
    uri: String,

    /// Extra request header as `Name: value`; repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body, sent as the front end would when asked for it.
    #[arg(short, long)]
    data: Option<String>,

    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Only check liveness with a CPing.
    #[arg(long)]
    cping: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut stream = TcpStream::connect(&cli.addr).await?;
    let started = Instant::now();

    let report = if cli.cping {
        stream.write_all(&encode_cping()).await?;
        let packet = read_container_packet(&mut stream).await?;
        json!({
            "cpong": packet == ContainerPacket::CPong,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        })
    } else {
        exchange(&cli, &mut stream, started).await?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn exchange(cli: &Cli, stream: &mut TcpStream, started: Instant) -> Result<Value, Box<dyn std::error::Error>> {
    let body = cli.data.clone().unwrap_or_default().into_bytes();

    let mut request = ForwardRequest::get(&cli.uri);
    request.method = cli.method.to_uppercase();
    request.server_name = cli.server_name.clone();
    for line in &cli.headers {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("header {:?} is not `Name: value`", line))?;
        request.headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    if !body.is_empty() {
        request.headers.push(("Content-Length".to_string(), body.len().to_string()));
    }
    stream.write_all(&request.encode()?).await?;

    let mut sent = 0;
    let mut status = Value::Null;
    let mut reason = Value::Null;
    let mut headers = Vec::new();
    let mut received = Vec::new();
    let reuse = loop {
        match read_container_packet(stream).await? {
            ContainerPacket::GetBodyChunk(max) => {
                let end = body.len().min(sent + usize::from(max));
                stream.write_all(&encode_body_frame(&body[sent..end])?).await?;
                sent = end;
            }
            ContainerPacket::SendHeaders {
                status: code,
                reason: text,
                headers: pairs,
            } => {
                status = json!(code);
                reason = json!(text);
                headers = pairs
                    .into_iter()
                    .map(|(name, value)| json!({ "name": name, "value": value }))
                    .collect();
            }
            ContainerPacket::BodyChunk(chunk) => received.extend_from_slice(&chunk),
            ContainerPacket::EndResponse { reuse } => break reuse,
            ContainerPacket::CPong => return Err("unexpected CPong during request".into()),
        }
    };

    Ok(json!({
        "status": status,
        "reason": reason,
        "headers": headers,
        "body": String::from_utf8_lossy(&received),
        "body_bytes_sent": sent,
        "reuse": reuse,
        "elapsed_ms": started.elapsed().as_millis() as u64,
    }))
}
