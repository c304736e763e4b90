//! CSV bulk-import utility.
//!
//! Reads `from,to,value,fee` transfer records and replays them against the
//! admin surface's `/invoke` endpoint, batching completions and pacing by
//! the configured interval. The HTTP client is a raw HTTP/1.1 exchange over
//! a TCP stream; pulling in a full client library for one POST shape is not
//! worth the dependency.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::cli::ImportArgs;

/// One parsed CSV record. Only the fee reaches the chain; the rest is
/// carried for operator logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub from: String,
    pub to: String,
    pub value: i64,
    pub fee: i64,
}

/// Runs the import: parse, replay, report.
pub async fn run(args: ImportArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("couldn't open the csv file {}", args.file.display()))?;
    let records = parse_records(&contents)?;
    info!(count = records.len(), file = %args.file.display(), "parsed transfer records");

    let batch = args.batch.max(1);
    let mut tasks = tokio::task::JoinSet::new();
    let mut launched = 0usize;
    let mut failed = 0usize;
    for record in records {
        info!(from = %record.from, to = %record.to, value = record.value, fee = record.fee, "importing record");
        let endpoint = args.endpoint.clone();
        tasks.spawn(async move { post_invoke(&endpoint, record.fee.max(0) as u64).await });
        launched += 1;

        if launched % batch == 0 {
            failed += drain(&mut tasks).await;
        }
        if args.interval_ns > 0 {
            tokio::time::sleep(Duration::from_nanos(args.interval_ns)).await;
        }
    }
    failed += drain(&mut tasks).await;

    info!(count = launched, failed, "import complete");
    Ok(())
}

async fn drain(tasks: &mut tokio::task::JoinSet<Result<()>>) -> usize {
    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "invoke request failed");
                failed += 1;
            }
            Err(err) => {
                warn!(error = %err, "invoke task panicked");
                failed += 1;
            }
        }
    }
    failed
}

/// Parses the CSV contents. The header row names the columns; `fee` is
/// required, the rest default to empty/zero when absent.
pub fn parse_records(contents: &str) -> Result<Vec<TransferRecord>> {
    let mut lines = contents.lines();
    let header = lines.next().context("csv file is empty")?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let index_of = |name: &str| columns.iter().position(|c| *c == name);
    let fee_idx = index_of("fee").context("csv header has no fee column")?;
    let from_idx = index_of("from");
    let to_idx = index_of("to");
    let value_idx = index_of("value");

    let mut records = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let int_field = |idx: Option<usize>| -> Result<i64> {
            match idx.and_then(|i| fields.get(i)) {
                None | Some(&"") => Ok(0),
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("line {}: bad integer {raw:?}", line_no + 2)),
            }
        };
        let str_field = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .map(|s| s.to_string())
                .unwrap_or_default()
        };
        records.push(TransferRecord {
            from: str_field(from_idx),
            to: str_field(to_idx),
            value: int_field(value_idx)?,
            fee: int_field(Some(fee_idx))?,
        });
    }
    Ok(records)
}

/// POSTs `{"fee": n}` to `<endpoint>/invoke` over a raw HTTP/1.1 exchange.
async fn post_invoke(endpoint: &str, fee: u64) -> Result<()> {
    let (host, port) = parse_endpoint(endpoint)?;
    let body = format!("{{\"fee\":{fee}}}");
    let request = format!(
        "POST /invoke HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect((host.as_str(), port))
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let head = String::from_utf8_lossy(&response);
    let status_line = head.lines().next().unwrap_or_default();
    if !status_line.contains("200") {
        bail!("invoke rejected: {status_line}");
    }
    Ok(())
}

/// Extracts host and port from an `http://host:port` endpoint string.
fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let rest = endpoint
        .strip_prefix("http://")
        .unwrap_or(endpoint)
        .trim_end_matches('/');
    match rest.rsplit_once(':') {
        Some((host, port)) => Ok((
            host.to_string(),
            port.parse()
                .with_context(|| format!("bad port in endpoint {endpoint:?}"))?,
        )),
        None => Ok((rest.to_string(), 80)),
    }
}
