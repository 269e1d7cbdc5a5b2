//! `ddm bench <url>` – benchmark concurrent Range-request throughput.
//!
//! A CLI-only convenience layered directly on `HttpClient`, not a core
//! module: it never touches the Store or the Scheduler.

use anyhow::{bail, Result};
use ddm_core::http_client::{CurlHttpClient, HttpClient, HttpRequest};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const CONCURRENCY_LEVELS: &[usize] = &[1, 2, 4, 8];

struct BenchResult {
    concurrency: usize,
    bytes_downloaded: u64,
    elapsed_secs: f64,
}

fn throughput_mib_s(r: &BenchResult) -> f64 {
    if r.elapsed_secs <= 0.0 {
        return 0.0;
    }
    (r.bytes_downloaded as f64 / 1_048_576.0) / r.elapsed_secs
}

/// Sends a single-byte Range probe and reads the total size back from
/// `Content-Range: bytes 0-0/<total>`.
async fn probe_total_size(http: &CurlHttpClient, url: &str) -> Result<u64> {
    let stop = Arc::new(AtomicBool::new(false));
    let response = http
        .execute(
            HttpRequest {
                url: url.to_string(),
                headers: vec![("Range".to_string(), "bytes=0-0".to_string())],
            },
            stop,
            Box::new(|_status, _lines| {}),
            Box::new(|_chunk| true),
        )
        .await?;

    if response.status != 206 {
        bail!(
            "server returned status {} to a Range probe; cannot benchmark (need 206)",
            response.status
        );
    }

    for line in &response.header_lines {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-range:") {
            if let Some(total) = rest.rsplit('/').next() {
                if let Ok(n) = total.trim().parse::<u64>() {
                    return Ok(n);
                }
            }
        }
    }
    bail!("server did not return a Content-Range total size")
}

async fn download_range(http: Arc<CurlHttpClient>, url: String, start: u64, end: u64) -> Result<u64> {
    let stop = Arc::new(AtomicBool::new(false));
    let downloaded = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&downloaded);
    let response = http
        .execute(
            HttpRequest {
                url,
                headers: vec![("Range".to_string(), format!("bytes={start}-{end}"))],
            },
            stop,
            Box::new(|_status, _lines| {}),
            Box::new(move |chunk| {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                true
            }),
        )
        .await?;
    if response.status != 206 && response.status != 200 {
        bail!("range request failed with status {}", response.status);
    }
    Ok(downloaded.load(Ordering::Relaxed))
}

async fn run_at_concurrency(url: &str, total_size: u64, concurrency: usize) -> Result<BenchResult> {
    let http = Arc::new(CurlHttpClient::default());
    let chunk = total_size / concurrency as u64;
    let mut ranges = Vec::with_capacity(concurrency);
    for i in 0..concurrency {
        let start = i as u64 * chunk;
        let end = if i + 1 == concurrency {
            total_size.saturating_sub(1)
        } else {
            start + chunk - 1
        };
        ranges.push((start, end));
    }

    let started = Instant::now();
    let mut handles = Vec::with_capacity(concurrency);
    for (start, end) in ranges {
        let http = Arc::clone(&http);
        let url = url.to_string();
        handles.push(tokio::spawn(download_range(http, url, start, end)));
    }

    let mut bytes_downloaded = 0u64;
    for handle in handles {
        bytes_downloaded += handle.await??;
    }
    let elapsed_secs = started.elapsed().as_secs_f64();

    Ok(BenchResult {
        concurrency,
        bytes_downloaded,
        elapsed_secs,
    })
}

fn print_results(results: &[BenchResult]) {
    println!("  {:>12}  {:>10}  {:>8}  {:>8}", "Concurrency", "Bytes", "Time(s)", "MiB/s");
    println!("  {}  {}  {}  {}", "------------", "----------", "--------", "--------");
    for r in results {
        println!(
            "  {:>12}  {:>10}  {:>8.2}  {:>8.2}",
            r.concurrency,
            r.bytes_downloaded,
            r.elapsed_secs,
            throughput_mib_s(r)
        );
    }
}

pub async fn run_bench(url: &str) -> Result<()> {
    let probe_client = CurlHttpClient::default();
    let total_size = probe_total_size(&probe_client, url).await?;
    println!("Total size: {total_size} bytes");

    let mut results = Vec::with_capacity(CONCURRENCY_LEVELS.len());
    for &concurrency in CONCURRENCY_LEVELS {
        let result = run_at_concurrency(url, total_size, concurrency).await?;
        results.push(result);
    }
    print_results(&results);

    if let Some(best) = results
        .iter()
        .max_by(|a, b| throughput_mib_s(a).total_cmp(&throughput_mib_s(b)))
    {
        println!("Best concurrency: {}", best.concurrency);
    }
    Ok(())
}
