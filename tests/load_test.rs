//! Load testing for the connector.

use std::time::{Duration, Instant};

use servlet_connector::EchoRouter;

mod common;

use common::{start_connector, test_config};

#[tokio::test]
async fn test_load_performance() {
    let mut config = test_config();
    config.pool.max_workers = 32;
    config.pool.startup_workers = 4;
    config.pool.max_idle_workers = 8;
    let connector = start_connector(config, EchoRouter).await;

    let concurrency = 16;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(concurrency)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task in 0..concurrency {
        let client = client.clone();
        let url = format!("http://{}/load/{}", connector.http, task);
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for i in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(format!("{}?i={}", url, i)).send().await {
                    if res.status().is_success() && res.text().await.is_ok() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert_eq!(all_latencies.len(), total_requests, "some requests failed");
    assert!(connector.pool.total_workers() <= 32);
    assert!(connector.pool.idle_requests() >= 1);

    all_latencies.sort();
    let percentile = |p: f64| all_latencies[((all_latencies.len() - 1) as f64 * p) as usize];
    println!(
        "load: {} requests x{} in {:?} ({:.0} req/s), p50 {:?} p95 {:?} p99 {:?}",
        total_requests,
        concurrency,
        duration,
        rps,
        percentile(0.50),
        percentile(0.95),
        percentile(0.99),
    );

    drop(client);
    connector.stop().await;
}
