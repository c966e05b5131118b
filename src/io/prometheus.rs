//! Prometheus metrics HTTP endpoint
//!
//! Exposes relay metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSnapshot, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics) -> String {
    let snapshot = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_message_metrics(&mut output, &snapshot);
    write_failure_metrics(&mut output, &snapshot);
    write_histogram(
        &mut output,
        "ledger_relay_handle_latency_ms",
        "Time from receiving a message to its outcome in milliseconds",
        &snapshot.latency_buckets,
        &METRICS_BUCKET_BOUNDS,
        snapshot.latency_sum_ms,
    );
    write_metric(
        &mut output,
        "ledger_relay_uptime_seconds",
        "Seconds since the process started",
        MetricType::Gauge,
        snapshot.uptime_secs,
    );

    output
}

fn write_message_metrics(output: &mut String, s: &MetricsSnapshot) {
    write_metric(
        output,
        "ledger_relay_messages_total",
        "Text messages received",
        MetricType::Counter,
        s.messages_received,
    );
    write_metric(
        output,
        "ledger_relay_rows_recorded_total",
        "Rows appended to the ledger",
        MetricType::Counter,
        s.rows_recorded,
    );
    write_metric(
        output,
        "ledger_relay_duplicates_total",
        "Redelivered messages skipped",
        MetricType::Counter,
        s.duplicates_skipped,
    );
    write_metric(
        output,
        "ledger_relay_empty_messages_total",
        "Messages rejected for having no text",
        MetricType::Counter,
        s.empty_messages,
    );
    write_metric(
        output,
        "ledger_relay_commands_total",
        "Bot commands answered",
        MetricType::Counter,
        s.commands_handled,
    );
    write_metric(
        output,
        "ledger_relay_fallback_parses_total",
        "Classifier answers recovered by the local parser",
        MetricType::Counter,
        s.fallback_parses,
    );
}

fn write_failure_metrics(output: &mut String, s: &MetricsSnapshot) {
    write_metric(
        output,
        "ledger_relay_classifier_failures_total",
        "Classifier calls that failed",
        MetricType::Counter,
        s.classifier_failures,
    );
    write_metric(
        output,
        "ledger_relay_ledger_failures_total",
        "Ledger appends that failed",
        MetricType::Counter,
        s.ledger_failures,
    );
    write_metric(
        output,
        "ledger_relay_ack_failures_total",
        "Acknowledgments that failed after a successful append",
        MetricType::Counter,
        s.ack_failures,
    );
    write_metric(
        output,
        "ledger_relay_poll_errors_total",
        "Long-poll requests that failed",
        MetricType::Counter,
        s.poll_errors,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(format_prometheus_metrics(&metrics)))),
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_received();
        metrics.record_recorded();
        metrics.record_handle_latency(150);
        metrics.record_handle_latency(900);
        metrics.record_ledger_failure();

        let output = format_prometheus_metrics(&metrics);

        assert!(output.contains("ledger_relay_messages_total 1"));
        assert!(output.contains("ledger_relay_rows_recorded_total 1"));
        assert!(output.contains("ledger_relay_ledger_failures_total 1"));
        assert!(output.contains("ledger_relay_handle_latency_ms_bucket{le=\"200\"} 1"));
        assert!(output.contains("ledger_relay_handle_latency_ms_bucket{le=\"+Inf\"} 2"));
        assert!(output.contains("ledger_relay_handle_latency_ms_sum 1050"));
        assert!(output.contains("# TYPE ledger_relay_handle_latency_ms histogram"));
    }

    #[test]
    fn test_histogram_is_cumulative() {
        let mut output = String::new();
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        buckets[0] = 2;
        buckets[3] = 1;
        buckets[10] = 1;
        write_histogram(&mut output, "h", "help", &buckets, &METRICS_BUCKET_BOUNDS, 0);
        assert!(output.contains("h_bucket{le=\"50\"} 2"));
        assert!(output.contains("h_bucket{le=\"400\"} 3"));
        assert!(output.contains("h_bucket{le=\"25600\"} 3"));
        assert!(output.contains("h_bucket{le=\"+Inf\"} 4"));
        assert!(output.contains("h_count 4"));
    }
}
