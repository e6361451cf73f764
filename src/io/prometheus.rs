//! Prometheus metrics HTTP endpoint
//!
//! Exposes pipeline metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsCounters, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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

/// Write a simple metric (counter or gauge) with camera label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    camera: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{camera=\"{camera}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    camera: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{camera=\"{camera}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{camera=\"{camera}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{camera=\"{camera}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{camera=\"{camera}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, camera_id: &str) -> String {
    let counters = metrics.counters();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, camera_id, &counters);
    write_read_metrics(&mut output, camera_id, &counters);
    write_event_metrics(&mut output, camera_id, &counters);
    write_gate_metrics(&mut output, camera_id, &counters);

    output
}

fn write_frame_metrics(output: &mut String, camera: &str, c: &MetricsCounters) {
    write_metric(output, "anpr_frames_total", "Frames read from the source", MetricType::Counter, camera, c.frames_total);
    write_metric(
        output,
        "anpr_frames_processed_total",
        "Frames that ran the full pipeline",
        MetricType::Counter,
        camera,
        c.frames_processed,
    );
    write_histogram(
        output,
        "anpr_frame_latency_us",
        "Frame processing latency in microseconds",
        camera,
        &c.latency_buckets,
        c.latency_sum_us,
    );
}

fn write_read_metrics(output: &mut String, camera: &str, c: &MetricsCounters) {
    write_metric(output, "anpr_regions_total", "Detected plate regions", MetricType::Counter, camera, c.regions_total);
    write_metric(
        output,
        "anpr_empty_regions_total",
        "Regions skipped as degenerate crops",
        MetricType::Counter,
        camera,
        c.empty_regions_total,
    );
    write_metric(output, "anpr_unread_total", "Readings that resolved to no plate", MetricType::Counter, camera, c.unread_total);
    write_metric(
        output,
        "anpr_fallback_attempts_total",
        "Whole-ROI OCR passes",
        MetricType::Counter,
        camera,
        c.fallback_attempts,
    );
    write_metric(
        output,
        "anpr_fallback_matches_total",
        "Whole-ROI OCR passes that resolved a plate",
        MetricType::Counter,
        camera,
        c.fallback_matches,
    );
    write_metric(
        output,
        "anpr_collaborator_errors_total",
        "Detector, recognizer, store or sink failures",
        MetricType::Counter,
        camera,
        c.collaborator_errors,
    );
}

fn write_event_metrics(output: &mut String, camera: &str, c: &MetricsCounters) {
    let _ = writeln!(output, "# HELP anpr_events_total Emitted detection events by decision");
    let _ = writeln!(output, "# TYPE anpr_events_total counter");
    let _ = writeln!(output, "anpr_events_total{{camera=\"{camera}\",decision=\"allowed\"}} {}", c.events_allowed);
    let _ = writeln!(output, "anpr_events_total{{camera=\"{camera}\",decision=\"blocked\"}} {}", c.events_blocked);

    write_metric(
        output,
        "anpr_cooldown_suppressed_total",
        "Plates suppressed by cooldown",
        MetricType::Counter,
        camera,
        c.cooldown_total,
    );
    write_metric(
        output,
        "anpr_cooldown_entries",
        "Plates currently tracked for cooldown",
        MetricType::Gauge,
        camera,
        c.cooldown_entries,
    );
}

fn write_gate_metrics(output: &mut String, camera: &str, c: &MetricsCounters) {
    write_metric(
        output,
        "anpr_gate_commands_total",
        "Total gate commands sent",
        MetricType::Counter,
        camera,
        c.gate_commands_sent,
    );
    write_metric(
        output,
        "anpr_gate_cmds_dropped_total",
        "Gate commands dropped due to channel full",
        MetricType::Counter,
        camera,
        c.gate_cmds_dropped,
    );
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    camera_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response =
                text_response(StatusCode::OK, format_prometheus_metrics(&metrics, &camera_id));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok".to_string())),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found".to_string())),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    camera_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let camera_id = Arc::new(camera_id);

    info!(port = %port, camera_id = %camera_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let camera_id = camera_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let camera_id = camera_id.clone();
                                async move { handle_request(req, metrics, camera_id).await }
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
