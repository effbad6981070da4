//! Hosting the endpoints a [`Topology`] plans.
//!
//! Every distinct address gets one tonic server carrying health, reflection,
//! gRPC-web with permissive CORS, and whichever of the allocator and
//! generator services live there. An allocator and a generator planned on the
//! same address share one server.

use crate::server::service::{BatchHandler, IdHandler};
use crate::server::topology::Topology;
use anyhow::Context;
use batchid_tonic_core::HostAddr;
use batchid_tonic_core::proto::{
    FILE_DESCRIPTOR_SET, batch_service_server::BatchServiceServer,
    id_service_server::IdServiceServer,
};
use futures::Stream;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Services hosted on one address.
#[derive(Clone, Default)]
pub struct Services {
    pub batch: Option<BatchHandler>,
    pub id: Option<IdHandler>,
}

/// One server to run: an address and what it hosts.
#[derive(Clone)]
pub struct EndpointPlan {
    pub addr: HostAddr,
    pub services: Services,
}

/// Groups the endpoints of `topology` by address.
pub fn plan_endpoints(topology: &Topology) -> Vec<EndpointPlan> {
    let mut plans: Vec<EndpointPlan> = Vec::new();

    if let Some(endpoint) = &topology.allocator_endpoint {
        plans.push(EndpointPlan {
            addr: endpoint.addr.clone(),
            services: Services {
                batch: Some(BatchHandler::new(Arc::clone(&endpoint.service))),
                id: None,
            },
        });
    }

    if let Some(endpoint) = &topology.generator_endpoint {
        let handler = IdHandler::new(Arc::clone(&endpoint.service));
        match plans.iter_mut().find(|plan| plan.addr == endpoint.addr) {
            Some(plan) => plan.services.id = Some(handler),
            None => plans.push(EndpointPlan {
                addr: endpoint.addr.clone(),
                services: Services {
                    batch: None,
                    id: Some(handler),
                },
            }),
        }
    }

    plans
}

/// Binds every planned address and serves it until `shutdown` fires.
///
/// # Errors
///
/// Fails if an address cannot be bound. Servers already spawned keep running
/// until `shutdown` is cancelled.
pub async fn spawn_endpoints(
    plans: Vec<EndpointPlan>,
    shutdown: &CancellationToken,
    servers: &mut JoinSet<anyhow::Result<()>>,
) -> anyhow::Result<()> {
    for plan in plans {
        let listener = TcpListener::bind(plan.addr.to_string())
            .await
            .with_context(|| format!("failed to bind {}", plan.addr))?;
        log_startup_info(&plan);
        spawn_on_listener(servers, listener, plan.services, shutdown.clone());
    }
    Ok(())
}

/// Serves `services` on an already bound listener.
pub fn spawn_on_listener(
    servers: &mut JoinSet<anyhow::Result<()>>,
    listener: TcpListener,
    services: Services,
    shutdown: CancellationToken,
) {
    let incoming = TcpListenerStream::new(listener);
    servers.spawn(serve_with_incoming(incoming, services, shutdown));
}

pub async fn serve_with_incoming<I, IO, IE>(
    incoming: I,
    services: Services,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let hosts_batch = services.batch.is_some();
    let hosts_id = services.id.is_some();

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    if hosts_batch {
        health_reporter
            .set_serving::<BatchServiceServer<BatchHandler>>()
            .await;
    }
    if hosts_id {
        health_reporter
            .set_serving::<IdServiceServer<IdHandler>>()
            .await;
    }

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_optional_service(services.batch.map(build_batch_service))
        .add_optional_service(services.id.map(build_id_service))
        .serve_with_incoming_shutdown(incoming, async move {
            shutdown.cancelled().await;
            if hosts_batch {
                health_reporter
                    .set_not_serving::<BatchServiceServer<BatchHandler>>()
                    .await;
            }
            if hosts_id {
                health_reporter
                    .set_not_serving::<IdServiceServer<IdHandler>>()
                    .await;
            }
        })
        .await?;

    tracing::debug!("endpoint shut down");
    Ok(())
}

fn build_batch_service(handler: BatchHandler) -> BatchServiceServer<BatchHandler> {
    BatchServiceServer::new(handler)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

fn build_id_service(handler: IdHandler) -> IdServiceServer<IdHandler> {
    IdServiceServer::new(handler)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

fn log_startup_info(plan: &EndpointPlan) {
    let mut hosted = Vec::new();
    if plan.services.batch.is_some() {
        hosted.push("BatchService");
    }
    if plan.services.id.is_some() {
        hosted.push("IdService");
    }
    tracing::info!("Serving {} on {}", hosted.join(" + "), plan.addr);
}
