//! gRPC adapter.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use super::transport::{GrpcCall, TransportEvent, apply_common};
use crate::config::PoolConfig;
use crate::error::AdapterError;
use crate::lifecycle::{ConnectionMetadata, ProtocolAdapter};
use crate::pool::ConnectionHandle;
use crate::protocol::Protocol;

/// Protocol metadata for gRPC calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrpcMetadata {
    /// Method served by the call.
    pub method: Option<String>,
    /// Activity reports received.
    pub messages: u64,
}

/// Adapter for server-side gRPC calls.
///
/// A call is healthy until it is cancelled or has idled past
/// `connection_timeout`. Teardown marks the call cancelled.
pub struct GrpcAdapter<S = Box<dyn GrpcCall>> {
    _call: PhantomData<fn() -> S>,
}

impl<S: GrpcCall> GrpcAdapter<S> {
    /// Create the adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _call: PhantomData,
        }
    }
}

impl<S: GrpcCall> Default for GrpcAdapter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: GrpcCall> ProtocolAdapter for GrpcAdapter<S> {
    type Connection = S;
    type Metadata = GrpcMetadata;

    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    fn validate_connection(&self, call: &S) -> bool {
        !call.is_cancelled()
    }

    fn initial_metadata(&self, call: &S) -> GrpcMetadata {
        GrpcMetadata {
            method: call.method(),
            messages: 0,
        }
    }

    fn is_healthy(
        &self,
        call: &S,
        metadata: &ConnectionMetadata<GrpcMetadata>,
        config: &PoolConfig,
        now: Instant,
    ) -> bool {
        !call.is_cancelled() && metadata.idle_time(now) <= config.connection_timeout
    }

    async fn cleanup_connection(&self, call: Arc<S>) -> Result<(), AdapterError> {
        if !call.is_cancelled() {
            call.cancel();
        }
        Ok(())
    }

    fn setup_protocol_handlers(&self, call: &Arc<S>, handle: ConnectionHandle<Self>) {
        call.on_event(Box::new(move |event| {
            if let Some(TransportEvent::Activity { .. }) = apply_common(&handle, event) {
                handle.update_metadata(|metadata| metadata.protocol.messages += 1);
            }
        }));
    }
}
