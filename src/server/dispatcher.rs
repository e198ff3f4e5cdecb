//! Request processing: envelope validation, capability lookup, invocation
//! and reply.
//!
//! Every request that reaches the dispatcher produces exactly one response.
//! Checks run in a fixed order and the first failure wins:
//!
//! ```text
//! decode envelope   → 400 Could not parse request
//! version == "2.0"  → 400 jsonrpc must be 2.0
//! resolve method    → 404 No such method
//! param count       → 400 Invalid number of parameters
//! decode params     → 400 Could not parse parameter   (+ per-index messages)
//! invoke            → 500 declared exception type, or 500 Unknown error
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use super::registry::CapabilityRegistry;
use crate::codec::JsonCodec;
use crate::exception::Fault;
use crate::protocol::{peek_request_id, CallError, CallRequest, CallResponse, Reason};
use crate::transport::{BrokerChannel, Delivery, DeliveryHandler, MessageProperties};

/// Turns request bodies into responses for one application instance.
pub struct Dispatcher<A> {
    app: Arc<A>,
    registry: Arc<CapabilityRegistry<A>>,
}

impl<A: Send + Sync + 'static> Dispatcher<A> {
    pub fn new(app: Arc<A>, registry: Arc<CapabilityRegistry<A>>) -> Self {
        Self { app, registry }
    }

    /// Process one raw request body.
    pub async fn process(&self, body: &[u8]) -> CallResponse {
        let request: CallRequest = match JsonCodec::decode(body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Could not parse request: {}", e);
                return CallResponse::failure(
                    peek_request_id(body),
                    CallError::from_reason(Reason::CouldNotParseRequest),
                );
            }
        };

        let id = request.id.clone();
        match self.execute(request).await {
            Ok(value) => CallResponse::success(id, value),
            Err(error) => CallResponse::failure(id, error),
        }
    }

    async fn execute(&self, request: CallRequest) -> Result<Value, CallError> {
        if !request.is_supported_version() {
            return Err(CallError::from_reason(Reason::WrongRpcVersion));
        }

        let capability = self
            .registry
            .resolve(&request.method)
            .ok_or_else(|| CallError::from_reason(Reason::NoSuchMethod))?;

        if request.params.len() != capability.parameter_types().len() {
            return Err(CallError::from_reason(Reason::InvalidParamCount));
        }

        let app = self.app.clone();
        let params = request.params;
        let invocation = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            capability.bind(app, params)
        })) {
            Ok(Ok(invocation)) => invocation,
            Ok(Err(messages)) => {
                return Err(CallError::with_messages(
                    Reason::CouldNotParseParams,
                    messages,
                ))
            }
            Err(panic) => {
                tracing::error!(
                    "Capability {} panicked: {}",
                    request.method,
                    panic_message(&*panic)
                );
                return Err(CallError::from_reason(Reason::UnknownException));
            }
        };

        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Fault::Application(exception)))
                if capability.declares(exception.exception_type()) =>
            {
                tracing::debug!("Capability {} raised {}", request.method, exception);
                Err(CallError::from_exception(&exception))
            }
            Ok(Err(fault)) => {
                tracing::error!("Capability {} failed: {}", request.method, fault);
                Err(CallError::from_reason(Reason::UnknownException))
            }
            Err(panic) => {
                tracing::error!(
                    "Capability {} panicked: {}",
                    request.method,
                    panic_message(&*panic)
                );
                Err(CallError::from_reason(Reason::UnknownException))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Consumer that dispatches each delivery and publishes the reply on the
/// channel it arrived on.
pub(crate) struct DispatchConsumer<A> {
    dispatcher: Arc<Dispatcher<A>>,
    channel: Arc<dyn BrokerChannel>,
}

impl<A> DispatchConsumer<A> {
    pub(crate) fn new(dispatcher: Arc<Dispatcher<A>>, channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            dispatcher,
            channel,
        }
    }

    async fn reply(&self, delivery: &Delivery, response: &CallResponse) {
        let Some(reply_to) = delivery.properties.reply_to.as_deref() else {
            tracing::warn!("Request {} has no reply-to, dropping response", response.id);
            return;
        };
        let body = match JsonCodec::encode(response) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to encode response {}: {}", response.id, e);
                return;
            }
        };
        let properties = MessageProperties::reply_to(&delivery.properties);
        if let Err(e) = self.channel.publish(reply_to, properties, body).await {
            tracing::warn!("Failed to publish response {}: {}", response.id, e);
        }
    }
}

#[async_trait]
impl<A: Send + Sync + 'static> DeliveryHandler for DispatchConsumer<A> {
    async fn handle(&self, delivery: Delivery) {
        let response = self.dispatcher.process(&delivery.body).await;
        self.reply(&delivery, &response).await;

        // Acked whether or not the reply went out; the request is done.
        if let Err(e) = self.channel.ack(delivery.delivery_tag).await {
            tracing::warn!("Failed to ack delivery {}: {}", delivery.delivery_tag, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ApplicationError;
    use crate::protocol::ErrorCode;
    use crate::server::{Api, Contract};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, thiserror::Error)]
    #[error("quota {used}/{limit}")]
    struct QuotaExceeded {
        used: u32,
        limit: u32,
    }

    impl ApplicationError for QuotaExceeded {
        const NAME: &'static str = "QuotaExceeded";
    }

    #[derive(Debug, Serialize, Deserialize, thiserror::Error)]
    #[error("not allowed")]
    struct NotAllowed;

    impl ApplicationError for NotAllowed {
        const NAME: &'static str = "NotAllowed";
    }

    #[derive(Default)]
    struct Service {
        pings: AtomicUsize,
    }

    impl Contract for Service {
        fn describe(api: &mut Api<Self>) {
            api.method("ping", |app: Arc<Service>, (): ()| async move {
                app.pings.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Fault>("pong")
            });
            api.method("add", |_app: Arc<Service>, (a, b): (i64, i64)| async move {
                Ok::<_, Fault>(a + b)
            });
            api.method("spend", |_app: Arc<Service>, (n,): (u32,)| async move {
                Err::<u32, _>(Fault::from(QuotaExceeded { used: n, limit: 3 }))
            })
            .throws::<QuotaExceeded>();
            api.method("forbidden", |_app: Arc<Service>, (): ()| async move {
                Err::<(), _>(Fault::from(NotAllowed))
            });
            api.method("broken", |_app: Arc<Service>, (): ()| async move {
                Err::<(), _>(Fault::internal("disk on fire"))
            });
            api.method("boom", |_app: Arc<Service>, (): ()| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, Fault>(())
            });
        }
    }

    fn dispatcher_for(app: Arc<Service>) -> Dispatcher<Service> {
        let registry = CapabilityRegistry::<Service>::build().unwrap();
        Dispatcher::new(app, Arc::new(registry))
    }

    fn dispatcher() -> Dispatcher<Service> {
        dispatcher_for(Arc::new(Service::default()))
    }

    async fn call(body: serde_json::Value) -> CallResponse {
        let body = serde_json::to_vec(&body).unwrap();
        let response = dispatcher().process(&body).await;
        assert!(response.is_well_formed());
        response
    }

    fn error_of(response: &CallResponse) -> &CallError {
        response.error.as_ref().unwrap()
    }

    #[tokio::test]
    async fn test_success() {
        let resp = call(json!({"jsonrpc": "2.0", "id": "1", "method": "ping", "params": []})).await;
        assert_eq!(resp.id, "1");
        assert_eq!(resp.result, Some(json!("pong")));

        let resp = call(json!({"jsonrpc": "2.0", "id": "2", "method": "add", "params": [2, 3]})).await;
        assert_eq!(resp.result, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_absent_params_means_none() {
        let resp = call(json!({"jsonrpc": "2.0", "id": "1", "method": "ping"})).await;
        assert_eq!(resp.result, Some(json!("pong")));
    }

    #[tokio::test]
    async fn test_unparseable_request_keeps_id() {
        let resp = dispatcher().process(b"not json").await;
        assert_eq!(resp.id, "");
        assert_eq!(error_of(&resp).reason, "Could not parse request");
        assert_eq!(error_of(&resp).code, ErrorCode::BadRequest.value());

        let resp = call(json!({"jsonrpc": "2.0", "id": "7", "method": "ping", "params": "x"})).await;
        assert_eq!(resp.id, "7");
        assert_eq!(error_of(&resp).reason, "Could not parse request");
    }

    #[tokio::test]
    async fn test_wrong_version() {
        let resp = call(json!({"jsonrpc": "1.0", "id": "1", "method": "ping"})).await;
        assert_eq!(error_of(&resp).reason, "jsonrpc must be 2.0");

        let resp = call(json!({"id": "1", "method": "ping"})).await;
        assert_eq!(error_of(&resp).reason, "jsonrpc must be 2.0");
    }

    #[tokio::test]
    async fn test_rejected_requests_never_invoke() {
        let app = Arc::new(Service::default());
        let dispatcher = dispatcher_for(app.clone());
        for body in [
            json!({"jsonrpc": "1.0", "id": "1", "method": "ping"}),
            json!({"id": "1", "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": "1", "method": "ping", "params": [1]}),
        ] {
            let response = dispatcher.process(&serde_json::to_vec(&body).unwrap()).await;
            assert!(response.error.is_some(), "{body}");
        }
        assert_eq!(app.pings.load(Ordering::SeqCst), 0);

        let body = json!({"jsonrpc": "2.0", "id": "1", "method": "ping"});
        dispatcher.process(&serde_json::to_vec(&body).unwrap()).await;
        assert_eq!(app.pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_numeric_id_is_echoed_as_text() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 5, "method": "ping"})).await;
        assert_eq!(resp.id, "5");
        assert_eq!(resp.result, Some(json!("pong")));
    }

    #[tokio::test]
    async fn test_version_checked_before_method() {
        let resp = call(json!({"jsonrpc": "1.0", "id": "1", "method": "nope"})).await;
        assert_eq!(error_of(&resp).reason, "jsonrpc must be 2.0");
    }

    #[tokio::test]
    async fn test_no_such_method() {
        let resp = call(json!({"jsonrpc": "2.0", "id": "1", "method": "Ping"})).await;
        assert_eq!(error_of(&resp).code, 404);
        assert_eq!(error_of(&resp).reason, "No such method");
    }

    #[tokio::test]
    async fn test_param_count() {
        let resp = call(json!({"jsonrpc": "2.0", "id": "1", "method": "add", "params": [1]})).await;
        assert_eq!(error_of(&resp).reason, "Invalid number of parameters");
    }

    #[tokio::test]
    async fn test_param_types_report_every_index() {
        let resp = call(
            json!({"jsonrpc": "2.0", "id": "1", "method": "add", "params": ["x", "y"]}),
        )
        .await;
        let error = error_of(&resp);
        assert_eq!(error.reason, "Could not parse parameter");
        assert_eq!(
            error.messages.clone().unwrap(),
            vec![
                "Invalid parameter type at index 0".to_string(),
                "Invalid parameter type at index 1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_declared_exception_travels() {
        let resp = call(json!({"jsonrpc": "2.0", "id": "1", "method": "spend", "params": [5]})).await;
        let error = error_of(&resp);
        assert_eq!(error.code, 500);
        assert_eq!(error.exception_type.as_deref(), Some("QuotaExceeded"));
        assert_eq!(error.exception_payload, Some(json!({"used": 5, "limit": 3})));
    }

    #[tokio::test]
    async fn test_undeclared_failures_are_unknown() {
        for method in ["forbidden", "broken", "boom"] {
            let resp = call(json!({"jsonrpc": "2.0", "id": "1", "method": method})).await;
            let error = error_of(&resp);
            assert_eq!(error.reason, "Unknown error", "{method}");
            assert!(error.exception_type.is_none());
        }
    }
}
