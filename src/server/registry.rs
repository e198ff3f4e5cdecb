//! Capability registry: the named operations a server exposes.
//!
//! An application type describes its capabilities once through
//! [`Contract::describe`]. Each capability is registered with a typed
//! closure; parameter decoding, declared exception types and result
//! encoding are derived from the closure's signature.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rmq_rpc::server::{Api, CapabilityRegistry, Contract};
//! use rmq_rpc::Fault;
//!
//! struct Greeter;
//!
//! impl Contract for Greeter {
//!     fn describe(api: &mut Api<Self>) {
//!         api.method("ping", |_app: Arc<Greeter>, (): ()| async move {
//!             Ok::<_, Fault>("pong".to_string())
//!         });
//!         api.method("concat", |_app: Arc<Greeter>, (a, b): (String, String)| async move {
//!             Ok::<_, Fault>(a + &b)
//!         });
//!     }
//! }
//!
//! let registry = CapabilityRegistry::<Greeter>::build().unwrap();
//! assert_eq!(registry.resolve("concat").unwrap().parameter_types().len(), 2);
//! assert!(registry.resolve("missing").is_none());
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{Result, RpcError};
use crate::exception::{ApplicationError, Fault};

/// Boxed future for capability invocations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one invocation: the encoded result or the handler's fault.
pub type Invocation = std::result::Result<Value, Fault>;

/// Declared type of one positional parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    name: &'static str,
}

impl ParamType {
    pub fn of<T>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the parameter.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Positional parameter list of a capability.
///
/// Implemented for `()` and for tuples of up to eight deserializable types.
pub trait Params: Sized + 'static {
    /// Declared parameter types, in order.
    fn types() -> Vec<ParamType>;

    /// Decode every value against its declared type.
    ///
    /// The caller guarantees `values.len() == Self::types().len()`. On
    /// failure, returns one message per parameter that did not decode.
    fn decode(values: Vec<Value>) -> std::result::Result<Self, Vec<String>>;
}

fn decode_at<T: DeserializeOwned>(
    value: Option<Value>,
    index: usize,
    errors: &mut Vec<String>,
) -> Option<T> {
    match value.map(serde_json::from_value::<T>) {
        Some(Ok(decoded)) => Some(decoded),
        _ => {
            errors.push(format!("Invalid parameter type at index {}", index));
            None
        }
    }
}

impl Params for () {
    fn types() -> Vec<ParamType> {
        Vec::new()
    }

    fn decode(_values: Vec<Value>) -> std::result::Result<Self, Vec<String>> {
        Ok(())
    }
}

macro_rules! impl_params {
    ($($ty:ident),+) => {
        impl<$($ty),+> Params for ($($ty,)+)
        where
            $($ty: DeserializeOwned + 'static),+
        {
            fn types() -> Vec<ParamType> {
                vec![$(ParamType::of::<$ty>()),+]
            }

            #[allow(non_snake_case)]
            fn decode(values: Vec<Value>) -> std::result::Result<Self, Vec<String>> {
                let mut values = values.into_iter();
                let mut errors = Vec::new();
                let mut index = 0usize;
                $(
                    let $ty = decode_at::<$ty>(values.next(), index, &mut errors);
                    index += 1;
                )+
                let _ = index;
                match ($($ty,)+) {
                    ($(Some($ty),)+) => Ok(($($ty,)+)),
                    _ => Err(errors),
                }
            }
        }
    };
}

impl_params!(T1);
impl_params!(T1, T2);
impl_params!(T1, T2, T3);
impl_params!(T1, T2, T3, T4);
impl_params!(T1, T2, T3, T4, T5);
impl_params!(T1, T2, T3, T4, T5, T6);
impl_params!(T1, T2, T3, T4, T5, T6, T7);
impl_params!(T1, T2, T3, T4, T5, T6, T7, T8);

/// Object-safe view of a capability implementation.
pub trait Handler<A>: Send + Sync + 'static {
    /// Decode the parameters and start the invocation.
    ///
    /// Fails with per-parameter messages before anything runs.
    fn bind(
        &self,
        app: Arc<A>,
        params: Vec<Value>,
    ) -> std::result::Result<BoxFuture<'static, Invocation>, Vec<String>>;
}

/// Wrapper that decodes parameters and encodes the result around a typed
/// closure.
pub struct TypedHandler<A, F, P, R, Fut> {
    handler: F,
    _phantom: PhantomData<fn(Arc<A>, P) -> (R, Fut)>,
}

impl<A, F, P, R, Fut> TypedHandler<A, F, P, R, Fut> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<A, F, P, R, Fut> Handler<A> for TypedHandler<A, F, P, R, Fut>
where
    A: Send + Sync + 'static,
    F: Fn(Arc<A>, P) -> Fut + Send + Sync + 'static,
    P: Params,
    R: Serialize + 'static,
    Fut: Future<Output = std::result::Result<R, Fault>> + Send + 'static,
{
    fn bind(
        &self,
        app: Arc<A>,
        params: Vec<Value>,
    ) -> std::result::Result<BoxFuture<'static, Invocation>, Vec<String>> {
        let params = P::decode(params)?;
        let fut = (self.handler)(app, params);
        Ok(Box::pin(async move {
            let value = fut.await?;
            JsonCodec::encode_result(&value).map_err(Fault::internal)
        }))
    }
}

/// One registered capability.
pub struct Capability<A> {
    name: String,
    parameter_types: Vec<ParamType>,
    throws: Vec<&'static str>,
    handler: Box<dyn Handler<A>>,
}

impl<A: 'static> Capability<A> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter types, in order.
    pub fn parameter_types(&self) -> &[ParamType] {
        &self.parameter_types
    }

    /// Declare an application exception type this capability may raise.
    ///
    /// Only declared types reach the caller as typed exceptions.
    pub fn throws<E: ApplicationError>(&mut self) -> &mut Self {
        if !self.throws.contains(&E::NAME) {
            self.throws.push(E::NAME);
        }
        self
    }

    /// Whether `exception_type` was declared with [`throws`](Self::throws).
    pub fn declares(&self, exception_type: &str) -> bool {
        self.throws.iter().any(|name| *name == exception_type)
    }

    /// See [`Handler::bind`].
    pub fn bind(
        &self,
        app: Arc<A>,
        params: Vec<Value>,
    ) -> std::result::Result<BoxFuture<'static, Invocation>, Vec<String>> {
        self.handler.bind(app, params)
    }
}

impl<A: 'static> std::fmt::Debug for Capability<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("parameter_types", &self.parameter_types)
            .field("throws", &self.throws)
            .finish()
    }
}

/// Collects capabilities while a contract describes itself.
pub struct Api<A> {
    capabilities: Vec<Capability<A>>,
}

impl<A: Send + Sync + 'static> Api<A> {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    /// Register a capability under `name`.
    ///
    /// The closure receives the application instance and the decoded
    /// parameter tuple. Return `Ok(())` for capabilities without a result.
    pub fn method<F, P, R, Fut>(&mut self, name: &str, handler: F) -> &mut Capability<A>
    where
        F: Fn(Arc<A>, P) -> Fut + Send + Sync + 'static,
        P: Params,
        R: Serialize + 'static,
        Fut: Future<Output = std::result::Result<R, Fault>> + Send + 'static,
    {
        self.capabilities.push(Capability {
            name: name.to_string(),
            parameter_types: P::types(),
            throws: Vec::new(),
            handler: Box::new(TypedHandler::new(handler)),
        });
        let last = self.capabilities.len() - 1;
        &mut self.capabilities[last]
    }
}

impl<A: Send + Sync + 'static> Default for Api<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of remotely callable operations of an application type.
pub trait Contract: Send + Sync + Sized + 'static {
    /// Register every capability of `Self`.
    fn describe(api: &mut Api<Self>);
}

/// Name-indexed capabilities, immutable once built.
pub struct CapabilityRegistry<A> {
    capabilities: HashMap<String, Capability<A>>,
}

impl<A: Contract> CapabilityRegistry<A> {
    /// Build the registry for a contract.
    ///
    /// Fails with [`RpcError::DuplicateMethod`] if two capabilities share a
    /// name.
    pub fn build() -> Result<Self> {
        let mut api = Api::new();
        A::describe(&mut api);
        Self::from_api(api)
    }
}

impl<A: 'static> CapabilityRegistry<A> {
    /// Build a registry from capabilities collected outside a [`Contract`].
    pub fn from_api(api: Api<A>) -> Result<Self> {
        let mut capabilities = HashMap::with_capacity(api.capabilities.len());
        for capability in api.capabilities {
            if capabilities.contains_key(&capability.name) {
                return Err(RpcError::DuplicateMethod(capability.name));
            }
            capabilities.insert(capability.name.clone(), capability);
        }
        Ok(Self { capabilities })
    }

    /// Look up a capability by exact name.
    pub fn resolve(&self, name: &str) -> Option<&Capability<A>> {
        self.capabilities.get(name)
    }

    /// Declared parameter types of `name`, if registered.
    pub fn parameter_types(&self, name: &str) -> Option<&[ParamType]> {
        self.resolve(name).map(Capability::parameter_types)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
