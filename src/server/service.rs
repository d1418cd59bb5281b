//! Service-routing worker.
//!
//! Routes requests under a context path to named endpoints:
//!
//! - `GET /favicon.ico` is redirected to an external icon
//! - a `GET` outside the context path is redirected to `<context>/`
//! - `GET <context>/` lists the registered services
//! - `<context>/<name>[/...][?...]` invokes the endpoint `name` with the
//!   request body; a reply is sent as `200`, no reply as `202 Accepted`
//!
//! Only GET, POST, PUT and DELETE are served.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::http::headers::name;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::server::worker::{MessageContext, Worker, WorkerError};

pub const DEFAULT_CONTEXT_PATH: &str = "/services";
pub const FAVICON_LOCATION: &str = "http://ws.apache.org/favicon.ico";

/// A message delivered to an endpoint.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub service: String,
    pub method: Method,
    pub uri: String,
    pub content_type: Option<String>,
    pub soap_action: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content_type: String,
    pub body: Bytes,
}

/// Message processing behind a service name.
///
/// `Ok(None)` means the message was accepted without a reply.
pub trait Endpoint: Send + Sync {
    fn invoke(&self, message: InboundMessage) -> Result<Option<Reply>, WorkerError>;
}

/// Sends the message body back; an empty message gets no reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoEndpoint;

impl Endpoint for EchoEndpoint {
    fn invoke(&self, message: InboundMessage) -> Result<Option<Reply>, WorkerError> {
        if message.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(Reply {
            content_type: message
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            body: message.body,
        }))
    }
}

#[derive(Clone)]
pub struct ServiceWorker {
    context_path: String,
    services: BTreeMap<String, Arc<dyn Endpoint>>,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("context_path", &self.context_path)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceWorker {
    /// `context_path` is normalized to start with `/` and not end with one.
    pub fn new(context_path: &str) -> Self {
        Self {
            context_path: normalize_context_path(context_path),
            services: BTreeMap::new(),
        }
    }

    /// Worker with an [`EchoEndpoint`] registered under every name.
    pub fn with_echo_services<S: AsRef<str>>(context_path: &str, names: &[S]) -> Self {
        let mut worker = Self::new(context_path);
        for name in names {
            worker.register(name.as_ref(), Arc::new(EchoEndpoint));
        }
        worker
    }

    pub fn register(&mut self, name: impl Into<String>, endpoint: Arc<dyn Endpoint>) {
        self.services.insert(name.into(), endpoint);
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    fn listing(&self) -> String {
        let mut html = String::from(
            "<html><head><title>Available services</title></head><body><h2>Available services</h2><ul>",
        );
        for name in self.services.keys() {
            html.push_str(&format!(
                "<li><a href=\"{}/{name}\">{name}</a></li>",
                self.context_path
            ));
        }
        html.push_str("</ul></body></html>");
        html
    }

    /// Service name addressed by `path`, if it is under the context path.
    fn service_name<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.context_path.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let name = rest.split('/').next().unwrap_or(rest);
        (!name.is_empty()).then_some(name)
    }

    fn redirect(response: &mut Response<'_>, location: &str) {
        response.set_status(StatusCode::MovedPermanently);
        response.set_header(name::LOCATION, location);
    }
}

impl Worker for ServiceWorker {
    async fn service(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
        context: &mut MessageContext,
    ) -> Result<(), WorkerError> {
        let method = request.method().clone();
        if !matches!(method, Method::GET | Method::POST | Method::PUT | Method::DELETE) {
            return Err(WorkerError::MethodNotSupported(method.to_string()));
        }

        let uri = request.uri().to_string();
        let path = uri.split(['?', '#']).next().unwrap_or(&uri);
        let context_dir = format!("{}/", self.context_path);
        let in_context = path.starts_with(&context_dir);

        if method == Method::GET {
            if path == "/favicon.ico" {
                Self::redirect(response, FAVICON_LOCATION);
                return Ok(());
            }
            if !in_context {
                Self::redirect(response, &context_dir);
                return Ok(());
            }
            if path == context_dir {
                response.set_status(StatusCode::Ok);
                response.set_content_type("text/html");
                response.set_body(self.listing());
                return Ok(());
            }
        }

        let endpoint = self
            .service_name(path)
            .and_then(|name| self.services.get_key_value(name));
        let Some((service, endpoint)) = endpoint else {
            tracing::debug!(uri = %uri, "No service for request");
            response.send_error(
                StatusCode::NotFound,
                &format!("The service cannot be found for the endpoint reference (EPR) {uri}"),
            );
            return Ok(());
        };

        let body = request.body().read_to_end().await?;
        let message = InboundMessage {
            service: service.clone(),
            method,
            uri,
            content_type: context.content_type().map(str::to_string),
            soap_action: request
                .header("SOAPAction")
                .map(|v| v.trim().trim_matches('"').to_string()),
            body,
        };
        context.set_property("service", service.as_str());

        match endpoint.invoke(message)? {
            Some(reply) => {
                response.set_status(StatusCode::Ok);
                response.set_content_type(&reply.content_type);
                response.set_body(reply.body);
            }
            None => response.set_status(StatusCode::Accepted),
        }
        Ok(())
    }
}

fn normalize_context_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_CONTEXT_PATH.to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names_are_extracted() {
        let worker = ServiceWorker::with_echo_services("services/", &["Echo"]);
        assert_eq!(worker.context_path(), "/services");
        assert_eq!(worker.service_name("/services/Echo"), Some("Echo"));
        assert_eq!(worker.service_name("/services/Echo/op"), Some("Echo"));
        assert_eq!(worker.service_name("/services/"), None);
        assert_eq!(worker.service_name("/servicesEcho"), None);
    }

    #[test]
    fn echo_endpoint_without_body_is_one_way() {
        let message = InboundMessage {
            service: "Echo".into(),
            method: Method::POST,
            uri: "/services/Echo".into(),
            content_type: None,
            soap_action: None,
            body: Bytes::new(),
        };
        assert_eq!(EchoEndpoint.invoke(message).unwrap(), None);
    }
}
