//! Request/response hooks around description fetches.

use upnp_requester::{HttpRequest, HttpResponse};

/// Transforms applied to every description fetch.
///
/// The factory passes each outgoing request through the matching `pre_*`
/// method and each response through the `post_*` method before parsing. All
/// methods default to the identity transform.
pub trait SpecHooks: Send + Sync {
    fn pre_device_spec(&self, request: HttpRequest) -> HttpRequest {
        request
    }

    fn post_device_spec(&self, response: HttpResponse) -> HttpResponse {
        response
    }

    fn pre_service_spec(&self, request: HttpRequest) -> HttpRequest {
        request
    }

    fn post_service_spec(&self, response: HttpResponse) -> HttpResponse {
        response
    }
}

/// Identity hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSpecHooks;

impl SpecHooks for DefaultSpecHooks {}
