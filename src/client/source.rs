use crate::client::error::FetchError;
use crate::types::fetch_request::FetchRequest;
use crate::types::payload::RawHourlyPayload;
use std::future::Future;

/// Anything that can answer a [`FetchRequest`] with a validated payload.
///
/// One call is one attempt; retrying is driven by the request unit state
/// machine so that attempts and terminal states stay observable. The
/// production implementation is [`crate::OpenMeteoClient`]; tests plug in
/// in-memory sources.
pub trait HourlySource {
    fn fetch_once(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<RawHourlyPayload, FetchError>> + Send;
}

impl<S: HourlySource + Sync> HourlySource for &S {
    fn fetch_once(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<RawHourlyPayload, FetchError>> + Send {
        (**self).fetch_once(request)
    }
}
