use crate::types::push::{DeliveryOutcome, DeliveryRequest};

/// Delivers one encrypted request to a push endpoint.
///
/// Transport problems are not errors here: the only thing a caller learns is
/// how the attempt should be treated.
pub trait PushDispatcher: Clone + Send + Sync + 'static {
    type Fut<'a>: Future<Output = DeliveryOutcome> + Send + 'a
    where
        Self: 'a;

    fn send<'a>(&'a self, request: &'a DeliveryRequest) -> Self::Fut<'a>;
}
