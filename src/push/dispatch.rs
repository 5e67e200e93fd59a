use crate::types::push::DeliveryOutcome;

pub const CONTENT_TYPE: &str = "application/octet-stream";
pub const CONTENT_ENCODING: &str = "aes128gcm";
pub const TTL_HEADER: &str = "TTL";

/// Maps a push service response status onto what the scheduler does next.
///
/// 404 and 410 mean the subscription is gone for good. Anything else that is
/// not a success is worth another try.
pub fn classify(status: u16) -> DeliveryOutcome {
    match status {
        0..=299 => DeliveryOutcome::Success,
        404 | 410 => DeliveryOutcome::Fail,
        _ => DeliveryOutcome::Retry,
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn classify__should_treat_2xx_as_success() {
        assert_eq!(classify(200), DeliveryOutcome::Success);
        assert_eq!(classify(201), DeliveryOutcome::Success);
        assert_eq!(classify(299), DeliveryOutcome::Success);
    }

    #[test]
    fn classify__should_fail_on_gone_endpoints() {
        assert_eq!(classify(404), DeliveryOutcome::Fail);
        assert_eq!(classify(410), DeliveryOutcome::Fail);
    }

    #[test]
    fn classify__should_retry_everything_else() {
        assert_eq!(classify(300), DeliveryOutcome::Retry);
        assert_eq!(classify(400), DeliveryOutcome::Retry);
        assert_eq!(classify(413), DeliveryOutcome::Retry);
        assert_eq!(classify(429), DeliveryOutcome::Retry);
        assert_eq!(classify(503), DeliveryOutcome::Retry);
    }
}
