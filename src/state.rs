use crate::ports::CredentialVerifier;
use crate::push::DefaultPushService;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub push: DefaultPushService,
    pub verifier: Arc<dyn CredentialVerifier>,
}
