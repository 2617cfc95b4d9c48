use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{CheckoutSession, CreateCheckoutSessionParams, StripeClient, StripeError};

#[derive(Default)]
pub struct FakeStripeClient {
    pub sessions: Mutex<Vec<CreateCheckoutSessionParams>>,
    fail: AtomicBool,
}

impl FakeStripeClient {
    pub fn failing() -> Self {
        let client = Self::default();
        client.fail.store(true, Ordering::SeqCst);
        client
    }
}

#[async_trait]
impl StripeClient for FakeStripeClient {
    async fn create_checkout_session(
        &self,
        params: &CreateCheckoutSessionParams,
    ) -> Result<CheckoutSession, StripeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StripeError::Api {
                status: 500,
                message: "stripe is down".to_string(),
            });
        }

        let mut sessions = self.sessions.lock().unwrap();
        sessions.push(params.clone());
        let id = format!("cs_test_{}", sessions.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/{}", id),
            id,
        })
    }
}
