//! Transport contract consumed by the delivery engine.
//!
//! The engine never interprets a payload; it hands the content to the
//! transport and acts on the outcome. Production uses [`crate::MailApiClient`];
//! tests script outcomes through the doubles in [`mock`].

use std::{future::Future, pin::Pin, time::Duration};

use courier_core::MailPayload;

use crate::error::Result;

/// Acknowledgment of a successful delivery.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    /// Provider-assigned identifier for the accepted message, when reported.
    pub provider_id: Option<String>,
    /// Total duration of the delivery attempt.
    pub duration: Duration,
}

/// A collaborator able to send a fully-formed message.
///
/// Implementations report success with a receipt or failure with a
/// [`crate::DeliveryError`]. The engine treats any error — including faults
/// the implementation did not anticipate — identically: the attempt failed,
/// the message is released for retry, and siblings in the batch are
/// unaffected.
pub trait Transport: Send + Sync + 'static {
    /// Attempts delivery of one message.
    fn deliver(
        &self,
        payload: MailPayload,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt>> + Send + '_>>;
}

pub mod mock {
    //! Scriptable transport doubles for testing the engine without a
    //! provider. Outcomes are consumed in order; once the script is empty the
    //! configured fallback outcome applies to every further attempt.

    use std::{collections::VecDeque, future::Future, pin::Pin, sync::Arc};

    use courier_core::MailPayload;
    use tokio::sync::Mutex;

    use super::{DeliveryReceipt, Transport};
    use crate::error::{DeliveryError, Result};

    /// Transport double driven by a scripted sequence of outcomes.
    pub struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Result<DeliveryReceipt>>>>,
        fallback: Result<DeliveryReceipt>,
        attempts: Arc<Mutex<Vec<MailPayload>>>,
    }

    impl ScriptedTransport {
        /// Creates a transport that accepts every message.
        pub fn succeeding() -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback: Ok(DeliveryReceipt::default()),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Creates a transport that fails every message with the given error.
        pub fn failing(error: DeliveryError) -> Self {
            Self {
                script: Arc::new(Mutex::new(VecDeque::new())),
                fallback: Err(error),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Queues explicit outcomes consumed ahead of the fallback.
        pub fn with_script(mut self, outcomes: Vec<Result<DeliveryReceipt>>) -> Self {
            self.script = Arc::new(Mutex::new(outcomes.into()));
            self
        }

        /// Returns every payload handed to the transport, in order.
        pub async fn attempts(&self) -> Vec<MailPayload> {
            self.attempts.lock().await.clone()
        }

        /// Returns how many delivery attempts were made.
        pub async fn attempt_count(&self) -> usize {
            self.attempts.lock().await.len()
        }
    }

    impl Transport for ScriptedTransport {
        fn deliver(
            &self,
            payload: MailPayload,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryReceipt>> + Send + '_>> {
            let script = self.script.clone();
            let attempts = self.attempts.clone();
            let fallback = self.fallback.clone();

            Box::pin(async move {
                attempts.lock().await.push(payload);
                script.lock().await.pop_front().unwrap_or(fallback)
            })
        }
    }
}
