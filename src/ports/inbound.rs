//! Inbound port. UI (adapter) calls into the application.

use crate::domain::DomainError;

/// Input port: interactive operator surface invoking the use cases.
#[async_trait::async_trait]
pub trait InputPort: Send + Sync {
    /// Run the main menu until the operator exits.
    async fn run(&self) -> Result<(), DomainError>;
}
