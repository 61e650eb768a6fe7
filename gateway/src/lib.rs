//! HTTP adapters for the payment gateway and the email provider.
//!
//! - [`mercadopago::MercadoPagoGateway`]: hosted-checkout preferences and
//!   payment lookups over the Mercado Pago REST API
//! - [`email::EmailClient`]: transactional email over a JSON `POST /emails`
//!   API
//! - [`retry`]: exponential backoff for idempotent reads
//!
//! Both clients translate every transport and HTTP failure into the typed
//! errors of `raffle-core`; nothing is swallowed.

pub mod email;
pub mod mercadopago;
pub mod retry;

pub use email::{EmailClient, EmailConfig};
pub use mercadopago::{MercadoPagoConfig, MercadoPagoGateway};
pub use retry::RetryPolicy;
