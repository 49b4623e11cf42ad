//! # Keepsake Channels
//! Outbound SMS gateway client and inbound webhook payload parsing.

pub mod inbound;
pub mod sms;

pub use inbound::{InboundSignal, InboundSms};
pub use sms::SmsGateway;
