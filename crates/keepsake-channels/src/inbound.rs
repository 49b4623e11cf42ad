//! Inbound SMS webhook parsing and stop-keyword detection.
//!
//! The provider POSTs a JSON payload for every reply a recipient sends.
//! Stop/resume keywords follow the carrier conventions (STOP, START,
//! and their aliases), matched case-insensitively on the trimmed body.

use keepsake_core::error::{KeepsakeError, Result};
use serde::{Deserialize, Serialize};

const STOP_KEYWORDS: &[&str] = &["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];
const START_KEYWORDS: &[&str] = &["START", "UNSTOP", "YES"];

/// What an inbound reply means for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundSignal {
    OptOut,
    Resubscribe,
    /// An ordinary reply; not a scheduling signal.
    Other,
}

/// A parsed inbound SMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSms {
    /// Sender phone number in E.164 form.
    pub from: String,
    pub body: String,
}

impl InboundSms {
    /// Interpret the message body as a scheduling signal.
    pub fn signal(&self) -> InboundSignal {
        let keyword = self.body.trim().to_ascii_uppercase();
        if STOP_KEYWORDS.contains(&keyword.as_str()) {
            InboundSignal::OptOut
        } else if START_KEYWORDS.contains(&keyword.as_str()) {
            InboundSignal::Resubscribe
        } else {
            InboundSignal::Other
        }
    }
}

/// Parse a provider inbound-webhook payload.
pub fn parse_inbound(payload: &str) -> Result<InboundSms> {
    let json: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| KeepsakeError::Transport(format!("invalid webhook JSON: {e}")))?;

    let from = json["from"]
        .as_str()
        .ok_or_else(|| KeepsakeError::Transport("webhook payload missing 'from'".into()))?
        .to_string();
    let body = json["body"].as_str().unwrap_or("").to_string();

    Ok(InboundSms { from, body })
}
