//! Templated refusal messages.
//!
//! Blocked and warned users get a short, neutral reply. The wording never
//! confirms what was detected or how: revealing detection internals
//! teaches the next probe what to avoid.

use crate::types::{ScreeningAction, SocialEngineeringAttempt};

/// Build the user-facing reply for a screened message, or `None` when the
/// message was allowed and normal handling continues.
pub fn refusal_message(attempt: &SocialEngineeringAttempt) -> Option<String> {
    match attempt.action {
        ScreeningAction::Allow => None,
        ScreeningAction::Warn => Some(
            "I can't help with part of that request, but I'm happy to assist \
             with anything else."
                .to_string(),
        ),
        ScreeningAction::Block => Some(
            "I'm not able to help with that request. If you think this is a \
             mistake, please reach out to the operator of this agent."
                .to_string(),
        ),
    }
}
