//! Ties canonical JSON, signature verification and the replay guard
//! together into the single entry point every engine calls before
//! accepting a signed envelope (SPEC_FULL.md §4.1).

use crate::canonical::canonical_json_value;
use crate::replay::check_clock_drift;
use crate::signature::verify_detached;
use chrono::{DateTime, Utc};
use hub_core::envelope::{DetachedSignature, Envelope};
use hub_core::error::HubError;
use hub_core::types::Pid;

/// Verify that `envelope.signature` was produced by `envelope.from`'s
/// public key over the canonical JSON of `envelope.payload`, and that the
/// `request_timestamp` found inside the payload is within clock drift.
///
/// Returns `InvalidSignature` on any signature/PID mismatch, `BadPid` if
/// the signing key does not derive to `envelope.from`, and
/// `ExpiredRequest` if the replay guard trips.
pub fn authenticate_envelope(
    envelope: &Envelope,
    request_timestamp: DateTime<Utc>,
    server_now: DateTime<Utc>,
    max_clock_drift_seconds: i64,
) -> Result<(), HubError> {
    let derived_pid = Pid::from_public_key_bytes(&envelope.signature.public_key);
    if derived_pid != envelope.from {
        return Err(HubError::BadPid);
    }

    let message = canonical_json_value(&envelope.payload)
        .map_err(|e| HubError::ValidationError(format!("payload is not valid JSON: {e}")))?;

    verify_detached(&envelope.signature.public_key, &message, &envelope.signature.signature)
        .map_err(|_| HubError::InvalidSignature)?;

    check_clock_drift(request_timestamp, server_now, max_clock_drift_seconds)
}

/// Produce the `DetachedSignature` for `payload`, signed by `keypair`.
pub fn sign_payload<T: serde::Serialize>(
    keypair: &crate::keypair::HubKeyPair,
    payload: &T,
) -> Result<DetachedSignature, serde_json::Error> {
    let message = canonical_json_value(&serde_json::to_value(payload)?)?;
    Ok(DetachedSignature {
        public_key: *keypair.public_key_bytes(),
        signature: keypair.sign(&message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::HubKeyPair;
    use hub_core::envelope::{MessageType, TrustLineClosePayload};
    use hub_core::types::EquivalentCode;
    use uuid::Uuid;

    #[test]
    fn valid_envelope_authenticates() {
        let kp = HubKeyPair::generate();
        let now = Utc::now();
        let payload = TrustLineClosePayload {
            from: kp.pid(),
            to: HubKeyPair::generate().pid(),
            equivalent: EquivalentCode::parse("UAH").unwrap(),
            timestamp: now,
        };
        let signature = sign_payload(&kp, &payload).unwrap();
        let envelope = Envelope {
            msg_id: Uuid::new_v4(),
            msg_type: MessageType::TrustLineClose,
            tx_id: None,
            from: kp.pid(),
            to: None,
            payload: serde_json::to_value(&payload).unwrap(),
            signature,
        };
        assert!(authenticate_envelope(&envelope, now, now, 300).is_ok());
    }

    #[test]
    fn mismatched_pid_rejected() {
        let kp = HubKeyPair::generate();
        let impostor = HubKeyPair::generate();
        let now = Utc::now();
        let payload = TrustLineClosePayload {
            from: kp.pid(),
            to: impostor.pid(),
            equivalent: EquivalentCode::parse("UAH").unwrap(),
            timestamp: now,
        };
        let signature = sign_payload(&kp, &payload).unwrap();
        let envelope = Envelope {
            msg_id: Uuid::new_v4(),
            msg_type: MessageType::TrustLineClose,
            tx_id: None,
            from: impostor.pid(), // claims to be someone else
            to: None,
            payload: serde_json::to_value(&payload).unwrap(),
            signature,
        };
        assert!(matches!(
            authenticate_envelope(&envelope, now, now, 300),
            Err(HubError::BadPid)
        ));
    }
}
