pub mod canonical;
pub mod identity;
pub mod keypair;
pub mod replay;
pub mod signature;

pub use canonical::{canonical_json, canonical_json_value};
pub use identity::{authenticate_envelope, sign_payload};
pub use keypair::HubKeyPair;
pub use replay::check_clock_drift;
pub use signature::{verify_detached, SignatureError};
