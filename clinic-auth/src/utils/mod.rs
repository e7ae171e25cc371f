pub mod secret;
pub mod validation;

pub use secret::{hash_secret, verify_secret, verify_secret_decoy, PlainSecret, SecretHash};
pub use validation::{
    is_valid_phone, phone_rule, validate_email, validate_phone, ValidatedJson,
};
