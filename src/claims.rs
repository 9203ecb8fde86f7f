//! Bearer-claim verification for upload identity augmentation.
//!
//! Clients may attach a signed token under the `extjwt` metadata key. The
//! token's `iss` claim selects the shared HMAC secret from the configured
//! registry, so the issuer is read before signature verification -- the same
//! flow a key-lookup callback gives: reject foreign algorithm families up
//! front, then verify against the issuer's secret.
//!
//! The outcome/error split matters: `ClaimOutcome` values always let the
//! upload proceed (possibly unauthenticated), while any `ClaimError` must
//! reject the request.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct ClaimSet {
    iss: Option<String>,
    account: Option<String>,
}

/// A verification result that lets the upload proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No token presented. Not an error; no identity is asserted.
    Skipped,
    /// Signature checked against the issuer's configured secret.
    Verified {
        issuer: String,
        account: Option<String>,
    },
    /// Well-formed token from an issuer this server has no secret for. The
    /// upload proceeds unauthenticated rather than being rejected.
    UnknownIssuer { issuer: String },
}

/// A verification failure that must reject the request.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("unexpected signing method: {alg}")]
    UnexpectedSigningMethod { alg: String },
    #[error("issuer field 'iss' missing from token")]
    MissingIssuer,
    /// A configured issuer was impersonated: the token names an issuer we
    /// hold a secret for, but the signature does not verify against it.
    #[error("token signature invalid for issuer {issuer:?}")]
    SignatureInvalid { issuer: String },
    #[error("failed to parse token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Verify `token` against the issuer-keyed secret registry.
pub fn verify(
    token: &str,
    secrets_by_issuer: &HashMap<String, String>,
) -> Result<ClaimOutcome, ClaimError> {
    if token.is_empty() {
        return Ok(ClaimOutcome::Skipped);
    }

    let header = decode_header(token)?;
    let alg = match header.alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => header.alg,
        other => {
            return Err(ClaimError::UnexpectedSigningMethod {
                alg: format!("{other:?}"),
            });
        }
    };

    // The issuer selects the verification secret, so it has to be read before
    // the signature can be checked.
    let mut peek = Validation::new(alg);
    peek.insecure_disable_signature_validation();
    peek.required_spec_claims.clear();
    peek.validate_exp = false;
    peek.validate_aud = false;
    let unverified = decode::<ClaimSet>(token, &DecodingKey::from_secret(&[]), &peek)?;
    let issuer = unverified.claims.iss.ok_or(ClaimError::MissingIssuer)?;

    let Some(secret) = secrets_by_issuer.get(&issuer) else {
        return Ok(ClaimOutcome::UnknownIssuer { issuer });
    };

    // Registered time claims are honored when present but not required.
    let mut validation = Validation::new(alg);
    validation.required_spec_claims.clear();
    validation.validate_nbf = true;
    validation.validate_aud = false;

    match decode::<ClaimSet>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Ok(ClaimOutcome::Verified {
            issuer,
            account: data.claims.account,
        }),
        Err(err) => match err.kind() {
            ErrorKind::InvalidSignature => Err(ClaimError::SignatureInvalid { issuer }),
            _ => Err(ClaimError::Invalid(err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn registry(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn empty_token_is_skipped() {
        let outcome = verify("", &registry(&[])).unwrap();
        assert_eq!(outcome, ClaimOutcome::Skipped);
    }

    #[test]
    fn valid_token_yields_issuer_and_account() {
        let token = sign(
            &json!({"iss": "irc.example.com", "account": "alice"}),
            "hunter2",
        );
        let outcome = verify(&token, &registry(&[("irc.example.com", "hunter2")])).unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Verified {
                issuer: "irc.example.com".to_owned(),
                account: Some("alice".to_owned()),
            }
        );
    }

    #[test]
    fn account_is_optional() {
        let token = sign(&json!({"iss": "irc.example.com"}), "hunter2");
        let outcome = verify(&token, &registry(&[("irc.example.com", "hunter2")])).unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Verified {
                issuer: "irc.example.com".to_owned(),
                account: None,
            }
        );
    }

    #[test]
    fn unknown_issuer_is_not_fatal() {
        let token = sign(&json!({"iss": "other.example.org"}), "whatever");
        let outcome = verify(&token, &registry(&[("irc.example.com", "hunter2")])).unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::UnknownIssuer {
                issuer: "other.example.org".to_owned(),
            }
        );
    }

    #[test]
    fn missing_issuer_is_fatal() {
        let token = sign(&json!({"account": "alice"}), "hunter2");
        let err = verify(&token, &registry(&[])).unwrap_err();
        assert!(matches!(err, ClaimError::MissingIssuer));
    }

    #[test]
    fn wrong_secret_for_known_issuer_is_fatal() {
        let token = sign(&json!({"iss": "irc.example.com", "account": "mallory"}), "guessed");
        let err = verify(&token, &registry(&[("irc.example.com", "hunter2")])).unwrap_err();
        assert!(matches!(err, ClaimError::SignatureInvalid { issuer } if issuer == "irc.example.com"));
    }

    #[test]
    fn non_hmac_algorithm_is_rejected() {
        // Hand-rolled token declaring RS256; the header is all that matters,
        // verification must bail before touching the signature.
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(r#"{"iss":"irc.example.com"}"#);
        let token = format!("{header}.{claims}.c2ln");
        let err = verify(&token, &registry(&[("irc.example.com", "hunter2")])).unwrap_err();
        assert!(matches!(err, ClaimError::UnexpectedSigningMethod { .. }));
    }

    #[test]
    fn garbage_token_is_fatal() {
        let err = verify("not.a.jwt", &registry(&[])).unwrap_err();
        assert!(matches!(err, ClaimError::Invalid(_)));
    }

    #[test]
    fn expired_token_for_known_issuer_is_fatal() {
        let token = sign(
            &json!({"iss": "irc.example.com", "exp": 1_600_000_000}),
            "hunter2",
        );
        let err = verify(&token, &registry(&[("irc.example.com", "hunter2")])).unwrap_err();
        assert!(matches!(err, ClaimError::Invalid(_)));
    }
}
