//! JWT parsing and validation against a provider's JWKS.
//!
//! # Validation order
//!
//! The first failing check ends validation:
//!
//! 1. Structure (three base64url segments, JSON header and claims).
//! 2. Header `kid` present, `alg` asymmetric.
//! 3. Signing key resolved from the cached JWKS. An unknown `kid` forces one
//!    JWKS refetch per call, never more.
//! 4. Key's declared `alg` (if any) equals the header `alg`; signature.
//! 5. `iss` equality, `aud` membership.
//! 6. `exp > now - leeway`, `nbf <= now + leeway`.
//! 7. Deployment-specific [`AdditionalTokenConstraints`].
//!
//! Time checks use the injected [`Clock`], not the system time.

use std::collections::HashSet;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cache::{self, CacheBackend};
use crate::clock::Clock;
use crate::fetcher::UrlFetcher;
use crate::{Error, Result};

/// Default clock-skew tolerance in seconds
pub const DEFAULT_LEEWAY_SECONDS: u64 = 300;

/// Reasons a JWT is rejected
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Not a well-formed JWT
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Header carries no `kid`
    #[error("token header has no 'kid'")]
    MissingKeyId,

    /// Header `alg` is symmetric or otherwise not accepted
    #[error("unsupported signing algorithm {0}")]
    UnsupportedAlgorithm(String),

    /// No JWKS key with this id, even after a refresh
    #[error("unknown key id {0:?}")]
    UnknownKeyId(String),

    /// JWK declares a different algorithm than the token header
    #[error("key {kid:?} is not usable with algorithm {alg}")]
    AlgorithmMismatch {
        /// Key id
        kid: String,
        /// Header algorithm
        alg: String,
    },

    /// Signature verification failed
    #[error("signature verification failed: {0}")]
    Signature(#[from] jsonwebtoken::errors::Error),

    /// `iss` differs from the expected issuer
    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Expected issuer
        expected: String,
        /// Issuer in the token
        actual: String,
    },

    /// `aud` does not contain the expected audience
    #[error("audience {expected} not permitted by token")]
    AudienceMismatch {
        /// Expected audience
        expected: String,
    },

    /// A required claim is absent or has the wrong type
    #[error("missing or invalid claim '{0}'")]
    MissingClaim(&'static str),

    /// `exp` is past, beyond the leeway
    #[error("token expired at {exp} (now {now}, leeway {leeway}s)")]
    Expired {
        /// Expiry claim
        exp: i64,
        /// Validation time
        now: i64,
        /// Leeway applied
        leeway: u64,
    },

    /// `nbf` is in the future, beyond the leeway
    #[error("token not valid before {nbf} (now {now}, leeway {leeway}s)")]
    NotYetValid {
        /// Not-before claim
        nbf: i64,
        /// Validation time
        now: i64,
        /// Leeway applied
        leeway: u64,
    },

    /// `nonce` differs from the one sent with the authorization request
    #[error("nonce mismatch")]
    NonceMismatch,

    /// Rejected by the additional constraints provider
    #[error("additional constraint failed: {0}")]
    AdditionalConstraint(String),
}

/// Deployment-specific checks run after all standard claims pass.
pub trait AdditionalTokenConstraints: Send + Sync {
    /// Return `Err(reason)` to reject the token.
    fn validate(&self, token: &ParsedJwt) -> std::result::Result<(), String>;
}

impl<F> AdditionalTokenConstraints for F
where
    F: Fn(&ParsedJwt) -> std::result::Result<(), String> + Send + Sync,
{
    fn validate(&self, token: &ParsedJwt) -> std::result::Result<(), String> {
        self(token)
    }
}

/// A decoded (not necessarily verified) JWT
#[derive(Debug, Clone)]
pub struct ParsedJwt {
    /// JOSE header
    pub header: Header,
    /// Claims set
    pub claims: Map<String, Value>,
}

impl ParsedJwt {
    /// Raw claim
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// String claim
    #[must_use]
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// `aud` as a list, whether sent as a string or an array
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        match self.claims.get("aud") {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// `exp` as an instant
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.numeric_claim("exp")
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    fn numeric_claim(&self, name: &str) -> Option<i64> {
        let value = self.claims.get(name)?;
        value
            .as_i64()
            // Some providers emit fractional timestamps
            .or_else(|| value.as_f64().map(|f| f as i64))
    }
}

/// What a validated token must assert
#[derive(Debug, Clone)]
pub struct ExpectedClaims {
    /// Required `iss`
    pub issuer: String,
    /// Audience that `aud` must contain
    pub audience: String,
    /// Clock-skew tolerance in seconds
    pub leeway: u64,
}

/// Parses tokens and validates them against cached JWKS
pub struct JwtHelper {
    fetcher: UrlFetcher,
    cache: Option<Arc<dyn CacheBackend>>,
    jwks_ttl: Option<std::time::Duration>,
    clock: Arc<dyn Clock>,
    additional_constraints: Option<Arc<dyn AdditionalTokenConstraints>>,
}

impl JwtHelper {
    /// Create a helper. `jwks_ttl == None` disables JWKS caching.
    #[must_use]
    pub fn new(
        fetcher: UrlFetcher,
        cache: Option<Arc<dyn CacheBackend>>,
        jwks_ttl: Option<std::time::Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            jwks_ttl,
            clock,
            additional_constraints: None,
        }
    }

    /// Install a deployment-specific constraints provider
    #[must_use]
    pub fn with_additional_constraints(
        mut self,
        constraints: Arc<dyn AdditionalTokenConstraints>,
    ) -> Self {
        self.additional_constraints = Some(constraints);
        self
    }

    /// Decode header and claims without verifying anything.
    ///
    /// Only use the result when trust is established another way, e.g. an ID
    /// token received directly from the token endpoint over TLS.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Malformed`] if the token is not a JWS
    /// compact serialization with JSON header and claims.
    pub fn parse_token(jwt: &str) -> std::result::Result<ParsedJwt, ValidationError> {
        let parts: Vec<&str> = jwt.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ValidationError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        }

        let header = jsonwebtoken::decode_header(jwt)
            .map_err(|e| ValidationError::Malformed(format!("header: {e}")))?;

        let payload = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|e| ValidationError::Malformed(format!("payload encoding: {e}")))?;
        let claims = serde_json::from_slice::<Map<String, Value>>(&payload)
            .map_err(|e| ValidationError::Malformed(format!("claims: {e}")))?;

        Ok(ParsedJwt { header, claims })
    }

    /// Verify `jwt` against the JWKS at `jwks_uri` and the expected claims.
    ///
    /// # Errors
    ///
    /// [`Error::TokenValidation`] naming the first failed constraint, or
    /// [`Error::ConfigurationResolve`] when the JWKS cannot be fetched.
    pub async fn validate_token(
        &self,
        jwt: &str,
        jwks_uri: &str,
        expected: &ExpectedClaims,
    ) -> Result<ParsedJwt> {
        let parsed = Self::parse_token(jwt)?;

        let kid = parsed
            .header
            .kid
            .clone()
            .ok_or(ValidationError::MissingKeyId)?;
        let alg = parsed.header.alg;
        if !is_asymmetric(alg) {
            return Err(ValidationError::UnsupportedAlgorithm(format!("{alg:?}")).into());
        }

        let key = self.find_decoding_key(&kid, alg, jwks_uri).await?;
        verify_signature(jwt, &key, alg)?;

        check_issuer(&parsed, &expected.issuer)?;
        check_audience(&parsed, &expected.audience)?;
        check_time_claims(&parsed, self.clock.now(), expected.leeway)?;

        if let Some(constraints) = &self.additional_constraints {
            constraints
                .validate(&parsed)
                .map_err(ValidationError::AdditionalConstraint)?;
        }

        debug!(kid = %kid, iss = %expected.issuer, "Token validated");
        Ok(parsed)
    }

    /// Find a decoding key by `kid`, refreshing the JWKS once if not found.
    async fn find_decoding_key(
        &self,
        kid: &str,
        alg: Algorithm,
        jwks_uri: &str,
    ) -> Result<DecodingKey> {
        let jwks = self.jwks(jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid, alg)? {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks(jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid, alg)?
            .ok_or_else(|| ValidationError::UnknownKeyId(kid.to_string()).into())
    }

    async fn jwks(&self, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet> {
        let cache = self.jwks_ttl.and(self.cache.as_deref());
        let expires_at = cache::expiry_after(self.clock.now(), self.jwks_ttl.unwrap_or_default());
        let key = format!("_oidc_gateway__jwks__{}", cache::sha256_hex(jwks_uri));

        cache::read_through(
            cache,
            self.clock.as_ref(),
            &key,
            force_refresh,
            || async {
                let body = self
                    .fetcher
                    .fetch_url(jwks_uri, &[])
                    .await
                    .map_err(|e| Error::resolve(format!("could not fetch JWKS from {jwks_uri}"), e))?;
                serde_json::from_str::<JwkSet>(&body)
                    .map_err(|e| Error::resolve(format!("invalid JWKS at {jwks_uri}"), e.into()))
            },
            |_| expires_at,
        )
        .await
    }
}

fn is_asymmetric(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
            | Algorithm::EdDSA
    )
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
///
/// `Ok(None)` means no key carries this id; a key that exists but cannot be
/// used with `alg` is an error.
fn find_key_in_jwks(
    jwks: &JwkSet,
    kid: &str,
    alg: Algorithm,
) -> std::result::Result<Option<DecodingKey>, ValidationError> {
    let Some(jwk) = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
    else {
        return Ok(None);
    };

    let mismatch = || ValidationError::AlgorithmMismatch {
        kid: kid.to_string(),
        alg: format!("{alg:?}"),
    };

    if let Some(declared) = &jwk.common.key_algorithm
        && format!("{declared:?}") != format!("{alg:?}")
    {
        return Err(mismatch());
    }

    let key = match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)?,
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)?,
        AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x)?,
        AlgorithmParameters::OctetKey(_) => {
            warn!(kid = %kid, "Symmetric key in JWKS ignored");
            return Err(mismatch());
        }
    };
    Ok(Some(key))
}

/// Check the signature only; claim checks run separately against our clock.
fn verify_signature(
    jwt: &str,
    key: &DecodingKey,
    alg: Algorithm,
) -> std::result::Result<(), ValidationError> {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    jsonwebtoken::decode::<Value>(jwt, key, &validation)?;
    Ok(())
}

fn check_issuer(token: &ParsedJwt, expected: &str) -> std::result::Result<(), ValidationError> {
    let actual = token
        .claim_str("iss")
        .ok_or(ValidationError::MissingClaim("iss"))?;
    if actual != expected {
        return Err(ValidationError::IssuerMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Validate that the token's `aud` claim contains the expected audience.
fn check_audience(token: &ParsedJwt, expected: &str) -> std::result::Result<(), ValidationError> {
    if token.audiences().contains(&expected) {
        Ok(())
    } else {
        Err(ValidationError::AudienceMismatch {
            expected: expected.to_string(),
        })
    }
}

/// `exp` is required; `nbf` is checked when present.
pub(crate) fn check_time_claims(
    token: &ParsedJwt,
    now: DateTime<Utc>,
    leeway: u64,
) -> std::result::Result<(), ValidationError> {
    let now_secs = now.timestamp();
    let skew = i64::try_from(leeway).unwrap_or(i64::MAX);

    let exp = token
        .numeric_claim("exp")
        .ok_or(ValidationError::MissingClaim("exp"))?;
    if exp <= now_secs.saturating_sub(skew) {
        return Err(ValidationError::Expired {
            exp,
            now: now_secs,
            leeway,
        });
    }

    if let Some(nbf) = token.numeric_claim("nbf")
        && nbf > now_secs.saturating_add(skew)
    {
        return Err(ValidationError::NotYetValid {
            nbf,
            now: now_secs,
            leeway,
        });
    }
    Ok(())
}
