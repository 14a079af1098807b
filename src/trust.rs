//! Trust gate: client-certificate validation against configured issuers and anchors
// src/trust.rs
use crate::constants;
use crate::error::DirectoryError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::{parse_x509_certificate, parse_x509_crl, FromDer, X509Name};

/// Outcome of validating one presented certificate chain. An unsuccessful
/// result is a normal answer (the request is rejected); only conditions the
/// operator must hear about surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustValidationResult {
    pub success: bool,
    /// Stable identity of the accepted client, present only on success.
    pub client_id: Option<String>,
}

impl TrustValidationResult {
    fn success(client_id: String) -> Self {
        Self {
            success: true,
            client_id: Some(client_id),
        }
    }

    fn failure() -> Self {
        Self {
            success: false,
            client_id: None,
        }
    }
}

/// Static trust-gate configuration, loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct TrustGateConfig {
    /// With the gate disabled every request passes with a fixed debug
    /// identity. Never enable this outside local development.
    pub enabled: bool,
    /// Distinguished-name patterns a client certificate's issuer must match,
    /// e.g. "CN=Example Issuing CA,O=Example,C=NO".
    pub allowed_issuers: Vec<String>,
    /// DER-encoded certificates of the CAs trusted to sign clients.
    pub trust_anchors: Vec<Vec<u8>>,
    /// DER-encoded CRLs; a listed serial is rejected.
    pub revocation_lists: Vec<Vec<u8>>,
}

impl TrustGateConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Decodes a PEM bundle into the DER blocks it contains.
    pub fn pem_to_der(pem: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut blocks = Vec::new();
        for entry in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let pem = entry.context("Invalid PEM block")?;
            blocks.push(pem.contents);
        }
        Ok(blocks)
    }
}

/// A parsed issuer distinguished-name pattern. All attributes given in the
/// pattern must be present with equal values in the candidate name; the
/// candidate may carry extra attributes.
#[derive(Debug, Clone)]
struct DnPattern {
    attributes: Vec<(DnAttribute, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DnAttribute {
    CommonName,
    Organization,
    OrganizationalUnit,
    Country,
    Locality,
    State,
}

impl DnPattern {
    fn parse(pattern: &str) -> Result<Self, DirectoryError> {
        let mut attributes = Vec::new();
        for part in pattern.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(DirectoryError::invalid_config(format!(
                    "issuer pattern '{}': expected KEY=value pairs",
                    pattern
                )));
            };
            let attribute = match key.trim().to_ascii_uppercase().as_str() {
                "CN" => DnAttribute::CommonName,
                "O" => DnAttribute::Organization,
                "OU" => DnAttribute::OrganizationalUnit,
                "C" => DnAttribute::Country,
                "L" => DnAttribute::Locality,
                "ST" => DnAttribute::State,
                other => {
                    return Err(DirectoryError::invalid_config(format!(
                        "issuer pattern '{}': unsupported attribute '{}'",
                        pattern, other
                    )))
                }
            };
            attributes.push((attribute, value.trim().to_string()));
        }
        if attributes.is_empty() {
            return Err(DirectoryError::invalid_config(format!(
                "issuer pattern '{}' is empty",
                pattern
            )));
        }
        Ok(Self { attributes })
    }

    fn matches(&self, name: &X509Name) -> bool {
        self.attributes.iter().all(|(attribute, expected)| {
            let values = match attribute {
                DnAttribute::CommonName => collect(name.iter_common_name()),
                DnAttribute::Organization => collect(name.iter_organization()),
                DnAttribute::OrganizationalUnit => collect(name.iter_organizational_unit()),
                DnAttribute::Country => collect(name.iter_country()),
                DnAttribute::Locality => collect(name.iter_locality()),
                DnAttribute::State => collect(name.iter_state_or_province()),
            };
            values.iter().any(|v| v == expected)
        })
    }
}

fn collect<'a>(
    iter: impl Iterator<Item = &'a x509_parser::x509::AttributeTypeAndValue<'a>>,
) -> Vec<String> {
    iter.filter_map(|attr| attr.as_str().ok().map(|s| s.to_string()))
        .collect()
}

/// Validates presented client certificate chains. All trust material is
/// parsed and checked once at startup; a bad configuration refuses to come
/// up rather than silently letting everything through.
#[derive(Debug)]
pub struct TrustGate {
    enabled: bool,
    issuer_patterns: Vec<DnPattern>,
    trust_anchors: Vec<Vec<u8>>,
    revoked_serials: Vec<Vec<u8>>,
}

impl TrustGate {
    pub fn new(config: TrustGateConfig) -> Result<Self> {
        if !config.enabled {
            warn!("trust gate: DISABLED, all clients pass with a debug identity");
            return Ok(Self {
                enabled: false,
                issuer_patterns: Vec::new(),
                trust_anchors: Vec::new(),
                revoked_serials: Vec::new(),
            });
        }
        if config.allowed_issuers.is_empty() {
            return Err(DirectoryError::invalid_config(
                "trust gate enabled but no allowed issuers configured",
            )
            .into());
        }
        if config.trust_anchors.is_empty() {
            return Err(DirectoryError::invalid_config(
                "trust gate enabled but no trust anchors configured",
            )
            .into());
        }
        let issuer_patterns = config
            .allowed_issuers
            .iter()
            .map(|p| DnPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        for (n, anchor) in config.trust_anchors.iter().enumerate() {
            parse_x509_certificate(anchor)
                .map_err(|e| DirectoryError::invalid_config(format!("trust anchor {}: {}", n, e)))?;
        }
        let mut revoked_serials = Vec::new();
        for (n, crl) in config.revocation_lists.iter().enumerate() {
            let (_, crl) = parse_x509_crl(crl)
                .map_err(|e| DirectoryError::invalid_config(format!("revocation list {}: {}", n, e)))?;
            for revoked in crl.iter_revoked_certificates() {
                revoked_serials.push(revoked.raw_serial().to_vec());
            }
        }
        info!(
            "trust gate: enabled with {} issuers, {} anchors, {} revoked serials",
            issuer_patterns.len(),
            config.trust_anchors.len(),
            revoked_serials.len()
        );
        Ok(Self {
            enabled: true,
            issuer_patterns,
            trust_anchors: config.trust_anchors,
            revoked_serials,
        })
    }

    /// Validates a presented chain of DER-encoded certificates.
    ///
    /// The client certificate is the first chain entry whose issuer matches
    /// an allowed issuer pattern. No entry matching any pattern is an error
    /// (the `NoMatchingIssuer` kind), not a plain rejection: it means the
    /// caller talked to the wrong gate and someone should notice. Expired,
    /// revoked or unverifiable certificates yield an unsuccessful result.
    pub fn validate(&self, chain: &[Vec<u8>]) -> Result<TrustValidationResult> {
        if !self.enabled {
            return Ok(TrustValidationResult::success(
                constants::DISABLED_TRUST_CLIENT_ID.to_string(),
            ));
        }
        if chain.is_empty() {
            debug!("trust gate: empty chain presented");
            return Ok(TrustValidationResult::failure());
        }

        let mut client: Option<X509Certificate> = None;
        for der in chain {
            let Ok((_, cert)) = parse_x509_certificate(der) else {
                continue;
            };
            if self.issuer_patterns.iter().any(|p| p.matches(cert.issuer())) {
                client = Some(cert);
                break;
            }
        }
        let Some(client) = client else {
            return Err(DirectoryError::NoMatchingIssuer.into());
        };

        if !client.validity().is_valid() {
            debug!("trust gate: certificate outside its validity window");
            return Ok(TrustValidationResult::failure());
        }
        let serial = client.raw_serial();
        if self.revoked_serials.iter().any(|s| s == serial) {
            warn!("trust gate: revoked certificate presented, serial {:X}", client.serial);
            return Ok(TrustValidationResult::failure());
        }

        // Signature must verify against at least one configured anchor.
        // Issuer-name equality alone proves nothing.
        for anchor_der in &self.trust_anchors {
            let Ok((_, anchor)) = X509Certificate::from_der(anchor_der) else {
                continue;
            };
            if client.verify_signature(Some(anchor.public_key())).is_ok() {
                let client_id = canonical_client_id(&client);
                debug!("trust gate: accepted {}", client_id);
                return Ok(TrustValidationResult::success(client_id));
            }
        }
        debug!("trust gate: signature did not verify against any anchor");
        Ok(TrustValidationResult::failure())
    }
}

/// Stable client identity: canonically ordered subject attributes plus the
/// certificate serial, so a re-issued certificate gets a new identity.
fn canonical_client_id(cert: &X509Certificate) -> String {
    let subject = cert.subject();
    let mut parts = Vec::new();
    for (label, values) in [
        ("C", collect(subject.iter_country())),
        ("O", collect(subject.iter_organization())),
        ("CN", collect(subject.iter_common_name())),
    ] {
        if let Some(value) = values.into_iter().next() {
            parts.push(format!("{}={}", label, value));
        }
    }
    format!("{}:{:X}", parts.join(","), cert.serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    fn ca(common_name: &str) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name.push(DnType::OrganizationName, "Testing");
        params.distinguished_name.push(DnType::CountryName, "NO");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        (cert, key)
    }

    fn client(common_name: &str, ca: &(rcgen::Certificate, KeyPair)) -> Vec<u8> {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name.push(DnType::OrganizationName, "Client Org");
        params.distinguished_name.push(DnType::CountryName, "NO");
        let cert = params.signed_by(&key, &ca.0, &ca.1).unwrap();
        cert.der().to_vec()
    }

    const ISSUER_PATTERN: &str = "CN=Test Issuing CA,O=Testing,C=NO";

    fn gate(anchors: Vec<Vec<u8>>) -> TrustGate {
        TrustGate::new(TrustGateConfig {
            enabled: true,
            allowed_issuers: vec![ISSUER_PATTERN.to_string()],
            trust_anchors: anchors,
            revocation_lists: vec![],
        })
        .unwrap()
    }

    #[test]
    fn test_disabled_gate_passes_with_debug_identity() {
        let gate = TrustGate::new(TrustGateConfig::disabled()).unwrap();
        let result = gate.validate(&[]).unwrap();
        assert!(result.success);
        assert_eq!(
            result.client_id.as_deref(),
            Some(constants::DISABLED_TRUST_CLIENT_ID)
        );
    }

    #[test]
    fn test_enabled_gate_requires_issuers_and_anchors() {
        let err = TrustGate::new(TrustGateConfig {
            enabled: true,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DirectoryError>(),
            Some(DirectoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_valid_client_is_accepted_with_identity() {
        let issuing = ca("Test Issuing CA");
        let gate = gate(vec![issuing.0.der().to_vec()]);
        let result = gate.validate(&[client("good-client", &issuing)]).unwrap();
        assert!(result.success);
        let id = result.client_id.unwrap();
        assert!(id.contains("CN=good-client"), "unexpected identity {}", id);
        assert!(id.contains(':'));
    }

    #[test]
    fn test_no_matching_issuer_is_an_error_not_a_rejection() {
        let issuing = ca("Test Issuing CA");
        let other = ca("Entirely Different CA");
        let gate = gate(vec![issuing.0.der().to_vec()]);
        let err = gate.validate(&[client("client", &other)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DirectoryError>(),
            Some(DirectoryError::NoMatchingIssuer)
        ));
    }

    #[test]
    fn test_same_issuer_name_different_key_is_rejected() {
        let issuing = ca("Test Issuing CA");
        // impostor CA with the identical distinguished name
        let impostor = ca("Test Issuing CA");
        let gate = gate(vec![issuing.0.der().to_vec()]);
        let result = gate.validate(&[client("client", &impostor)]).unwrap();
        assert!(!result.success);
        assert!(result.client_id.is_none());
    }

    #[test]
    fn test_second_anchor_also_verifies() {
        let first = ca("Test Issuing CA");
        let second = ca("Test Issuing CA");
        let gate = gate(vec![first.0.der().to_vec(), second.0.der().to_vec()]);
        let result = gate.validate(&[client("client", &second)]).unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_empty_chain_is_a_plain_rejection() {
        let issuing = ca("Test Issuing CA");
        let gate = gate(vec![issuing.0.der().to_vec()]);
        let result = gate.validate(&[]).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_bad_issuer_pattern_is_rejected_at_startup() {
        let issuing = ca("Test Issuing CA");
        let err = TrustGate::new(TrustGateConfig {
            enabled: true,
            allowed_issuers: vec!["not a pattern".to_string()],
            trust_anchors: vec![issuing.0.der().to_vec()],
            revocation_lists: vec![],
        })
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DirectoryError>(),
            Some(DirectoryError::InvalidConfig(_))
        ));
    }
}
