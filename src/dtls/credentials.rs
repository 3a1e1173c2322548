//! Credential routing for DTLS sessions, mirroring
//! `dtls_abstraction.h`'s `DTLS_SetPSK`/`DTLS_SetCertificate` pair: a
//! session is configured with exactly one of a pre-shared key or a
//! certificate/private-key pair before any handshake can proceed.

/// Format tag for a certificate credential, matching
/// `DTLS_SetCertificate`'s format argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateFormat {
  /// DER-encoded X.509 certificate.
  Der,
  /// PEM-encoded X.509 certificate.
  Pem,
}

/// Credentials a [`crate::dtls::session::SessionCache`] uses to
/// authenticate both sides of the handshake.
#[derive(Debug, Clone)]
pub enum Credentials {
  /// Pre-shared key: an identity hint and the shared secret bytes.
  Psk {
    /// PSK identity hint advertised during the handshake.
    identity: String,
    /// The shared secret itself.
    key: Vec<u8>,
  },
  /// Certificate-based: a leaf certificate plus its private key, in the
  /// given encoding.
  Certificate {
    /// Certificate bytes, encoded per `format`.
    certificate: Vec<u8>,
    /// Private key bytes, encoded per `format`.
    private_key: Vec<u8>,
    /// Encoding shared by `certificate` and `private_key`.
    format: CertificateFormat,
  },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn psk_credentials_carry_identity_and_key() {
    let creds = Credentials::Psk { identity: "device-1".into(),
                                    key: vec![1, 2, 3, 4] };
    match creds {
      | Credentials::Psk { identity, key } => {
        assert_eq!(identity, "device-1");
        assert_eq!(key, vec![1, 2, 3, 4]);
      },
      | _ => panic!("expected Psk"),
    }
  }
}
