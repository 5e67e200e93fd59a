use std::path::Path;

use base64::{URL_SAFE_NO_PAD, encode_config};
use jwt_simple::prelude::ES256KeyPair;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use crate::error::KeyError;

pub const PUBLIC_KEY_FILE: &str = "key.public";
pub const PRIVATE_KEY_FILE: &str = "key.private";

/// The server's P-256 key pair, used to sign delivery tokens.
///
/// Persisted as X.509 SubjectPublicKeyInfo and PKCS#8 DER so the same
/// application server key survives restarts; browsers bind their
/// subscriptions to it.
pub struct ServerIdentity {
    public_key_uncompressed: Vec<u8>,
    public_key_base64: String,
    signing_key: ES256KeyPair,
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("public_key", &self.public_key_base64)
            .finish_non_exhaustive()
    }
}

impl ServerIdentity {
    pub fn load_or_generate(dir: &Path) -> Result<Self, KeyError> {
        let mut rng = OsRng;
        Self::load_or_generate_with_rng(dir, &mut rng)
    }

    pub(crate) fn load_or_generate_with_rng<R: RngCore + CryptoRng>(
        dir: &Path,
        rng: &mut R,
    ) -> Result<Self, KeyError> {
        let public_path = dir.join(PUBLIC_KEY_FILE);
        let private_path = dir.join(PRIVATE_KEY_FILE);

        match (public_path.exists(), private_path.exists()) {
            (true, true) => {
                let identity = Self::load(&public_path, &private_path)?;
                tracing::info!(dir = %dir.display(), "loaded server key pair");
                Ok(identity)
            }
            (false, false) => {
                let secret = SecretKey::random(rng);
                write_key_pair(dir, &secret, &public_path, &private_path)?;
                tracing::info!(dir = %dir.display(), "generated new server key pair");
                Self::from_secret(secret)
            }
            (true, false) => Err(KeyError::Partial {
                present: public_path,
                missing: private_path,
            }),
            (false, true) => Err(KeyError::Partial {
                present: private_path,
                missing: public_path,
            }),
        }
    }

    fn load(public_path: &Path, private_path: &Path) -> Result<Self, KeyError> {
        let public_der = read_key_file(public_path)?;
        let private_der = read_key_file(private_path)?;

        let public_key =
            PublicKey::from_public_key_der(&public_der).map_err(|err| KeyError::Corrupt {
                path: public_path.to_path_buf(),
                reason: err.to_string(),
            })?;
        let secret =
            SecretKey::from_pkcs8_der(&private_der).map_err(|err| KeyError::Corrupt {
                path: private_path.to_path_buf(),
                reason: err.to_string(),
            })?;
        if secret.public_key() != public_key {
            return Err(KeyError::Mismatch);
        }
        Self::from_secret(secret)
    }

    fn from_secret(secret: SecretKey) -> Result<Self, KeyError> {
        let public_key = secret.public_key();
        let public_key_uncompressed = public_key.to_encoded_point(false).as_bytes().to_vec();
        let public_key_base64 = encode_config(&public_key_uncompressed, URL_SAFE_NO_PAD);
        let signing_key = ES256KeyPair::from_bytes(secret.to_bytes().as_slice())
            .map_err(|err| KeyError::Encode(err.to_string()))?;
        Ok(Self {
            public_key_uncompressed,
            public_key_base64,
            signing_key,
        })
    }

    /// Uncompressed SEC1 point, 65 bytes.
    pub fn public_key_uncompressed(&self) -> &[u8] {
        &self.public_key_uncompressed
    }

    /// Unpadded base64url form of [`Self::public_key_uncompressed`].
    pub fn public_key_base64(&self) -> &str {
        &self.public_key_base64
    }

    pub(crate) fn signing_key(&self) -> &ES256KeyPair {
        &self.signing_key
    }
}

fn read_key_file(path: &Path) -> Result<Vec<u8>, KeyError> {
    std::fs::read(path).map_err(|source| KeyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_key_pair(
    dir: &Path,
    secret: &SecretKey,
    public_path: &Path,
    private_path: &Path,
) -> Result<(), KeyError> {
    let private_der = secret
        .to_pkcs8_der()
        .map_err(|err| KeyError::Encode(err.to_string()))?;
    let public_der = secret
        .public_key()
        .to_public_key_der()
        .map_err(|err| KeyError::Encode(err.to_string()))?;

    std::fs::create_dir_all(dir).map_err(|source| KeyError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    std::fs::write(private_path, private_der.as_bytes()).map_err(|source| KeyError::Write {
        path: private_path.to_path_buf(),
        source,
    })?;
    std::fs::write(public_path, public_der.as_bytes()).map_err(|source| KeyError::Write {
        path: public_path.to_path_buf(),
        source,
    })
}
