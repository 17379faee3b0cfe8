//! Built-in crypto provider backed by a keystore file.
//!
//! Three formats are read, selected by the keystore type:
//!
//! - `pem`: a sequence of PEM blocks. Explanatory text of the form
//!   `alias: <name>` names the CERTIFICATE block that follows it; a
//!   certificate without such a line is known by its subject CN. Unencrypted
//!   private keys (`PRIVATE KEY`, `RSA PRIVATE KEY`) are paired with the
//!   certificate whose public key they match. An `ENCRYPTED PRIVATE KEY`
//!   belongs to the certificate just before it.
//! - `jks`: a Java KeyStore. The keystore password checks the store digest.
//! - `pkcs12`: a PKCS#12 file, opened with the keystore password. Aliases
//!   are the friendly names.
//!
//! Protected PEM and JKS keys are opened with the credential password, or
//! the keystore password when the credential password does not fit.

use crate::algorithm::{DigestAlgorithm, KeyTransportAlgorithm, SignatureAlgorithm, SymmetricAlgorithm};
use crate::crypto::{Crypto, CryptoConfiguration, CryptoProvider, RsaKeyValue, X509Credential};
use crate::error::WssError;
use crate::jks;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use p12_keystore::{KeyStore, KeyStoreEntry};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};
use tracing::{debug, warn};
use x509_cert::Certificate;

pub const PEM_KEYSTORE_TYPE: &str = "pem";
pub const JKS_KEYSTORE_TYPE: &str = "jks";
pub const PKCS12_KEYSTORE_TYPE: &str = "pkcs12";

const SUBJECT_KEY_IDENTIFIER_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");
const COMMON_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Reads the configured keystore on every `create_handle` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeystoreProvider;

impl CryptoProvider for KeystoreProvider {
    fn create_handle(&self, configuration: &CryptoConfiguration) -> Result<Box<dyn Crypto>, WssError> {
        let keystore_type = configuration.keystore_type().to_ascii_lowercase();
        if !matches!(
            keystore_type.as_str(),
            PEM_KEYSTORE_TYPE | JKS_KEYSTORE_TYPE | PKCS12_KEYSTORE_TYPE | "p12"
        ) {
            return Err(WssError::CryptoInit(format!(
                "unsupported keystore type '{}' (supported: {}, {}, {})",
                keystore_type, PEM_KEYSTORE_TYPE, JKS_KEYSTORE_TYPE, PKCS12_KEYSTORE_TYPE
            )));
        }

        let path = configuration
            .keystore_file()
            .ok_or_else(|| WssError::CryptoInit("no keystore file configured".to_string()))?;
        let data = std::fs::read(path)
            .map_err(|e| WssError::CryptoInit(format!("cannot read keystore '{}': {}", path, e)))?;
        let password = configuration.keystore_password();

        let keystore = match keystore_type.as_str() {
            PEM_KEYSTORE_TYPE => {
                let text = std::str::from_utf8(&data)
                    .map_err(|e| WssError::CryptoInit(format!("PEM keystore is not UTF-8: {}", e)))?;
                Keystore::from_pem(text, password)?
            }
            JKS_KEYSTORE_TYPE => Keystore::from_jks(&data, password)?,
            _ => Keystore::from_pkcs12(&data, password)?,
        };
        debug!(
            path,
            keystore_type = %keystore_type,
            entries = keystore.entries.len(),
            "Loaded keystore"
        );
        Ok(Box::new(keystore))
    }
}

enum PrivateKeyMaterial {
    Plain(RsaPrivateKey),
    /// PKCS#8 `EncryptedPrivateKeyInfo` from a PEM bundle
    Pkcs8Encrypted(Vec<u8>),
    /// Sun key protector output from a JKS file
    JksProtected(Vec<u8>),
}

impl PrivateKeyMaterial {
    fn open(&self, password: &str) -> Option<RsaPrivateKey> {
        match self {
            Self::Plain(key) => Some(key.clone()),
            Self::Pkcs8Encrypted(der) => RsaPrivateKey::from_pkcs8_encrypted_der(der, password).ok(),
            Self::JksProtected(protected) => jks::recover_key(protected, password)
                .and_then(|der| RsaPrivateKey::from_pkcs8_der(&der).ok()),
        }
    }
}

struct KeystoreEntry {
    alias: String,
    certificate_der: Vec<u8>,
    certificate: Certificate,
    public_key: RsaPublicKey,
    private_key: Option<PrivateKeyMaterial>,
}

impl KeystoreEntry {
    fn from_der(alias: Option<String>, certificate_der: Vec<u8>) -> Result<Self, WssError> {
        let certificate = Certificate::from_der(&certificate_der)
            .map_err(|e| WssError::CryptoInit(format!("invalid certificate: {}", e)))?;
        let spki_der = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| WssError::CryptoInit(format!("invalid certificate key: {}", e)))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki_der)
            .map_err(|e| WssError::CryptoInit(format!("certificate key is not RSA: {}", e)))?;

        let alias = match alias {
            Some(alias) => alias,
            None => common_name(&certificate).ok_or_else(|| {
                WssError::CryptoInit("certificate has neither an alias line nor a subject CN".to_string())
            })?,
        };

        Ok(Self {
            alias,
            certificate_der,
            certificate,
            public_key,
            private_key: None,
        })
    }

    fn credential(&self) -> X509Credential {
        let tbs = &self.certificate.tbs_certificate;
        X509Credential {
            alias: self.alias.clone(),
            certificate_der: self.certificate_der.clone(),
            issuer_name: tbs.issuer.to_string(),
            serial_number: BigUint::from_bytes_be(tbs.serial_number.as_bytes()).to_string(),
            subject_key_identifier: subject_key_identifier(&self.certificate),
            key_value: Some(RsaKeyValue {
                modulus: self.public_key.n().to_bytes_be(),
                exponent: self.public_key.e().to_bytes_be(),
            }),
        }
    }
}

/// Certificates and keys loaded from one keystore file.
pub struct Keystore {
    entries: Vec<KeystoreEntry>,
    keystore_password: Option<String>,
}

struct PemBlock {
    alias: Option<String>,
    label: String,
    der: Vec<u8>,
}

impl Keystore {
    pub fn from_pem(data: &str, keystore_password: Option<&str>) -> Result<Self, WssError> {
        let mut entries: Vec<KeystoreEntry> = Vec::new();
        let mut plain_keys = Vec::new();
        let mut orphan_key: Option<Vec<u8>> = None;

        for block in split_blocks(data)? {
            match block.label.as_str() {
                "CERTIFICATE" => {
                    let mut entry = KeystoreEntry::from_der(block.alias, block.der)?;
                    if let Some(der) = orphan_key.take() {
                        entry.private_key = Some(PrivateKeyMaterial::Pkcs8Encrypted(der));
                    }
                    entries.push(entry);
                }
                "PRIVATE KEY" => plain_keys.push(
                    RsaPrivateKey::from_pkcs8_der(&block.der)
                        .map_err(|e| WssError::CryptoInit(format!("invalid PKCS#8 private key: {}", e)))?,
                ),
                "RSA PRIVATE KEY" => plain_keys.push(
                    RsaPrivateKey::from_pkcs1_der(&block.der)
                        .map_err(|e| WssError::CryptoInit(format!("invalid PKCS#1 private key: {}", e)))?,
                ),
                "ENCRYPTED PRIVATE KEY" => match entries.last_mut() {
                    Some(entry) if entry.private_key.is_none() => {
                        entry.private_key = Some(PrivateKeyMaterial::Pkcs8Encrypted(block.der));
                    }
                    _ if orphan_key.is_none() => orphan_key = Some(block.der),
                    _ => {
                        return Err(WssError::CryptoInit(
                            "encrypted private key has no certificate".to_string(),
                        ))
                    }
                },
                other => debug!(label = other, "Skipping PEM block"),
            }
        }

        if orphan_key.is_some() {
            return Err(WssError::CryptoInit(
                "encrypted private key has no certificate".to_string(),
            ));
        }

        for key in plain_keys {
            let public_key = key.to_public_key();
            match entries.iter_mut().find(|e| e.public_key == public_key) {
                Some(entry) => entry.private_key = Some(PrivateKeyMaterial::Plain(key)),
                None => warn!("Private key does not match any certificate in the keystore, ignoring"),
            }
        }

        let mut keystore = Self::new(entries, keystore_password)?;
        keystore.unlock_with_keystore_password()?;
        Ok(keystore)
    }

    pub fn from_jks(data: &[u8], keystore_password: Option<&str>) -> Result<Self, WssError> {
        let mut entries = Vec::new();
        for jks_entry in jks::parse(data, keystore_password)? {
            let certificate_der = jks_entry
                .certificate_chain
                .into_iter()
                .next()
                .ok_or_else(|| WssError::CryptoInit(format!("alias '{}' has no certificate", jks_entry.alias)))?;
            let mut entry = KeystoreEntry::from_der(Some(jks_entry.alias), certificate_der)?;
            entry.private_key = jks_entry.protected_key.map(PrivateKeyMaterial::JksProtected);
            entries.push(entry);
        }
        Self::new(entries, keystore_password)
    }

    pub fn from_pkcs12(data: &[u8], keystore_password: Option<&str>) -> Result<Self, WssError> {
        let store = KeyStore::from_pkcs12(data, keystore_password.unwrap_or_default()).map_err(|e| {
            WssError::CryptoInit(format!(
                "cannot open PKCS#12 keystore (wrong keystore password?): {}",
                e
            ))
        })?;

        let mut entries = Vec::new();
        for (alias, store_entry) in store.entries() {
            let entry = match store_entry {
                KeyStoreEntry::PrivateKeyChain(chain) => {
                    let certificate = chain.chain().first().ok_or_else(|| {
                        WssError::CryptoInit(format!("alias '{}' has no certificate", alias))
                    })?;
                    let mut entry = KeystoreEntry::from_der(Some(alias.clone()), certificate.as_der().to_vec())?;
                    let key = RsaPrivateKey::from_pkcs8_der(chain.key()).map_err(|e| {
                        WssError::CryptoInit(format!("invalid private key for alias '{}': {}", alias, e))
                    })?;
                    entry.private_key = Some(PrivateKeyMaterial::Plain(key));
                    entry
                }
                KeyStoreEntry::Certificate(certificate) => {
                    KeystoreEntry::from_der(Some(alias.clone()), certificate.as_der().to_vec())?
                }
            };
            entries.push(entry);
        }
        Self::new(entries, keystore_password)
    }

    fn new(entries: Vec<KeystoreEntry>, keystore_password: Option<&str>) -> Result<Self, WssError> {
        if entries.is_empty() {
            return Err(WssError::CryptoInit("keystore contains no certificates".to_string()));
        }
        Ok(Self {
            entries,
            keystore_password: keystore_password.map(str::to_string),
        })
    }

    /// Open encrypted PEM keys with the keystore password, so that a
    /// keystore password which opens none of them fails here.
    fn unlock_with_keystore_password(&mut self) -> Result<(), WssError> {
        let Some(password) = self.keystore_password.clone() else {
            return Ok(());
        };

        let mut locked = 0;
        let mut opened = 0;
        for entry in &mut self.entries {
            let Some(material @ PrivateKeyMaterial::Pkcs8Encrypted(_)) = &entry.private_key else {
                continue;
            };
            locked += 1;
            if let Some(key) = material.open(&password) {
                if key.to_public_key() != entry.public_key {
                    return Err(WssError::CryptoInit(format!(
                        "private key for alias '{}' does not match its certificate",
                        entry.alias
                    )));
                }
                entry.private_key = Some(PrivateKeyMaterial::Plain(key));
                opened += 1;
            }
        }

        if locked > 0 && opened == 0 {
            return Err(WssError::CryptoInit(
                "keystore password does not open any private key in the keystore".to_string(),
            ));
        }
        Ok(())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.alias.as_str())
    }

    fn entry(&self, alias: &str) -> Result<&KeystoreEntry, WssError> {
        self.entries
            .iter()
            .find(|e| e.alias.eq_ignore_ascii_case(alias))
            .ok_or_else(|| WssError::SecurityApply(format!("no certificate found for alias '{}'", alias)))
    }

    fn private_key(&self, entry: &KeystoreEntry, password: Option<&str>) -> Result<RsaPrivateKey, WssError> {
        let material = match &entry.private_key {
            Some(PrivateKeyMaterial::Plain(key)) => return Ok(key.clone()),
            Some(material) => material,
            None => {
                return Err(WssError::SecurityApply(format!(
                    "no private key stored for alias '{}'",
                    entry.alias
                )))
            }
        };

        let candidates: Vec<&str> = password
            .into_iter()
            .chain(self.keystore_password.as_deref())
            .collect();
        if candidates.is_empty() {
            return Err(WssError::SecurityApply(format!(
                "private key for alias '{}' is encrypted and no password is configured",
                entry.alias
            )));
        }

        for candidate in candidates {
            if let Some(key) = material.open(candidate) {
                if key.to_public_key() != entry.public_key {
                    return Err(WssError::SecurityApply(format!(
                        "private key for alias '{}' does not match its certificate",
                        entry.alias
                    )));
                }
                return Ok(key);
            }
        }
        Err(WssError::SecurityApply(format!(
            "cannot decrypt private key for alias '{}': wrong password",
            entry.alias
        )))
    }
}

impl Crypto for Keystore {
    fn certificate(&self, alias: &str) -> Result<X509Credential, WssError> {
        Ok(self.entry(alias)?.credential())
    }

    fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>, WssError> {
        Ok(digest(algorithm, data))
    }

    fn sign(
        &self,
        alias: &str,
        password: Option<&str>,
        algorithm: SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, WssError> {
        let entry = self.entry(alias)?;
        let key = self.private_key(entry, password)?;

        let signature = match algorithm {
            SignatureAlgorithm::RsaSha1 => pkcs1v15::SigningKey::<Sha1>::new(key)
                .try_sign(data)
                .map(|s| s.to_vec()),
            SignatureAlgorithm::RsaSha256 => pkcs1v15::SigningKey::<Sha256>::new(key)
                .try_sign(data)
                .map(|s| s.to_vec()),
            SignatureAlgorithm::RsaSha512 => pkcs1v15::SigningKey::<Sha512>::new(key)
                .try_sign(data)
                .map(|s| s.to_vec()),
        };
        signature.map_err(|e| WssError::SecurityApply(format!("RSA signing failed: {}", e)))
    }

    fn generate_key(&self, algorithm: SymmetricAlgorithm) -> Result<Vec<u8>, WssError> {
        let mut key = vec![0u8; algorithm.key_len()];
        rand::thread_rng().fill_bytes(&mut key);
        Ok(key)
    }

    fn encrypt_key(
        &self,
        alias: &str,
        algorithm: KeyTransportAlgorithm,
        key: &[u8],
    ) -> Result<Vec<u8>, WssError> {
        let public_key = &self.entry(alias)?.public_key;
        let mut rng = rand::thread_rng();
        let wrapped = match algorithm {
            KeyTransportAlgorithm::Rsa15 => public_key.encrypt(&mut rng, Pkcs1v15Encrypt, key),
            KeyTransportAlgorithm::RsaOaepMgf1p => public_key.encrypt(&mut rng, Oaep::new::<Sha1>(), key),
        };
        wrapped.map_err(|e| WssError::SecurityApply(format!("key transport failed: {}", e)))
    }

    fn encrypt_data(
        &self,
        algorithm: SymmetricAlgorithm,
        key: &[u8],
        data: &[u8],
    ) -> Result<Vec<u8>, WssError> {
        if key.len() != algorithm.key_len() {
            return Err(WssError::SecurityApply(format!(
                "{} needs a {}-byte key, got {}",
                algorithm,
                algorithm.key_len(),
                key.len()
            )));
        }
        aes_cbc_encrypt(algorithm, key, data)
    }
}

/// Split a bundle into PEM blocks, attaching `alias:` lines to the next
/// certificate.
fn split_blocks(data: &str) -> Result<Vec<PemBlock>, WssError> {
    let mut blocks = Vec::new();
    let mut pending_alias: Option<String> = None;
    let mut current: Option<Vec<&str>> = None;

    for line in data.lines() {
        let line = line.trim();

        if let Some(mut lines) = current.take() {
            lines.push(line);
            if line.starts_with("-----END ") {
                let text = lines.join("\n");
                let (label, der) = pem_rfc7468::decode_vec(text.as_bytes())
                    .map_err(|e| WssError::CryptoInit(format!("malformed PEM block: {}", e)))?;
                let alias = if label == "CERTIFICATE" {
                    pending_alias.take()
                } else {
                    None
                };
                blocks.push(PemBlock {
                    alias,
                    label: label.to_string(),
                    der,
                });
            } else {
                current = Some(lines);
            }
            continue;
        }

        if line.starts_with("-----BEGIN ") {
            current = Some(vec![line]);
        } else if let Some(alias) = line.strip_prefix("alias:") {
            let alias = alias.trim();
            if !alias.is_empty() {
                pending_alias = Some(alias.to_string());
            }
        }
    }

    if current.is_some() {
        return Err(WssError::CryptoInit("unterminated PEM block".to_string()));
    }
    Ok(blocks)
}

fn common_name(certificate: &Certificate) -> Option<String> {
    certificate
        .tbs_certificate
        .subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == COMMON_NAME_OID)
        // UTF8String, PrintableString and IA5String all carry their text verbatim
        .and_then(|atv| std::str::from_utf8(atv.value.value()).ok())
        .map(str::to_string)
}

/// SubjectKeyIdentifier extension value, or the SHA-1 of the public key bits
/// when the certificate has none.
fn subject_key_identifier(certificate: &Certificate) -> Vec<u8> {
    let tbs = &certificate.tbs_certificate;
    tbs.extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == SUBJECT_KEY_IDENTIFIER_OID)
        .and_then(|ext| OctetString::from_der(ext.extn_value.as_bytes()).ok())
        .map(|ski| ski.as_bytes().to_vec())
        .unwrap_or_else(|| {
            Sha1::digest(tbs.subject_public_key_info.subject_public_key.raw_bytes()).to_vec()
        })
}

fn digest(algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// AES-CBC with a random IV prepended. PKCS#7 padding fills the last block
/// the way XML Encryption expects: the final byte holds the pad length.
fn aes_cbc_encrypt(algorithm: SymmetricAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>, WssError> {
    use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, InvalidLength, KeyIvInit};

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let init_failed = |e: InvalidLength| WssError::SecurityApply(format!("AES-CBC init failed: {}", e));

    let encrypted = match algorithm {
        SymmetricAlgorithm::Aes128Cbc => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, &iv)
            .map_err(init_failed)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        SymmetricAlgorithm::Aes192Cbc => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, &iv)
            .map_err(init_failed)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        SymmetricAlgorithm::Aes256Cbc => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, &iv)
            .map_err(init_failed)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
    };

    let mut output = iv.to_vec();
    output.extend_from_slice(&encrypted);
    Ok(output)
}
