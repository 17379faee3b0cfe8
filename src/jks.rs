//! Java KeyStore (JKS) files.
//!
//! Layout: magic `0xFEEDFEED`, version, entry count, the entries, then a
//! SHA-1 integrity digest keyed with the store password. Private keys are
//! stored as an `EncryptedPrivateKeyInfo` protected with the Sun
//! proprietary SHA-1 keystream.

use crate::error::WssError;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Reader, SliceReader};
use sha1::{Digest, Sha1};
use x509_cert::spki::AlgorithmIdentifierOwned;

const JKS_MAGIC: u32 = 0xFEED_FEED;
const JCEKS_MAGIC: u32 = 0xCECE_CECE;
const PRIVATE_KEY_TAG: u32 = 1;
const TRUSTED_CERT_TAG: u32 = 2;
const INTEGRITY_SALT: &[u8] = b"Mighty Aphrodite";
const DIGEST_LEN: usize = 20;
const SALT_LEN: usize = 20;
const X509_CERT_TYPE: &str = "X.509";

const SUN_KEY_PROTECTOR_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.42.2.17.1.1");

/// One alias of the store.
#[derive(Debug)]
pub(crate) struct JksEntry {
    pub alias: String,
    /// DER certificates, end entity first
    pub certificate_chain: Vec<Vec<u8>>,
    /// Protected key bytes (salt, encrypted key, check digest)
    pub protected_key: Option<Vec<u8>>,
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], WssError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| WssError::CryptoInit("truncated JKS keystore".to_string()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16, WssError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, WssError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn skip_u64(&mut self) -> Result<(), WssError> {
        self.take(8).map(|_| ())
    }

    fn utf(&mut self) -> Result<String, WssError> {
        let len = usize::from(self.u16()?);
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn blob(&mut self) -> Result<Vec<u8>, WssError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn certificate(&mut self, version: u32) -> Result<Vec<u8>, WssError> {
        if version == 2 {
            let cert_type = self.utf()?;
            if cert_type != X509_CERT_TYPE {
                return Err(WssError::CryptoInit(format!(
                    "unsupported certificate type '{}' in JKS keystore",
                    cert_type
                )));
            }
        }
        self.blob()
    }
}

/// Read the entries of a JKS file, checking its integrity digest when a
/// store password is given.
pub(crate) fn parse(data: &[u8], password: Option<&str>) -> Result<Vec<JksEntry>, WssError> {
    let mut reader = ByteReader { data, pos: 0 };

    match reader.u32()? {
        JKS_MAGIC => {}
        JCEKS_MAGIC => {
            return Err(WssError::CryptoInit("JCEKS keystores are not supported".to_string()))
        }
        _ => return Err(WssError::CryptoInit("not a JKS keystore".to_string())),
    }
    let version = reader.u32()?;
    if version != 1 && version != 2 {
        return Err(WssError::CryptoInit(format!("unsupported JKS version {}", version)));
    }

    let count = reader.u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let tag = reader.u32()?;
        let alias = reader.utf()?;
        reader.skip_u64()?;

        match tag {
            PRIVATE_KEY_TAG => {
                let protected_key = protected_key_bytes(&reader.blob()?)?;
                let chain_len = reader.u32()?;
                let certificate_chain = (0..chain_len)
                    .map(|_| reader.certificate(version))
                    .collect::<Result<Vec<_>, _>>()?;
                if certificate_chain.is_empty() {
                    return Err(WssError::CryptoInit(format!(
                        "JKS key entry '{}' has no certificate",
                        alias
                    )));
                }
                entries.push(JksEntry {
                    alias,
                    certificate_chain,
                    protected_key: Some(protected_key),
                });
            }
            TRUSTED_CERT_TAG => entries.push(JksEntry {
                alias,
                certificate_chain: vec![reader.certificate(version)?],
                protected_key: None,
            }),
            other => {
                return Err(WssError::CryptoInit(format!(
                    "unsupported JKS entry type {} for alias '{}'",
                    other, alias
                )))
            }
        }
    }

    let signed_len = reader.pos;
    let stored_digest = reader.take(DIGEST_LEN)?;
    if let Some(password) = password {
        let expected = Sha1::new()
            .chain_update(password_bytes(password))
            .chain_update(INTEGRITY_SALT)
            .chain_update(&data[..signed_len])
            .finalize();
        if expected.as_slice() != stored_digest {
            return Err(WssError::CryptoInit(
                "JKS keystore was tampered with, or the keystore password is incorrect".to_string(),
            ));
        }
    }

    Ok(entries)
}

/// Undo the Sun key protector. Returns the PKCS#8 `PrivateKeyInfo` DER, or
/// `None` when the password does not match.
pub(crate) fn recover_key(protected: &[u8], password: &str) -> Option<Vec<u8>> {
    if protected.len() < SALT_LEN + DIGEST_LEN {
        return None;
    }
    let password = password_bytes(password);
    let (salt, rest) = protected.split_at(SALT_LEN);
    let (encrypted, check) = rest.split_at(rest.len() - DIGEST_LEN);

    let mut plain = Vec::with_capacity(encrypted.len());
    let mut keystream = salt.to_vec();
    for chunk in encrypted.chunks(DIGEST_LEN) {
        keystream = Sha1::new()
            .chain_update(&password)
            .chain_update(&keystream)
            .finalize()
            .to_vec();
        plain.extend(chunk.iter().zip(&keystream).map(|(c, k)| c ^ k));
    }

    let digest = Sha1::new().chain_update(&password).chain_update(&plain).finalize();
    (digest.as_slice() == check).then_some(plain)
}

/// Java passwords are hashed as UTF-16BE code units.
fn password_bytes(password: &str) -> Vec<u8> {
    password.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

fn protected_key_bytes(encrypted_key_info: &[u8]) -> Result<Vec<u8>, WssError> {
    let malformed = |e: der::Error| WssError::CryptoInit(format!("malformed JKS private key: {}", e));

    let mut reader = SliceReader::new(encrypted_key_info).map_err(malformed)?;
    let (algorithm, data) = reader
        .sequence(|seq| {
            let algorithm = AlgorithmIdentifierOwned::decode(seq)?;
            let data = OctetString::decode(seq)?;
            Ok((algorithm, data))
        })
        .map_err(malformed)?;

    if algorithm.oid != SUN_KEY_PROTECTOR_OID {
        return Err(WssError::CryptoInit(format!(
            "unsupported JKS key protection algorithm {}",
            algorithm.oid
        )));
    }
    Ok(data.into_bytes())
}
