use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::ser::{self, Impossible};
use serde::{Serialize, Serializer};

use crate::error::StoreError;

/// Length of the random nonce prepended to every sealed envelope.
pub const NONCE_LEN: usize = 12;

type Aes192Gcm = AesGcm<Aes192, U12>;

enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn from_key(key: &[u8]) -> Result<Self, StoreError> {
        let invalid = |_| StoreError::ConfigError(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Cipher::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(key).map(Cipher::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(key).map(Cipher::Aes256).map_err(invalid),
            other => Err(StoreError::ConfigError(format!(
                "encryption key must be 16, 24 or 32 bytes, got {other}"
            ))),
        }
    }

    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self {
            Cipher::Aes128(c) => seal_with(c, nonce, plaintext),
            Cipher::Aes192(c) => seal_with(c, nonce, plaintext),
            Cipher::Aes256(c) => seal_with(c, nonce, plaintext),
        }
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, StoreError> {
        match self {
            Cipher::Aes128(c) => open_with(c, nonce, ciphertext),
            Cipher::Aes192(c) => open_with(c, nonce, ciphertext),
            Cipher::Aes256(c) => open_with(c, nonce, ciphertext),
        }
    }
}

fn seal_with<C>(cipher: &C, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, StoreError>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    let sealed = cipher
        .encrypt(Nonce::<C>::from_slice(nonce), plaintext)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open_with<C>(cipher: &C, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, StoreError>
where
    C: Aead + AeadCore<NonceSize = U12>,
{
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| StoreError::Decryption("message authentication failed".to_string()))
}

/// Serializes objects into their stored form and back.
///
/// Strings are stored as raw UTF-8, everything else as JSON with map keys kept in insertion
/// order. When a cipher is active the result is sealed as `nonce || ciphertext || tag`.
pub struct EnvelopeCodec {
    cipher: Option<Cipher>,
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

impl EnvelopeCodec {
    /// Codec that stores plaintext envelopes.
    #[must_use]
    pub fn plaintext() -> Self {
        Self { cipher: None }
    }

    /// Codec sealing envelopes with AES-GCM. The key length picks AES-128, AES-192 or AES-256.
    ///
    /// # Errors
    /// Returns [`StoreError::ConfigError`] for key lengths other than 16, 24 or 32 bytes.
    pub fn with_key(key: &[u8]) -> Result<Self, StoreError> {
        Ok(Self {
            cipher: Some(Cipher::from_key(key)?),
        })
    }

    /// A key that is present but not enabled yields a plaintext codec.
    ///
    /// # Errors
    /// See [`EnvelopeCodec::with_key`].
    pub fn new(key: Option<&[u8]>, encrypted: bool) -> Result<Self, StoreError> {
        match key {
            Some(key) if encrypted => Self::with_key(key),
            _ => Ok(Self::plaintext()),
        }
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encode `value` into its stored envelope.
    ///
    /// A bare string is stored as its raw bytes, everything else as JSON. Raw text
    /// that is itself a JSON string literal reads back unquoted, so encoding
    /// `"\"hi\""` decodes as `hi`.
    ///
    /// # Errors
    /// Serialization failures, or [`StoreError::Encryption`] if sealing fails.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, StoreError> {
        let plain = plain_bytes(value)?;
        let Some(cipher) = &self.cipher else {
            return Ok(plain);
        };
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        cipher.seal(&nonce, &plain)
    }

    /// Decode a stored envelope into `T`.
    ///
    /// # Errors
    /// [`StoreError::EncryptedStringTooShort`] when a sealed input cannot hold a nonce,
    /// [`StoreError::Decryption`] on authentication failure, or the JSON error when the
    /// payload matches neither `T` nor a plain string.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, StoreError> {
        let plain = match &self.cipher {
            Some(cipher) => open_envelope(cipher, data)?,
            None => data.to_vec(),
        };
        decode_plain(&plain)
    }
}

fn plain_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    // bare strings (the version marker among them) are stored unquoted
    if let Ok(raw) = value.serialize(BareStr) {
        return Ok(raw.into_bytes());
    }
    Ok(serde_json::to_vec(value)?)
}

/// Accepts a top-level `str` and nothing else, wrappers such as `Option` or
/// newtypes included.
struct BareStr;

#[derive(Debug)]
struct NotBareStr;

impl std::fmt::Display for NotBareStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("not a bare string")
    }
}

impl std::error::Error for NotBareStr {}

impl ser::Error for NotBareStr {
    fn custom<M: std::fmt::Display>(_msg: M) -> Self {
        NotBareStr
    }
}

macro_rules! reject {
    ($($method:ident($($arg:ty),*);)*) => {
        $(fn $method(self, $(_: $arg),*) -> Result<String, NotBareStr> {
            Err(NotBareStr)
        })*
    };
}

impl Serializer for BareStr {
    type Ok = String;
    type Error = NotBareStr;
    type SerializeSeq = Impossible<String, NotBareStr>;
    type SerializeTuple = Impossible<String, NotBareStr>;
    type SerializeTupleStruct = Impossible<String, NotBareStr>;
    type SerializeTupleVariant = Impossible<String, NotBareStr>;
    type SerializeMap = Impossible<String, NotBareStr>;
    type SerializeStruct = Impossible<String, NotBareStr>;
    type SerializeStructVariant = Impossible<String, NotBareStr>;

    fn serialize_str(self, v: &str) -> Result<String, NotBareStr> {
        Ok(v.to_owned())
    }

    reject! {
        serialize_bool(bool);
        serialize_i8(i8);
        serialize_i16(i16);
        serialize_i32(i32);
        serialize_i64(i64);
        serialize_u8(u8);
        serialize_u16(u16);
        serialize_u32(u32);
        serialize_u64(u64);
        serialize_f32(f32);
        serialize_f64(f64);
        serialize_char(char);
        serialize_bytes(&[u8]);
        serialize_none();
        serialize_unit();
        serialize_unit_struct(&'static str);
        serialize_unit_variant(&'static str, u32, &'static str);
    }

    fn serialize_some<V: Serialize + ?Sized>(self, _: &V) -> Result<String, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_newtype_struct<V: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: &V,
    ) -> Result<String, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_newtype_variant<V: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &V,
    ) -> Result<String, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self::SerializeSeq, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self::SerializeTuple, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_tuple_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleStruct, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_struct(
        self,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStruct, NotBareStr> {
        Err(NotBareStr)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant, NotBareStr> {
        Err(NotBareStr)
    }
}

fn open_envelope(cipher: &Cipher, data: &[u8]) -> Result<Vec<u8>, StoreError> {
    // Legacy rows hold an unsealed `false`.
    if data == b"false" {
        return Ok(data.to_vec());
    }
    if data.len() < NONCE_LEN {
        return Err(StoreError::EncryptedStringTooShort);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher.open(nonce, ciphertext)
}

fn decode_plain<T: DeserializeOwned>(plain: &[u8]) -> Result<T, StoreError> {
    match serde_json::from_slice::<T>(plain) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            // raw text from the bare-string path, read back as a JSON string
            let Ok(text) = std::str::from_utf8(plain) else {
                return Err(json_err.into());
            };
            serde_json::from_value(serde_json::Value::String(text.to_owned()))
                .map_err(|_| json_err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Endpoint {
        id: i64,
        name: String,
        tags: Vec<String>,
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            id: 3,
            name: "local".into(),
            tags: vec!["prod".into(), "eu".into()],
        }
    }

    #[test]
    fn plaintext_round_trip() {
        let codec = EnvelopeCodec::plaintext();
        let bytes = codec.encode(&endpoint()).unwrap();
        assert_eq!(bytes, br#"{"id":3,"name":"local","tags":["prod","eu"]}"#);
        assert_eq!(codec.decode::<Endpoint>(&bytes).unwrap(), endpoint());
    }

    #[test]
    fn encrypted_round_trip_all_key_sizes() {
        for len in [16, 24, 32] {
            let key = vec![7u8; len];
            let codec = EnvelopeCodec::with_key(&key).unwrap();
            let bytes = codec.encode(&endpoint()).unwrap();
            assert!(bytes.len() > NONCE_LEN);
            assert!(!bytes.windows(5).any(|w| w == b"local"));
            assert_eq!(codec.decode::<Endpoint>(&bytes).unwrap(), endpoint());
        }
    }

    #[test]
    fn nonces_differ_between_encodes() {
        let codec = EnvelopeCodec::with_key(&[1u8; 32]).unwrap();
        let a = codec.encode("same").unwrap();
        let b = codec.encode("same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn bad_key_length_is_config_error() {
        for len in [0, 15, 17, 31, 33] {
            assert!(matches!(
                EnvelopeCodec::with_key(&vec![0u8; len]),
                Err(StoreError::ConfigError(_))
            ));
        }
    }

    #[test]
    fn key_held_but_disabled_is_plaintext() {
        let codec = EnvelopeCodec::new(Some(&[9u8; 32]), false).unwrap();
        assert!(!codec.is_encrypted());
        assert_eq!(codec.encode(&json!({"a": 1})).unwrap(), br#"{"a":1}"#);
        assert!(EnvelopeCodec::new(Some(&[9u8; 32]), true).unwrap().is_encrypted());
        assert!(!EnvelopeCodec::new(None, true).unwrap().is_encrypted());
    }

    #[test]
    fn every_byte_flip_is_detected() {
        let codec = EnvelopeCodec::with_key(&[5u8; 16]).unwrap();
        let sealed = codec.encode(&endpoint()).unwrap();
        for idx in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[idx] ^= 0x01;
            let err = codec.decode::<Endpoint>(&tampered).unwrap_err();
            assert!(matches!(err, StoreError::Decryption(_)), "byte {idx}: {err}");
        }
    }

    #[test]
    fn short_sealed_input() {
        let codec = EnvelopeCodec::with_key(&[5u8; 32]).unwrap();
        for len in 0..NONCE_LEN {
            let data = vec![0xAB; len];
            assert!(matches!(
                codec.decode::<serde_json::Value>(&data),
                Err(StoreError::EncryptedStringTooShort)
            ));
        }
    }

    #[test]
    fn unsealed_false_literal_is_accepted() {
        let codec = EnvelopeCodec::with_key(&[5u8; 32]).unwrap();
        assert!(!codec.decode::<bool>(b"false").unwrap());
    }

    #[test]
    fn strings_are_stored_raw() {
        let codec = EnvelopeCodec::plaintext();
        let bytes = codec.encode("2.19.0").unwrap();
        assert_eq!(bytes, b"2.19.0");
        assert_eq!(codec.decode::<String>(&bytes).unwrap(), "2.19.0");

        let quoted = codec.encode("say \"hi\"").unwrap();
        assert_eq!(quoted, br#"say "hi""#);
        assert_eq!(codec.decode::<String>(&quoted).unwrap(), "say \"hi\"");
    }

    #[test]
    fn json_that_is_a_string_still_decodes_as_json() {
        let codec = EnvelopeCodec::plaintext();
        assert_eq!(codec.decode::<String>(br#""quoted""#).unwrap(), "quoted");
    }

    #[test]
    fn non_string_targets_keep_the_json_error() {
        let codec = EnvelopeCodec::plaintext();
        assert!(matches!(
            codec.decode::<Endpoint>(b"not json"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn map_keys_keep_insertion_order() {
        let codec = EnvelopeCodec::plaintext();
        let value = json!({"zeta": 1, "alpha": 2, "mid": 3});
        assert_eq!(
            codec.encode(&value).unwrap(),
            br#"{"zeta":1,"alpha":2,"mid":3}"#
        );
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Name(String);

    #[test]
    fn optional_strings_round_trip() {
        for codec in [
            EnvelopeCodec::plaintext(),
            EnvelopeCodec::with_key(&[4u8; 32]).unwrap(),
        ] {
            for value in [Some("abc".to_string()), Some("null".to_string()), None] {
                let bytes = codec.encode(&value).unwrap();
                assert_eq!(codec.decode::<Option<String>>(&bytes).unwrap(), value);
            }
        }
        let plain = EnvelopeCodec::plaintext();
        assert_eq!(plain.encode(&Some("abc")).unwrap(), br#""abc""#);
    }

    #[test]
    fn newtype_strings_round_trip() {
        for codec in [
            EnvelopeCodec::plaintext(),
            EnvelopeCodec::with_key(&[4u8; 16]).unwrap(),
        ] {
            let bytes = codec.encode(&Name("abc".into())).unwrap();
            assert_eq!(codec.decode::<Name>(&bytes).unwrap(), Name("abc".into()));
        }
        assert_eq!(
            EnvelopeCodec::plaintext().encode(&Name("abc".into())).unwrap(),
            br#""abc""#
        );
    }

    #[test]
    fn raw_strings_decode_into_wrapped_targets() {
        let codec = EnvelopeCodec::plaintext();
        let bytes = codec.encode("abc").unwrap();
        assert_eq!(bytes, b"abc");
        assert_eq!(codec.decode::<Name>(&bytes).unwrap(), Name("abc".into()));
        assert_eq!(
            codec.decode::<Option<String>>(&bytes).unwrap(),
            Some("abc".into())
        );
    }

    #[test]
    fn string_holding_a_json_literal_reads_back_unquoted() {
        let codec = EnvelopeCodec::plaintext();
        let bytes = codec.encode("\"hi\"").unwrap();
        assert_eq!(bytes, br#""hi""#);
        assert_eq!(codec.decode::<String>(&bytes).unwrap(), "hi");
    }
}
