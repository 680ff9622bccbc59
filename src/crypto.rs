/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Cryptographic kernel: SHA-256, HMAC, HKDF, AES-128-CCM and P-256
//! (ECDH + ECDSA), built on the RustCrypto crates.
//!
//! The algorithms are fixed by the protocol and are not negotiated.

use aes::Aes128;
use ccm::{
    aead::generic_array::GenericArray,
    consts::{U13, U16},
    AeadInPlace, Ccm, KeyInit,
};
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use hmac::Mac;
use log::error;
use p256::{
    ecdsa::{Signature, SigningKey, VerifyingKey},
    AffinePoint, EncodedPoint, PublicKey, SecretKey,
};
use rand_core::{CryptoRng, RngCore};
use sha2::Digest;

use crate::error::{Error, ErrorCode};

/// The entropy source injected into the handshake: a plain function that
/// fills the given buffer with random bytes. Ephemeral key generation,
/// the Sigma randoms and fresh resumption ids all draw from it, so hosts
/// must back it with a CSPRNG.
pub type Rand = fn(&mut [u8]);

/// A `Rand` backed by the operating system's entropy pool
#[cfg(feature = "std")]
pub fn sys_rand(buf: &mut [u8]) {
    use rand::RngCore;

    rand::thread_rng().fill_bytes(buf);
}

/// A deterministic xorshift stream shared by the unit-test suites
#[cfg(test)]
pub(crate) fn test_rand(buf: &mut [u8]) {
    use core::sync::atomic::{AtomicU32, Ordering};

    static STATE: AtomicU32 = AtomicU32::new(0x2b5a_d4f1);
    for byte in buf.iter_mut() {
        let mut x = STATE.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        STATE.store(x, Ordering::Relaxed);
        *byte = x as u8;
    }
}

pub const SHA256_HASH_LEN_BYTES: usize = 32;
pub const EC_POINT_LEN_BYTES: usize = 65;
pub const EC_SIGNATURE_LEN_BYTES: usize = 64;
pub const ECDH_SHARED_SECRET_LEN_BYTES: usize = 32;
pub const SYMM_KEY_LEN_BYTES: usize = 16;
pub const AEAD_MIC_LEN_BYTES: usize = 16;
pub const AEAD_NONCE_LEN_BYTES: usize = 13;

type HmacSha256I = hmac::Hmac<sha2::Sha256>;
type AesCcm = Ccm<Aes128, U16, U13>;

#[derive(Debug, Clone)]
pub struct Sha256 {
    hasher: sha2::Sha256,
}

impl Sha256 {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            hasher: sha2::Sha256::new(),
        })
    }

    pub fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.hasher.update(data);
        Ok(())
    }

    pub fn finish(self, digest: &mut [u8]) -> Result<(), Error> {
        let output = self.hasher.finalize();
        digest.copy_from_slice(output.as_slice());
        Ok(())
    }
}

pub struct HmacSha256 {
    inner: HmacSha256I,
}

impl HmacSha256 {
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            inner: Mac::new_from_slice(key).map_err(|e| {
                error!("Error creating HmacSha256 {:?}", e);
                ErrorCode::Crypto
            })?,
        })
    }

    pub fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.inner.update(data);
        Ok(())
    }

    pub fn finish(self, out: &mut [u8]) -> Result<(), Error> {
        let result = &self.inner.finalize().into_bytes()[..];
        out.clone_from_slice(result);
        Ok(())
    }
}

#[derive(Debug)]
pub enum KeyType {
    Private(SecretKey),
    Public(PublicKey),
}

/// A P-256 key pair (or a standalone public key), covering the needs of
/// both the ephemeral handshake keys and the operational signing keys.
///
/// The secret scalar never leaves this type; `p256::SecretKey` zeroizes
/// its storage on drop.
#[derive(Debug)]
pub struct KeyPair {
    key: KeyType,
}

impl KeyPair {
    pub fn new(rand: Rand) -> Result<Self, Error> {
        let mut rng = RandRngCore(rand);
        let secret_key = SecretKey::random(&mut rng);

        Ok(Self {
            key: KeyType::Private(secret_key),
        })
    }

    pub fn new_from_components(pub_key: &[u8], priv_key: &[u8]) -> Result<Self, Error> {
        let secret_key = SecretKey::from_slice(priv_key)?;
        let public_key = Self::decode_public(pub_key)?;
        if public_key != secret_key.public_key() {
            Err(ErrorCode::InvalidData)?;
        }

        Ok(Self {
            key: KeyType::Private(secret_key),
        })
    }

    pub fn new_from_public(pub_key: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            key: KeyType::Public(Self::decode_public(pub_key)?),
        })
    }

    fn decode_public(pub_key: &[u8]) -> Result<PublicKey, Error> {
        let encoded_point =
            EncodedPoint::from_bytes(pub_key).map_err(|_| ErrorCode::Crypto)?;

        Option::from(PublicKey::from_encoded_point(&encoded_point))
            .ok_or_else(|| ErrorCode::Crypto.into())
    }

    fn public_key_point(&self) -> AffinePoint {
        match &self.key {
            KeyType::Private(k) => *(k.public_key().as_affine()),
            KeyType::Public(k) => *(k.as_affine()),
        }
    }

    fn private_key(&self) -> Result<&SecretKey, Error> {
        match &self.key {
            KeyType::Private(key) => Ok(key),
            KeyType::Public(_) => Err(ErrorCode::Crypto.into()),
        }
    }

    pub fn get_public_key(&self, pub_key: &mut [u8]) -> Result<usize, Error> {
        let point = self.public_key_point().to_encoded_point(false);
        let bytes = point.as_bytes();
        let len = bytes.len();
        if pub_key.len() < len {
            Err(ErrorCode::NoSpace)?;
        }
        pub_key[..len].copy_from_slice(bytes);
        Ok(len)
    }

    pub fn derive_secret(&self, peer_pub_key: &[u8], secret: &mut [u8]) -> Result<usize, Error> {
        let peer_pubkey = Self::decode_public(peer_pub_key)?;
        let private_key = self.private_key()?;
        let shared_secret = elliptic_curve::ecdh::diffie_hellman(
            private_key.to_nonzero_scalar(),
            peer_pubkey.as_affine(),
        );
        let bytes = shared_secret.raw_secret_bytes();
        let bytes = bytes.as_slice();
        let len = bytes.len();
        if secret.len() < len {
            Err(ErrorCode::NoSpace)?;
        }
        secret[..len].copy_from_slice(bytes);

        Ok(len)
    }

    pub fn sign_msg(&self, msg: &[u8], signature: &mut [u8]) -> Result<usize, Error> {
        use p256::ecdsa::signature::Signer;

        if signature.len() < EC_SIGNATURE_LEN_BYTES {
            return Err(ErrorCode::NoSpace.into());
        }

        let private_key = self.private_key()?;
        let signing_key = SigningKey::from(private_key);
        let sig: Signature = signing_key.sign(msg);
        let bytes = sig.to_bytes();
        let len = bytes.len();
        signature[..len].copy_from_slice(&bytes);
        Ok(len)
    }

    pub fn verify_msg(&self, msg: &[u8], signature: &[u8]) -> Result<(), Error> {
        use p256::ecdsa::signature::Verifier;

        let verifying_key = VerifyingKey::from_affine(self.public_key_point())
            .map_err(|_| ErrorCode::Crypto)?;
        let signature =
            Signature::from_slice(signature).map_err(|_| ErrorCode::InvalidSignature)?;

        verifying_key
            .verify(msg, &signature)
            .map_err(|_| ErrorCode::InvalidSignature)?;

        Ok(())
    }
}

pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], key: &mut [u8]) -> Result<(), Error> {
    hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), ikm)
        .expand(info, key)
        .map_err(|e| {
            error!("Error with hkdf_sha256 {:?}", e);
            ErrorCode::Crypto.into()
        })
}

/// Encrypt `data[..data_len]` in place, appending the 16-byte tag; `data`
/// must have room for `data_len + AEAD_MIC_LEN_BYTES` bytes.
pub fn encrypt_in_place(
    key: &[u8],
    nonce: &[u8],
    ad: &[u8],
    data: &mut [u8],
    data_len: usize,
) -> Result<usize, Error> {
    let key = GenericArray::from_slice(key);
    let nonce = GenericArray::from_slice(nonce);
    let cipher = AesCcm::new(key);

    let mut buffer = SliceBuffer::new(data, data_len);
    cipher.encrypt_in_place(nonce, ad, &mut buffer)?;
    Ok(buffer.len())
}

/// Decrypt `data` (ciphertext with the trailing 16-byte tag) in place,
/// returning the plaintext length. Tag mismatch yields `InvalidMic`.
pub fn decrypt_in_place(
    key: &[u8],
    nonce: &[u8],
    ad: &[u8],
    data: &mut [u8],
) -> Result<usize, Error> {
    let key = GenericArray::from_slice(key);
    let nonce = GenericArray::from_slice(nonce);
    let cipher = AesCcm::new(key);

    let mut buffer = SliceBuffer::new(data, data.len());
    cipher
        .decrypt_in_place(nonce, ad, &mut buffer)
        .map_err(|_| ErrorCode::InvalidMic)?;
    Ok(buffer.len())
}

/// The 16-byte tag of an AES-CCM encryption of the empty plaintext; the
/// construction behind the resumption MICs.
pub fn aead_tag(key: &[u8], nonce: &[u8], tag: &mut [u8]) -> Result<(), Error> {
    let key = GenericArray::from_slice(key);
    let nonce = GenericArray::from_slice(nonce);
    let cipher = AesCcm::new(key);

    let mut empty: [u8; 0] = [];
    let out = cipher.encrypt_in_place_detached(nonce, &[], &mut empty)?;
    tag.copy_from_slice(out.as_slice());
    Ok(())
}

/// Re-run the empty-plaintext AEAD and check the transmitted tag.
pub fn aead_tag_check(key: &[u8], nonce: &[u8], tag: &[u8]) -> Result<(), Error> {
    let key = GenericArray::from_slice(key);
    let nonce = GenericArray::from_slice(nonce);
    let cipher = AesCcm::new(key);

    let mut empty: [u8; 0] = [];
    cipher
        .decrypt_in_place_detached(nonce, &[], &mut empty, GenericArray::from_slice(tag))
        .map_err(|_| ErrorCode::InvalidMic)?;
    Ok(())
}

#[derive(Debug)]
struct SliceBuffer<'a> {
    slice: &'a mut [u8],
    len: usize,
}

impl<'a> SliceBuffer<'a> {
    fn new(slice: &'a mut [u8], len: usize) -> Self {
        Self { slice, len }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl AsMut<[u8]> for SliceBuffer<'_> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.slice[..self.len]
    }
}

impl AsRef<[u8]> for SliceBuffer<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.slice[..self.len]
    }
}

impl ccm::aead::Buffer for SliceBuffer<'_> {
    fn extend_from_slice(&mut self, other: &[u8]) -> ccm::aead::Result<()> {
        if self.slice.len() - self.len < other.len() {
            return Err(ccm::aead::Error);
        }
        self.slice[self.len..][..other.len()].copy_from_slice(other);
        self.len += other.len();
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.len = len;
    }
}

/// Adapter presenting a `Rand` fn-pointer as a `rand_core` RNG, as needed
/// by the elliptic-curve key generation.
pub struct RandRngCore(pub Rand);

impl RngCore for RandRngCore {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        (self.0)(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for RandRngCore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        // NIST "abc" vector
        let mut h = Sha256::new().unwrap();
        h.update(b"abc").unwrap();
        let mut digest = [0; SHA256_HASH_LEN_BYTES];
        h.finish(&mut digest).unwrap();
        assert_eq!(
            digest,
            [
                0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d,
                0xae, 0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10,
                0xff, 0x61, 0xf2, 0x00, 0x15, 0xad
            ]
        );
    }

    #[test]
    fn test_aead_round_trip_and_tamper() {
        let key = [0x11; SYMM_KEY_LEN_BYTES];
        let nonce = [0x22; AEAD_NONCE_LEN_BYTES];

        let mut buf = [0; 32 + AEAD_MIC_LEN_BYTES];
        buf[..5].copy_from_slice(b"hello");
        let len = encrypt_in_place(&key, &nonce, &[], &mut buf[..5 + AEAD_MIC_LEN_BYTES], 5)
            .unwrap();
        assert_eq!(len, 5 + AEAD_MIC_LEN_BYTES);

        let mut tampered = [0; 5 + AEAD_MIC_LEN_BYTES];
        tampered.copy_from_slice(&buf[..5 + AEAD_MIC_LEN_BYTES]);
        tampered[2] ^= 0x01;
        assert_eq!(
            decrypt_in_place(&key, &nonce, &[], &mut tampered)
                .unwrap_err()
                .code(),
            ErrorCode::InvalidMic
        );

        let len = decrypt_in_place(&key, &nonce, &[], &mut buf[..5 + AEAD_MIC_LEN_BYTES]).unwrap();
        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn test_aead_tag_check() {
        let key = [0x42; SYMM_KEY_LEN_BYTES];
        let nonce = [0x33; AEAD_NONCE_LEN_BYTES];

        let mut tag = [0; AEAD_MIC_LEN_BYTES];
        aead_tag(&key, &nonce, &mut tag).unwrap();
        aead_tag_check(&key, &nonce, &tag).unwrap();

        tag[0] ^= 0x80;
        assert_eq!(
            aead_tag_check(&key, &nonce, &tag).unwrap_err().code(),
            ErrorCode::InvalidMic
        );
    }

    #[test]
    fn test_sign_verify_and_tamper() {
        let key = KeyPair::new(test_rand).unwrap();
        let msg = b"to be signed";

        let mut signature = [0; EC_SIGNATURE_LEN_BYTES];
        let len = key.sign_msg(msg, &mut signature).unwrap();
        assert_eq!(len, EC_SIGNATURE_LEN_BYTES);

        let mut pub_key = [0; EC_POINT_LEN_BYTES];
        key.get_public_key(&mut pub_key).unwrap();
        let verifier = KeyPair::new_from_public(&pub_key).unwrap();
        verifier.verify_msg(msg, &signature).unwrap();

        signature[10] ^= 0x01;
        assert_eq!(
            verifier.verify_msg(msg, &signature).unwrap_err().code(),
            ErrorCode::InvalidSignature
        );
    }

    #[test]
    fn test_ecdh_agreement() {
        let a = KeyPair::new(test_rand).unwrap();
        let b = KeyPair::new(test_rand).unwrap();

        let mut a_pub = [0; EC_POINT_LEN_BYTES];
        let mut b_pub = [0; EC_POINT_LEN_BYTES];
        a.get_public_key(&mut a_pub).unwrap();
        b.get_public_key(&mut b_pub).unwrap();

        let mut s1 = [0; ECDH_SHARED_SECRET_LEN_BYTES];
        let mut s2 = [0; ECDH_SHARED_SECRET_LEN_BYTES];
        assert_eq!(a.derive_secret(&b_pub, &mut s1).unwrap(), 32);
        assert_eq!(b.derive_secret(&a_pub, &mut s2).unwrap(), 32);
        assert_eq!(s1, s2);
    }
}
