//! Hash & crypto primitives — C1, spec.md §4.1.
//!
//! Grounded in `original_source/crypto/crypto.go`: MD5 content hashing,
//! AES-CFB streaming with a prepended random IV, and RSA PKCS#1 v1.5 key
//! wrapping of the AES session key. Built on `openssl`, the crate the
//! teacher's `server` crate already depends on.

use crate::error::{FsError, FsResult};
use openssl::hash::{Hasher, MessageDigest};
use openssl::pkey::{Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::symm::{Cipher, Crypter, Mode};
use std::io::{Read, Write};

const AES_BLOCK_SIZE: usize = 16;
/// Session keys are AES-256: spec.md's Open Question on key length is
/// resolved in favor of the 256-bit reading (`hash[:32]` ASCII bytes feed
/// `aes.NewCipher`, which picks AES-256 for a 32-byte key).
const SESSION_KEY_LEN: usize = 32;

/// Derives the AES session key from the hex MD5 of the plaintext, per
/// spec.md §4.1: the first 32 hex *characters* read as ASCII bytes, not
/// decoded from hex. This is intentional upstream behavior, preserved
/// bit-for-bit for compatibility with existing mounts.
pub fn session_key_from_hash(hex_hash: &str) -> FsResult<[u8; SESSION_KEY_LEN]> {
    if hex_hash.len() < SESSION_KEY_LEN {
        return Err(FsError::CryptoFailure(
            "hash too short to derive a session key".into(),
        ));
    }
    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&hex_hash.as_bytes()[..SESSION_KEY_LEN]);
    Ok(key)
}

/// A streaming MD5 hasher teed off a reader, matching
/// `original_source/watcher/watcher.go`'s `hash()`.
pub struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> FsResult<Self> {
        Ok(Self {
            inner,
            hasher: Hasher::new(MessageDigest::md5())?,
        })
    }

    /// Consumes the reader, returning the lower-case hex digest of
    /// everything read through it so far.
    pub fn finish_hex(mut self) -> FsResult<String> {
        let digest = self.hasher.finish()?;
        Ok(hex_encode(&digest))
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher
                .update(&buf[..n])
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        Ok(n)
    }
}

/// MD5-hashes an entire reader, returning lower-case hex.
pub fn md5_hex_of(mut r: impl Read) -> FsResult<String> {
    let mut hasher = Hasher::new(MessageDigest::md5())?;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n])?;
    }
    Ok(hex_encode(&hasher.finish()?))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> FsResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(FsError::CryptoFailure("odd-length hex string".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| FsError::CryptoFailure("invalid hex digit".into()))
        })
        .collect()
}

/// Streams `in_` through AES-CFB encryption into `out`, writing a random
/// 16-byte IV first. Streams in fixed-size chunks — never buffers the
/// whole plaintext, per spec.md §4.1.
pub fn encrypt_sym(key: &[u8], mut in_: impl Read, mut out: impl Write) -> FsResult<()> {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    openssl::rand::rand_bytes(&mut iv)?;
    out.write_all(&iv)?;

    let cipher = aes_cipher_for_key_len(key.len())?;
    let mut crypter = Crypter::new(cipher, Mode::Encrypt, key, Some(&iv))?;
    crypter.pad(false);

    stream_crypt(&mut in_, &mut out, &mut crypter)
}

/// Reads the prepended IV from `in_`, then streams AES-CFB decryption into
/// `out`.
pub fn decrypt_sym(key: &[u8], mut in_: impl Read, mut out: impl Write) -> FsResult<()> {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    in_.read_exact(&mut iv)?;

    let cipher = aes_cipher_for_key_len(key.len())?;
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, Some(&iv))?;
    crypter.pad(false);

    stream_crypt(&mut in_, &mut out, &mut crypter)
}

fn aes_cipher_for_key_len(len: usize) -> FsResult<Cipher> {
    match len {
        16 => Ok(Cipher::aes_128_cfb128()),
        24 => Ok(Cipher::aes_192_cfb128()),
        32 => Ok(Cipher::aes_256_cfb128()),
        other => Err(FsError::CryptoFailure(format!(
            "unsupported AES key length {other}"
        ))),
    }
}

fn stream_crypt(
    in_: &mut impl Read,
    out: &mut impl Write,
    crypter: &mut Crypter,
) -> FsResult<()> {
    let mut inbuf = [0u8; 64 * 1024];
    // CFB is a stream mode: ciphertext length == plaintext length, plus a
    // block of slack the `openssl` binding requires for the internal buffer.
    let mut outbuf = vec![0u8; inbuf.len() + AES_BLOCK_SIZE];
    loop {
        let n = in_.read(&mut inbuf)?;
        if n == 0 {
            break;
        }
        let written = crypter.update(&inbuf[..n], &mut outbuf)?;
        out.write_all(&outbuf[..written])?;
    }
    let written = crypter.finalize(&mut outbuf)?;
    out.write_all(&outbuf[..written])?;
    Ok(())
}

/// RSA-PKCS1v15-encrypts `msg` (the AES session key) under `key`.
pub fn encrypt_asym(key: &Rsa<Public>, msg: &[u8]) -> FsResult<Vec<u8>> {
    let mut out = vec![0u8; key.size() as usize];
    let n = key.public_encrypt(msg, &mut out, Padding::PKCS1)?;
    out.truncate(n);
    Ok(out)
}

/// RSA-PKCS1v15-decrypts `msg` under the private key.
pub fn decrypt_asym(key: &Rsa<Private>, msg: &[u8]) -> FsResult<Vec<u8>> {
    let mut out = vec![0u8; key.size() as usize];
    let n = key
        .private_decrypt(msg, &mut out, Padding::PKCS1)
        .map_err(|_| FsError::KeyMismatch)?;
    out.truncate(n);
    Ok(out)
}

/// Wraps a session key under both the user and store RSA public keys,
/// emitting lower-case hex suitable for the sidecar's `UserKey`/`StoreKey`
/// fields.
pub fn wrap_session_key(
    session_key: &[u8],
    user_key: &Rsa<Public>,
    store_key: &Rsa<Public>,
) -> FsResult<(String, String)> {
    let user_wrapped = encrypt_asym(user_key, session_key)?;
    let store_wrapped = encrypt_asym(store_key, session_key)?;
    Ok((hex_encode(&user_wrapped), hex_encode(&store_wrapped)))
}

/// Recovers the session key from the sidecar's hex-encoded `UserKey` using
/// the client's RSA private key. Fails with `MissingKey` if `user_key_hex`
/// is empty, `KeyMismatch` if the decrypted value isn't a valid session key
/// length.
pub fn unwrap_session_key(user_key_hex: &str, client_private: &Rsa<Private>) -> FsResult<Vec<u8>> {
    if user_key_hex.is_empty() {
        return Err(FsError::MissingKey);
    }
    let wrapped = hex_decode(user_key_hex)?;
    let key = decrypt_asym(client_private, &wrapped)?;
    if key.len() != SESSION_KEY_LEN {
        return Err(FsError::KeyMismatch);
    }
    Ok(key)
}

pub fn read_private_key_pem(pem: &[u8]) -> FsResult<Rsa<Private>> {
    Ok(Rsa::private_key_from_pem(pem)?)
}

pub fn read_public_key_pem(pem: &[u8]) -> FsResult<Rsa<Public>> {
    Ok(Rsa::public_key_from_pem(pem)?)
}
