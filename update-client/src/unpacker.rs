// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! CRX3 container verification and extraction.
//!
//! A CRX3 file is a fixed magic, a little-endian version and header length,
//! a protobuf-encoded header carrying signature proofs, and a zip archive
//! payload. The header is scanned with a minimal wire-format reader instead
//! of generated code; only the three fields this verifier needs are decoded.

use crate::common::CrxFormat;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const CRX3_MAGIC: &[u8; 4] = b"Cr24";
const CRX3_VERSION: u32 = 3;
/// Domain-separation prefix signed along with the header and payload.
const SIGNATURE_CONTEXT: &[u8] = b"CRX3 SignedData\x00";

// CrxFileHeader field numbers.
const FIELD_SHA256_WITH_ECDSA: u64 = 3;
const FIELD_SIGNED_HEADER_DATA: u64 = 10000;
// AsymmetricKeyProof field numbers.
const FIELD_PUBLIC_KEY: u64 = 1;
const FIELD_SIGNATURE: u64 = 2;
// SignedData field number.
const FIELD_CRX_ID: u64 = 1;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("not a crx3 file: {0}")]
    InvalidFile(String),
    #[error("crx header rejected: {0}")]
    HeaderInvalid(String),
    #[error("no signature proof matches the expected publisher key")]
    ProofMissing,
    #[error("signature verification failed")]
    BadSignature,
    #[error("could not unzip payload: {0}")]
    Unzip(#[from] zip::result::ZipError),
    #[error("i/o failure during unpack: {0}")]
    Io(#[from] std::io::Error),
}

impl UnpackError {
    /// Stable code reported in pings.
    pub fn code(&self) -> i32 {
        match self {
            UnpackError::InvalidFile(_) => 2,
            UnpackError::HeaderInvalid(_) => 3,
            UnpackError::ProofMissing => 4,
            UnpackError::BadSignature => 5,
            UnpackError::Unzip(_) => 6,
            UnpackError::Io(_) => 7,
        }
    }
}

/// A verified, extracted package. The backing directory is removed when
/// this value is dropped, so keep it alive until the installer is done.
#[derive(Debug)]
pub struct UnpackedCrx {
    dir: tempfile::TempDir,
}

impl UnpackedCrx {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub trait Unpacker {
    /// Verifies that `crx` is signed by the publisher key whose SHA-256 is
    /// `pk_hash` and extracts the payload into a fresh directory.
    fn unpack(
        &self,
        crx: Vec<u8>,
        pk_hash: Vec<u8>,
        format: CrxFormat,
    ) -> LocalBoxFuture<'_, Result<UnpackedCrx, UnpackError>>;
}

#[derive(Debug, Default)]
pub struct CrxUnpacker;

impl Unpacker for CrxUnpacker {
    fn unpack(
        &self,
        crx: Vec<u8>,
        pk_hash: Vec<u8>,
        format: CrxFormat,
    ) -> LocalBoxFuture<'_, Result<UnpackedCrx, UnpackError>> {
        async move {
            let CrxFormat::Crx3 = format;
            let payload = verify_crx3(&crx, &pk_hash)?;
            let unpacked = extract_zip(payload)?;
            info!("verified and unpacked crx into {}", unpacked.path().display());
            Ok(unpacked)
        }
        .boxed_local()
    }
}

/// Checks the container framing and signature, returning the zip payload.
fn verify_crx3<'a>(crx: &'a [u8], pk_hash: &[u8]) -> Result<&'a [u8], UnpackError> {
    if crx.len() < 12 || &crx[0..4] != CRX3_MAGIC {
        return Err(UnpackError::InvalidFile("bad magic".to_string()));
    }
    let version = u32::from_le_bytes(crx[4..8].try_into().unwrap());
    if version != CRX3_VERSION {
        return Err(UnpackError::InvalidFile(format!("unsupported version {version}")));
    }
    let header_len = u32::from_le_bytes(crx[8..12].try_into().unwrap()) as usize;
    let rest = &crx[12..];
    if header_len > rest.len() {
        return Err(UnpackError::InvalidFile("truncated header".to_string()));
    }
    let (header, payload) = rest.split_at(header_len);

    let parsed = parse_header(header)?;
    let signed_header_data = parsed
        .signed_header_data
        .ok_or_else(|| UnpackError::HeaderInvalid("missing signed header data".to_string()))?;
    let crx_id = parse_crx_id(signed_header_data)?;
    if pk_hash.len() < 16 || crx_id != &pk_hash[..16] {
        return Err(UnpackError::HeaderInvalid("crx id does not match publisher key".to_string()));
    }

    // The required proof is the one signed by the publisher key itself.
    let proof = parsed
        .ecdsa_proofs
        .iter()
        .find(|proof| Sha256::digest(proof.public_key).as_slice() == pk_hash)
        .ok_or(UnpackError::ProofMissing)?;

    let key = VerifyingKey::from_public_key_der(proof.public_key)
        .map_err(|_| UnpackError::HeaderInvalid("malformed public key".to_string()))?;
    let signature =
        Signature::from_der(proof.signature).map_err(|_| UnpackError::BadSignature)?;

    let mut message =
        Vec::with_capacity(SIGNATURE_CONTEXT.len() + 4 + signed_header_data.len() + payload.len());
    message.extend_from_slice(SIGNATURE_CONTEXT);
    message.extend_from_slice(&(signed_header_data.len() as u32).to_le_bytes());
    message.extend_from_slice(signed_header_data);
    message.extend_from_slice(payload);
    key.verify(&message, &signature).map_err(|_| UnpackError::BadSignature)?;

    Ok(payload)
}

#[derive(Default)]
struct ParsedHeader<'a> {
    ecdsa_proofs: Vec<KeyProof<'a>>,
    signed_header_data: Option<&'a [u8]>,
}

struct KeyProof<'a> {
    public_key: &'a [u8],
    signature: &'a [u8],
}

fn parse_header(header: &[u8]) -> Result<ParsedHeader<'_>, UnpackError> {
    let mut parsed = ParsedHeader::default();
    scan_fields(header, |field, bytes| {
        match field {
            FIELD_SHA256_WITH_ECDSA => parsed.ecdsa_proofs.push(parse_key_proof(bytes)?),
            FIELD_SIGNED_HEADER_DATA => parsed.signed_header_data = Some(bytes),
            _ => {}
        }
        Ok(())
    })?;
    Ok(parsed)
}

fn parse_key_proof(bytes: &[u8]) -> Result<KeyProof<'_>, UnpackError> {
    let mut public_key = None;
    let mut signature = None;
    scan_fields(bytes, |field, value| {
        match field {
            FIELD_PUBLIC_KEY => public_key = Some(value),
            FIELD_SIGNATURE => signature = Some(value),
            _ => {}
        }
        Ok(())
    })?;
    match (public_key, signature) {
        (Some(public_key), Some(signature)) => Ok(KeyProof { public_key, signature }),
        _ => Err(UnpackError::HeaderInvalid("incomplete key proof".to_string())),
    }
}

fn parse_crx_id(signed_header_data: &[u8]) -> Result<&[u8], UnpackError> {
    let mut crx_id = None;
    scan_fields(signed_header_data, |field, value| {
        if field == FIELD_CRX_ID {
            crx_id = Some(value);
        }
        Ok(())
    })?;
    match crx_id {
        Some(crx_id) if crx_id.len() == 16 => Ok(crx_id),
        _ => Err(UnpackError::HeaderInvalid("missing or malformed crx id".to_string())),
    }
}

/// Walks a protobuf wire stream, calling `visit` with every length-delimited
/// field and skipping everything else.
fn scan_fields<'a>(
    mut bytes: &'a [u8],
    mut visit: impl FnMut(u64, &'a [u8]) -> Result<(), UnpackError>,
) -> Result<(), UnpackError> {
    let malformed = || UnpackError::HeaderInvalid("malformed protobuf header".to_string());
    while !bytes.is_empty() {
        let key = read_varint(&mut bytes).ok_or_else(malformed)?;
        let field = key >> 3;
        match key & 0x7 {
            // varint
            0 => {
                read_varint(&mut bytes).ok_or_else(malformed)?;
            }
            // 64-bit
            1 => {
                bytes = bytes.get(8..).ok_or_else(malformed)?;
            }
            // length-delimited
            2 => {
                let len = read_varint(&mut bytes).ok_or_else(malformed)? as usize;
                let value = bytes.get(..len).ok_or_else(malformed)?;
                bytes = &bytes[len..];
                visit(field, value)?;
            }
            // 32-bit
            5 => {
                bytes = bytes.get(4..).ok_or_else(malformed)?;
            }
            _ => return Err(malformed()),
        }
    }
    Ok(())
}

fn read_varint(bytes: &mut &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let (&byte, rest) = bytes.split_first()?;
        *bytes = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

fn extract_zip(payload: &[u8]) -> Result<UnpackedCrx, UnpackError> {
    let dir = tempfile::TempDir::new()?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(payload))?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // Reject entries that would escape the extraction directory.
        let relative = match entry.enclosed_name() {
            Some(name) => name.to_owned(),
            None => {
                return Err(UnpackError::HeaderInvalid(format!(
                    "unsafe path in archive: {}",
                    entry.name()
                )))
            }
        };
        let target = dir.path().join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        std::fs::write(&target, contents)?;
    }
    Ok(UnpackedCrx { dir })
}

pub mod test_support {
    //! Builds syntactically valid, correctly signed CRX3 files for tests.

    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePublicKey;
    use std::io::Write;
    use zip::write::FileOptions;

    /// A fixed key so package bytes and hashes are reproducible across runs.
    pub fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[0x42; 32]).unwrap()
    }

    /// SHA-256 of the DER encoding of the test key, the `pk_hash` a
    /// component registers with.
    pub fn pk_hash() -> Vec<u8> {
        let der = signing_key().verifying_key().to_public_key_der().unwrap();
        Sha256::digest(der.as_bytes()).to_vec()
    }

    /// Assembles and signs a CRX3 file containing `files` as its payload.
    pub fn make_crx(files: &[(&str, &[u8])]) -> Vec<u8> {
        make_crx_with_key(&signing_key(), files)
    }

    pub fn make_crx_with_key(key: &SigningKey, files: &[(&str, &[u8])]) -> Vec<u8> {
        let payload = make_zip(files);
        let public_key_der = key.verifying_key().to_public_key_der().unwrap();
        let pk_hash = Sha256::digest(public_key_der.as_bytes());

        let mut signed_header_data = Vec::new();
        write_field(&mut signed_header_data, FIELD_CRX_ID, &pk_hash[..16]);

        let mut message = Vec::new();
        message.extend_from_slice(SIGNATURE_CONTEXT);
        message.extend_from_slice(&(signed_header_data.len() as u32).to_le_bytes());
        message.extend_from_slice(&signed_header_data);
        message.extend_from_slice(&payload);
        let signature: Signature = key.sign(&message);
        let signature_der = signature.to_der();

        let mut proof = Vec::new();
        write_field(&mut proof, FIELD_PUBLIC_KEY, public_key_der.as_bytes());
        write_field(&mut proof, FIELD_SIGNATURE, signature_der.as_bytes());

        let mut header = Vec::new();
        write_field(&mut header, FIELD_SHA256_WITH_ECDSA, &proof);
        write_field(&mut header, FIELD_SIGNED_HEADER_DATA, &signed_header_data);

        let mut crx = Vec::new();
        crx.extend_from_slice(CRX3_MAGIC);
        crx.extend_from_slice(&CRX3_VERSION.to_le_bytes());
        crx.extend_from_slice(&(header.len() as u32).to_le_bytes());
        crx.extend_from_slice(&header);
        crx.extend_from_slice(&payload);
        crx
    }

    fn make_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, contents) in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn write_field(out: &mut Vec<u8>, field: u64, value: &[u8]) {
        write_varint(out, field << 3 | 2);
        write_varint(out, value.len() as u64);
        out.extend_from_slice(value);
    }

    fn write_varint(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return;
            }
            out.push(byte | 0x80);
        }
    }
}
