use crate::errors::CoreError;

use super::encryption::{KdfParams, Sealed, NONCE_LEN, SALT_LEN};

/// Magic bytes identifying a Portify credential vault.
pub const MAGIC: &[u8; 4] = b"PFYV";

pub const CURRENT_VERSION: u16 = 1;

/// magic(4) + version(2) + kdf(12) + salt(16) + nonce(12) + ciphertext_len(8)
pub const HEADER_LEN: usize = 4 + 2 + 12 + SALT_LEN + NONCE_LEN + 8;

/// Serialize a sealed payload into the on-disk layout:
///
/// ```text
/// [PFYV] [version u16 LE] [memory_cost u32 LE] [time_cost u32 LE]
/// [parallelism u32 LE] [salt 16B] [nonce 12B] [len u64 LE] [ciphertext]
/// ```
pub fn encode(sealed: &Sealed) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + sealed.ciphertext.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
    buf.extend_from_slice(&sealed.kdf.memory_cost.to_le_bytes());
    buf.extend_from_slice(&sealed.kdf.time_cost.to_le_bytes());
    buf.extend_from_slice(&sealed.kdf.parallelism.to_le_bytes());
    buf.extend_from_slice(&sealed.salt);
    buf.extend_from_slice(&sealed.nonce);
    buf.extend_from_slice(&(sealed.ciphertext.len() as u64).to_le_bytes());
    buf.extend_from_slice(&sealed.ciphertext);
    buf
}

/// Parse and validate the vault layout.
pub fn decode(data: &[u8]) -> Result<Sealed, CoreError> {
    if data.len() < HEADER_LEN {
        return Err(CoreError::InvalidFileFormat(
            "too small to be a vault".into(),
        ));
    }

    let mut reader = Reader { data, pos: 0 };
    if reader.take::<4>()? != *MAGIC {
        return Err(CoreError::InvalidFileFormat("bad magic bytes".into()));
    }

    let version = u16::from_le_bytes(reader.take()?);
    if version == 0 || version > CURRENT_VERSION {
        return Err(CoreError::UnsupportedVersion(version));
    }

    let kdf = KdfParams {
        memory_cost: u32::from_le_bytes(reader.take()?),
        time_cost: u32::from_le_bytes(reader.take()?),
        parallelism: u32::from_le_bytes(reader.take()?),
    };
    kdf.validate()?;

    let salt = reader.take::<SALT_LEN>()?;
    let nonce = reader.take::<NONCE_LEN>()?;
    let len = u64::from_le_bytes(reader.take()?) as usize;

    let rest = &data[reader.pos..];
    if rest.len() != len {
        return Err(CoreError::InvalidFileFormat(format!(
            "ciphertext length mismatch: header says {len}, found {}",
            rest.len()
        )));
    }

    Ok(Sealed {
        kdf,
        salt,
        nonce,
        ciphertext: rest.to_vec(),
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], CoreError> {
        let end = self.pos + N;
        let bytes: [u8; N] = self
            .data
            .get(self.pos..end)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| CoreError::InvalidFileFormat("truncated header".into()))?;
        self.pos = end;
        Ok(bytes)
    }
}
